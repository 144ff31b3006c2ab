//! End-to-end gateway tests over both built-in backends: the in-memory object store
//! (flat keys, emulated directories) and the local filesystem (native directories).

use anyhow::Result;
use tempfile::tempdir;

use drivegate::gateway::{
    AccessLevel, BackendType, Drive, DriveItem, DriveRegistry, Gateway, GlobalGatewayConfig, ObjectStore, Principal, Query,
    SecurityRule,
};
use drivegate::StorageError;

const MIB: usize = 1024 * 1024;

fn full_access(drive: Drive) -> Drive {
    [AccessLevel::Delete, AccessLevel::Archive, AccessLevel::Restore]
        .into_iter()
        .fold(drive, |d, level| d.with_rule(SecurityRule::include("admin", ".*", level)))
}

fn admin() -> Principal {
    Principal::new("tester", &["admin"])
}

/// A gateway with drive `mem` (bucket `lake`) and drive `disk` rooted at `<scratch>/disk`.
fn gateway(scratch: &std::path::Path) -> Gateway {
    let root = scratch.join("disk");
    std::fs::create_dir_all(&root).unwrap();
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(full_access(Drive::new("mem", BackendType::Memory).with_property("bucket", "lake"))).unwrap();
    reg.add_drive(full_access(Drive::new("disk", BackendType::LocalFilesystem).with_property("root", &root.to_string_lossy())))
        .unwrap();
    Gateway::new(reg)
}

/// Write raw object keys straight into the `lake` bucket.
async fn seed_keys(gw: &Gateway, keys: &[&str]) {
    gw.registry().provider("mem").unwrap();
    let bucket = gw.registry().memory().bucket("lake").unwrap();
    for k in keys {
        let body = if k.ends_with('/') { Vec::new() } else { k.as_bytes().to_vec() };
        bucket.put(k, body, None).await.unwrap();
    }
}

fn names(items: &[DriveItem]) -> Vec<String> {
    items.iter().map(|i| i.path.clone()).collect()
}

#[tokio::test]
async fn folder_scoped_query_yields_unique_children() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    seed_keys(
        &gw,
        &[
            "folder1/subFolder1/fileA.png",
            "folder1/subFolder1/fileB.docx",
            "folder1/fileC.txt",
            "folder1/fileD.java",
            "folder1/",
            "folder1/subFolder1/",
        ],
    )
    .await;

    let items = gw.list(&admin(), "mem", "/folder1").await?;
    assert_eq!(names(&items), vec!["/folder1/fileC.txt", "/folder1/fileD.java", "/folder1/subFolder1/"]);
    Ok(())
}

#[tokio::test]
async fn repeated_sub_names_are_listed_once() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    seed_keys(
        &gw,
        &[
            "folderSameName/folderSameName/fileA.png",
            "folderSameName/folderSameName/fileB.docx",
            "folderSameName/fileC.txt",
            "folderSameName/folderSameName/",
            "folderSameName/",
        ],
    )
    .await;

    let items = gw.list(&admin(), "mem", "/folderSameName").await?;
    let got = names(&items);
    assert_eq!(got.iter().filter(|p| *p == "/folderSameName/fileC.txt").count(), 1);
    assert_eq!(got.iter().filter(|p| *p == "/folderSameName/folderSameName/").count(), 1);
    assert_eq!(got.len(), 2);

    let deep = gw.find(&admin(), &Query::new("mem", "/folderSameName").recursive(true)).await?;
    assert_eq!(deep.len(), 4);
    Ok(())
}

#[tokio::test]
async fn mkdir_then_exists_on_both_backends() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    for drive in ["mem", "disk"] {
        let item = gw.mkdir(&admin(), drive, "/reports/2024").await?;
        assert!(item.is_directory, "{drive}");
        assert!(gw.exists(&admin(), drive, "/reports/2024").await?, "{drive}");
        assert!(gw.is_directory(&admin(), drive, "/reports").await?, "{drive}");
        let again = gw.mkdir(&admin(), drive, "/reports/2024").await;
        assert!(matches!(again, Err(StorageError::AlreadyExists { .. })), "{drive}");

        // an empty directory lists the same with and without placeholders
        let plain = gw.find(&admin(), &Query::new(drive, "/reports")).await?;
        assert_eq!(names(&plain), vec!["/reports/2024/"], "{drive}");
        let shown = gw.find(&admin(), &Query::new(drive, "/reports").placeholders(true)).await?;
        assert_eq!(names(&shown), vec!["/reports/2024/"], "{drive}");
    }
    Ok(())
}

#[tokio::test]
async fn chunked_upload_reassembles_byte_for_byte() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();

    // part 1: exactly 5 MiB of numbered text lines, part 2: a small local file
    let mut part1 = String::with_capacity(5 * MIB);
    let mut n = 0;
    while part1.len() + 12 <= 5 * MIB {
        part1.push_str(&format!("line {:06}\n", n));
        n += 1;
    }
    while part1.len() < 5 * MIB {
        part1.push('.');
    }
    let part2 = b"\ntail of the upload\n".to_vec();
    let local_part2 = tmp.path().join("part2.txt");
    std::fs::write(&local_part2, &part2)?;
    let mut expected = part1.clone().into_bytes();
    expected.extend_from_slice(&part2);

    for drive in ["mem", "disk"] {
        let mut session = gw.upload_start(&who, drive, "/big/upload.txt").await?;
        gw.upload_part(&who, &mut session, part1.as_bytes(), 1).await?;
        gw.upload_part(&who, &mut session, &std::fs::read(&local_part2)?, 2).await?;
        let item = gw.upload_complete(&who, session).await?;
        assert_eq!(item.size_bytes, expected.len() as u64, "{drive}");

        let dl = gw.download_start(&who, drive, "/big/upload.txt").await?;
        assert_eq!(dl.length, expected.len() as u64);
        let mut got = Vec::with_capacity(expected.len());
        let mut offset = 0u64;
        loop {
            let chunk = gw.download_bytes(&who, &dl, offset, MIB).await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            got.extend_from_slice(&chunk);
        }
        gw.download_complete(dl).await?;
        assert!(got == expected, "{drive}: reassembled content differs");

        let preview = gw.preview_lines(&who, drive, "/big/upload.txt", 3).await?;
        assert_eq!(preview.lines, vec!["line 000000", "line 000001", "line 000002"], "{drive}");
    }
    Ok(())
}

#[tokio::test]
async fn undersized_leading_part_is_rejected_on_object_stores() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    let mut session = gw.upload_start(&who, "mem", "/small.bin").await?;
    gw.upload_part(&who, &mut session, b"tiny", 1).await?;
    gw.upload_part(&who, &mut session, b"tail", 2).await?;
    let err = gw.upload_complete(&who, session).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
    assert!(!gw.exists(&who, "mem", "/small.bin").await?);
    Ok(())
}

#[tokio::test]
async fn download_bytes_at_and_near_end_of_file() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    let local = tmp.path().join("ten.txt");
    std::fs::write(&local, b"0123456789")?;

    for drive in ["mem", "disk"] {
        gw.upload(&who, drive, "/data/ten.txt", &local).await?;
        let dl = gw.download_start(&who, drive, "/data/ten.txt").await?;
        assert_eq!(gw.download_bytes(&who, &dl, 7, 10).await?, b"789".to_vec(), "{drive}");
        assert_eq!(gw.download_bytes(&who, &dl, 9, 1).await?, b"9".to_vec(), "{drive}");
        assert!(gw.download_bytes(&who, &dl, 10, 5).await?.is_empty(), "{drive}");
        assert!(gw.download_bytes(&who, &dl, 50, 5).await?.is_empty(), "{drive}");
        assert!(gw.download_bytes(&who, &dl, 0, 0).await?.is_empty(), "{drive}");
        gw.download_complete(dl).await?;
    }
    Ok(())
}

#[tokio::test]
async fn preview_returns_requested_lines() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    let local = tmp.path().join("lines.txt");
    std::fs::write(&local, b"alpha\nbeta\r\ngamma\rdelta")?;

    for drive in ["mem", "disk"] {
        gw.upload(&who, drive, "/lines.txt", &local).await?;
        assert!(gw.preview_lines(&who, drive, "/lines.txt", 0).await?.lines.is_empty());
        let two = gw.preview_lines(&who, drive, "/lines.txt", 2).await?;
        assert_eq!(two.lines, vec!["alpha", "beta"]);
        let all = gw.preview_lines(&who, drive, "/lines.txt", 100).await?;
        assert_eq!(all.lines, vec!["alpha", "beta", "gamma", "delta"]);
        assert!(all.reached_end);
    }
    Ok(())
}

#[tokio::test]
async fn copy_with_failures_reports_partial_progress() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    seed_keys(&gw, &["src/a.csv", "src/b.csv", "src/c.csv"]).await;
    let bucket = gw.registry().memory().bucket("lake").unwrap();

    bucket.set_failure_filter(Some("dst/b"));
    let err = gw.copy(&who, "mem", "/src", "/dst").await.unwrap_err();
    let StorageError::PartialFailure(report) = err else {
        panic!("expected a partial failure, got {err:?}");
    };
    assert_eq!(report.completed, vec!["/dst/a.csv", "/dst/c.csv"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "/dst/b.csv");
    bucket.set_failure_filter(None);

    // completed work stays in place
    assert!(gw.exists(&who, "mem", "/dst/a.csv").await?);
    assert!(!gw.exists(&who, "mem", "/dst/b.csv").await?);
    assert!(gw.exists(&who, "mem", "/src/b.csv").await?);
    Ok(())
}

#[tokio::test]
async fn restore_flow_on_archived_objects() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    let local = tmp.path().join("cold.bin");
    std::fs::write(&local, b"cold data")?;
    gw.upload(&who, "mem", "/archive/cold.bin", &local).await?;
    gw.upload(&who, "mem", "/archive/warm.bin", &local).await?;

    let classes = gw.storage_classes("mem")?;
    assert!(classes.iter().any(|c| c.class_id == "GLACIER" && c.requires_restore));
    assert!(gw.requires_days_to_expire("mem")?);

    let item = gw.update_storage_class(&who, "mem", "/archive/cold.bin", "glacier").await?;
    assert_eq!(item.storage_class.as_deref(), Some("GLACIER"));

    assert!(matches!(gw.restore(&who, "mem", "/archive", 0).await, Err(StorageError::InvalidArgument(_))));

    let summary = gw.restore(&who, "mem", "/archive", 7).await?;
    assert_eq!(summary.requested, vec!["/archive/cold.bin"]);
    assert_eq!(summary.skipped, vec!["/archive/warm.bin"]);
    assert!(gw.stat(&who, "mem", "/archive/cold.bin").await?.is_restoring);

    // a second request while rehydration is pending is a no-op
    let again = gw.restore(&who, "mem", "/archive/cold.bin", 7).await?;
    assert!(again.requested.is_empty());

    let bucket = gw.registry().memory().bucket("lake").unwrap();
    assert_eq!(bucket.complete_pending_restores(), 1);
    let done = gw.stat(&who, "mem", "/archive/cold.bin").await?;
    assert!(!done.is_restoring);
    assert!(done.restore_expires_at.is_some());
    Ok(())
}

#[tokio::test]
async fn rename_and_delete_trees_on_both_backends() -> Result<()> {
    let tmp = tempdir()?;
    let gw = gateway(tmp.path());
    let who = admin();
    let local = tmp.path().join("f.txt");
    std::fs::write(&local, b"f")?;

    for drive in ["mem", "disk"] {
        gw.upload(&who, drive, "/proj/a/f.txt", &local).await?;
        gw.upload(&who, drive, "/proj/a/g/h.txt", &local).await?;
        gw.rename(&who, drive, "/proj/a", "/proj/b").await?;
        assert!(!gw.exists(&who, drive, "/proj/a").await?, "{drive}");
        assert!(gw.exists(&who, drive, "/proj/b/g/h.txt").await?, "{drive}");
        assert!(matches!(gw.copy(&who, drive, "/proj/b", "/proj/b/inner").await, Err(StorageError::InvalidArgument(_))));

        gw.delete(&who, drive, "/proj/b").await?;
        assert!(!gw.exists(&who, drive, "/proj/b").await?, "{drive}");
        // the parent survives as an empty directory
        assert!(gw.is_directory(&who, drive, "/proj").await?, "{drive}");
    }
    Ok(())
}

#[tokio::test]
async fn readers_cannot_write() -> Result<()> {
    let tmp = tempdir()?;
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(
        Drive::new("disk", BackendType::LocalFilesystem)
            .with_property("root", &tmp.path().to_string_lossy())
            .with_rule(SecurityRule::include("viewer", ".*", AccessLevel::Read)),
    )?;
    let gw = Gateway::new(reg);
    let viewer = Principal::new("v", &["viewer"]);
    assert!(gw.list(&viewer, "disk", "/").await?.is_empty());
    let err = gw.mkdir(&viewer, "disk", "/nope").await.unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied { level: AccessLevel::Create, .. }));
    assert_eq!(err.http_status(), 403);
    Ok(())
}
