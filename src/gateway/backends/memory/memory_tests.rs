use super::*;

async fn seeded() -> MemoryObjectStore {
    let s = MemoryObjectStore::new("bucket-a");
    for key in ["a/1.txt", "a/b/2.txt", "a/b/", "c.txt", "ab.txt"] {
        s.put(key, key.as_bytes().to_vec(), None).await.unwrap();
    }
    s
}

#[tokio::test]
async fn flat_listing_is_prefix_scoped() {
    let s = seeded().await;
    let l = s.list("a/", None).await.unwrap();
    let keys: Vec<&str> = l.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["a/1.txt", "a/b/", "a/b/2.txt"]);
    assert!(l.common_prefixes.is_empty());
}

#[tokio::test]
async fn delimiter_listing_groups_prefixes() {
    let s = seeded().await;
    let root = s.list("", Some('/')).await.unwrap();
    let keys: Vec<&str> = root.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["ab.txt", "c.txt"]);
    assert_eq!(root.common_prefixes, vec!["a/".to_string()]);

    let a = s.list("a/", Some('/')).await.unwrap();
    assert_eq!(a.objects.len(), 1);
    assert_eq!(a.common_prefixes, vec!["a/b/".to_string()]);
}

#[tokio::test]
async fn copy_keeps_class_unless_overridden() {
    let s = MemoryObjectStore::new("b");
    s.put("cold.bin", vec![1, 2, 3], Some("GLACIER")).await.unwrap();
    let kept = s.copy_object("cold.bin", "copy.bin", None).await.unwrap();
    assert_eq!(kept.storage_class.as_deref(), Some("GLACIER"));
    let changed = s.copy_object("cold.bin", "cold.bin", Some("STANDARD")).await.unwrap();
    assert_eq!(changed.storage_class.as_deref(), Some("STANDARD"));
    assert_eq!(s.get_range("cold.bin", 0, 10).await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn multipart_assembles_in_given_order() {
    let s = MemoryObjectStore::new("b");
    let id = s.create_multipart("big.bin").await.unwrap();
    let e2 = s.upload_part("big.bin", &id, 2, b"world".to_vec()).await.unwrap();
    let e1 = s.upload_part("big.bin", &id, 1, b"hello ".to_vec()).await.unwrap();
    assert!(s.head("big.bin").await.unwrap().is_none());
    let meta = s.complete_multipart("big.bin", &id, &[(1, e1), (2, e2)]).await.unwrap();
    assert_eq!(meta.size, 11);
    assert!(meta.etag.unwrap().ends_with("-2"));
    assert_eq!(s.get_range("big.bin", 0, 100).await.unwrap(), b"hello world".to_vec());
}

#[tokio::test]
async fn multipart_rejects_unknown_parts() {
    let s = MemoryObjectStore::new("b");
    let id = s.create_multipart("x").await.unwrap();
    s.upload_part("x", &id, 1, b"a".to_vec()).await.unwrap();
    assert!(s.complete_multipart("x", &id, &[(1, "bogus".into())]).await.is_err());
    let id = s.create_multipart("x").await.unwrap();
    s.abort_multipart("x", &id).await.unwrap();
    assert!(s.upload_part("x", &id, 1, b"a".to_vec()).await.is_err());
}

#[tokio::test]
async fn ranged_reads_are_never_padded() {
    let s = MemoryObjectStore::new("b");
    s.put("f", b"0123456789".to_vec(), None).await.unwrap();
    assert_eq!(s.get_range("f", 8, 5).await.unwrap(), b"89".to_vec());
    assert!(s.get_range("f", 10, 5).await.unwrap().is_empty());
    assert!(s.get_range("f", u64::MAX, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_injection_and_offline() {
    let s = seeded().await;
    s.set_failure_filter(Some("b/2"));
    assert!(s.head("a/b/2.txt").await.is_err());
    assert!(s.head("a/1.txt").await.unwrap().is_some());
    s.set_failure_filter(None);
    s.set_offline(true);
    assert!(s.ping().await.is_err());
    s.set_offline(false);
    s.ping().await.unwrap();
}

#[tokio::test]
async fn restore_lifecycle() {
    let s = MemoryObjectStore::new("b");
    s.put("archive/a.csv", vec![0; 4], Some("DEEP_ARCHIVE")).await.unwrap();
    s.restore_object("archive/a.csv", 3).await.unwrap();
    assert!(s.head("archive/a.csv").await.unwrap().unwrap().is_restoring);
    assert_eq!(s.complete_pending_restores(), 1);
    let meta = s.head("archive/a.csv").await.unwrap().unwrap();
    assert!(!meta.is_restoring);
    assert!(meta.restore_expires_at.unwrap() > Utc::now());
    assert_eq!(s.complete_pending_restores(), 0);
}

#[test]
fn external_uri_keeps_separators() {
    let s = MemoryObjectStore::new("lake");
    assert_eq!(s.external_uri("raw/my file.csv"), "memory://lake/raw/my%20file.csv");
}
