//! Local filesystem provider: the reference hierarchical backend.
//!
//! Drive paths map below the `root` property. Directories are native, so no placeholder
//! emulation is needed. Chunked uploads stage parts in a private directory under the
//! system temp dir and assemble them on completion.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use path_absolutize::Absolutize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{DirectoryReport, StorageError, StorageResult};
use crate::gateway::paths;
use crate::gateway::provider::{ByteStream, StorageProvider};
use crate::gateway::query::{self, RawEntry};
use crate::gateway::transfer::{DownloadSession, UploadSession};
use crate::gateway::types::{Drive, DriveItem, Query};

pub const ROOT_PROPERTY: &str = "root";
pub const DRIVE_LETTER_PROPERTY: &str = "driveLetter";

struct WalkEntry {
    path: PathBuf,
    is_dir: bool,
    len: u64,
    modified: Option<DateTime<Utc>>,
}

pub struct LocalFsProvider {
    drive: Drive,
    root: PathBuf,
    drive_letter: Option<char>,
    staging: PathBuf,
}

const STAGING_PREFIX: &str = "drivegate-upload-";

/// Absolute root for a drive; a drive letter only takes effect on Windows hosts.
fn resolve_root(root: &str, letter: Option<char>) -> anyhow::Result<PathBuf> {
    let (own, body) = paths::split_drive_letter(root);
    let absolute = Path::new(body).absolutize()?.to_string_lossy().into_owned();
    let (host, _) = paths::split_drive_letter(&absolute);
    let letter = if cfg!(windows) { own.or(letter).or(host) } else { None };
    Ok(PathBuf::from(paths::to_native(&absolute, letter, MAIN_SEPARATOR)))
}

fn modified_of(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

impl LocalFsProvider {
    pub fn new(drive: Drive) -> StorageResult<Self> {
        let root = drive
            .property(ROOT_PROPERTY)
            .ok_or_else(|| StorageError::invalid(format!("drive '{}' is missing property '{}'", drive.id, ROOT_PROPERTY)))?;
        let drive_letter = drive
            .property(DRIVE_LETTER_PROPERTY)
            .and_then(|v| v.chars().next())
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase());
        let root = resolve_root(root, drive_letter).map_err(|e| StorageError::backend(drive.id.clone(), e))?;
        Ok(Self { drive, root, drive_letter, staging: std::env::temp_dir() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds upload staging folders (defaults to the system temp dir).
    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.staging = dir;
        self
    }

    /// Native location of a canonical drive path.
    fn native(&self, path: &str) -> PathBuf {
        let rel = paths::to_native(&paths::to_file(path), None, MAIN_SEPARATOR);
        match rel.trim_start_matches(MAIN_SEPARATOR) {
            "" => self.root.clone(),
            rel => self.root.join(rel),
        }
    }

    /// Canonical drive path of a native location below the root.
    fn canonical(&self, native: &Path) -> String {
        let rel = native.strip_prefix(&self.root).unwrap_or(native);
        paths::from_native(&rel.to_string_lossy())
    }

    fn io_err(&self, path: &str, e: std::io::Error) -> StorageError {
        StorageError::from_io(&self.drive.id, &paths::normalize(path), e)
    }

    async fn metadata(&self, path: &str) -> StorageResult<Option<std::fs::Metadata>> {
        match tokio::fs::metadata(self.native(path)).await {
            Ok(m) => Ok(Some(m)),
            // A file ancestor means nothing can exist below it
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory) => Ok(None),
            Err(e) => Err(self.io_err(path, e)),
        }
    }

    fn item_for(&self, path: &str, meta: &std::fs::Metadata) -> DriveItem {
        if meta.is_dir() {
            let mut item = DriveItem::directory(path);
            item.modified_at = modified_of(meta);
            item
        } else {
            DriveItem::file(path, meta.len(), modified_of(meta))
        }
    }

    /// Fails when a file sits where a directory above `path` would be.
    async fn check_ancestors(&self, path: &str) -> StorageResult<()> {
        let mut dir = paths::parent(path);
        while !paths::is_root(&dir) {
            match self.metadata(&dir).await? {
                Some(m) if m.is_dir() => return Ok(()),
                Some(_) => {
                    return Err(StorageError::invalid(format!(
                        "{} is a file, cannot create {}",
                        paths::to_file(&dir),
                        paths::normalize(path)
                    )))
                }
                None => dir = paths::parent(&dir),
            }
        }
        Ok(())
    }

    async fn ensure_parent(&self, path: &str) -> StorageResult<()> {
        self.check_ancestors(path).await?;
        let parent = paths::parent(path);
        tokio::fs::create_dir_all(self.native(&parent)).await.map_err(|e| self.io_err(&parent, e))
    }

    async fn walk(&self, dir: PathBuf, recursive: bool, contents_first: bool) -> StorageResult<Vec<WalkEntry>> {
        let drive = self.drive.id.clone();
        let joined = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<WalkEntry>> {
            let mut wd = WalkDir::new(&dir).min_depth(1).sort_by_file_name().contents_first(contents_first);
            if !recursive {
                wd = wd.max_depth(1);
            }
            let mut out = Vec::new();
            for entry in wd {
                let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
                let meta = entry.metadata()?;
                out.push(WalkEntry {
                    path: entry.path().to_path_buf(),
                    is_dir: meta.is_dir(),
                    len: meta.len(),
                    modified: modified_of(&meta),
                });
            }
            Ok(out)
        })
        .await;
        match joined {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(e)) => Err(StorageError::backend(drive, e)),
            Err(e) => Err(StorageError::backend(drive, e)),
        }
    }

    async fn check_free(&self, path: &str) -> StorageResult<()> {
        if self.metadata(path).await?.is_some() {
            return Err(StorageError::already_exists(paths::normalize(path)));
        }
        Ok(())
    }

    async fn copy_tree(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        let src_dir = paths::to_directory(src);
        let dst_dir = paths::to_directory(dst);
        tokio::fs::create_dir_all(self.native(&dst_dir)).await.map_err(|e| self.io_err(&dst_dir, e))?;

        let mut report = DirectoryReport::default();
        for entry in self.walk(self.native(&src_dir), true, false).await? {
            let rel_src = self.canonical(&entry.path);
            let Some(rel) = paths::relative_to(&src_dir, &rel_src) else { continue };
            let target = paths::join(&dst_dir, rel);
            let target_native = self.native(&target);
            let step = if entry.is_dir {
                tokio::fs::create_dir_all(&target_native).await
            } else {
                tokio::fs::copy(&entry.path, &target_native).await.map(|_| ())
            };
            match step {
                Ok(()) if entry.is_dir => report.record_ok(paths::to_directory(&target)),
                Ok(()) => report.record_ok(target),
                Err(e) => {
                    let err = self.io_err(&target, e);
                    warn!(target: "drivegate::local", "copy {} -> {} failed: {}", rel_src, target, err);
                    report.record_err(target, &err);
                }
            }
        }
        report.into_result()
    }

    fn part_file(staging: &Path, part_number: u32) -> PathBuf {
        staging.join(format!("part-{:05}", part_number))
    }

    /// Staging directory of an upload, rebuilt from its id.
    fn staging_for(&self, session: &UploadSession) -> StorageResult<PathBuf> {
        let id = Uuid::parse_str(&session.upload_id)
            .map_err(|_| StorageError::invalid(format!("'{}' is not an upload id", session.upload_id)))?;
        Ok(self.staging.join(format!("{}{}", STAGING_PREFIX, id)))
    }

    /// Native file a download session reads; the handle must match its path.
    fn download_target(&self, session: &DownloadSession) -> StorageResult<PathBuf> {
        let native = self.native(&session.path);
        if Path::new(&session.handle) != native {
            return Err(StorageError::invalid(format!(
                "download session {} reads '{}' but was opened for {}",
                session.id, session.handle, session.path
            )));
        }
        Ok(native)
    }

    /// Concatenate staged parts into the target; a failed assembly leaves no target behind.
    async fn assemble(&self, session: &UploadSession, staging: &Path) -> StorageResult<DriveItem> {
        session.validate_sizes()?;
        self.ensure_parent(&session.path).await?;
        let target = self.native(&session.path);
        let out = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| self.io_err(&session.path, e))?;
        let written = self.write_parts(session, staging, out).await;
        if written.is_err() {
            if let Err(e) = tokio::fs::remove_file(&target).await {
                warn!(target: "drivegate::local", "could not remove partial {}: {}", target.display(), e);
            }
        }
        written
    }

    async fn write_parts(&self, session: &UploadSession, staging: &Path, mut out: tokio::fs::File) -> StorageResult<DriveItem> {
        for (n, _) in session.ordered_parts() {
            let part = Self::part_file(staging, n);
            let mut input = tokio::fs::File::open(&part)
                .await
                .map_err(|e| StorageError::backend(self.drive.id.clone(), anyhow::Error::new(e).context(format!("missing staged part {}", n))))?;
            tokio::io::copy(&mut input, &mut out).await.map_err(|e| self.io_err(&session.path, e))?;
        }
        out.flush().await.map_err(|e| self.io_err(&session.path, e))?;
        let meta = out.metadata().await.map_err(|e| self.io_err(&session.path, e))?;
        Ok(self.item_for(&session.path, &meta))
    }

    async fn discard_staging(&self, staging: &Path) -> StorageResult<()> {
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(target: "drivegate::local", "could not remove staging dir {}: {}", staging.display(), e);
                Err(StorageError::backend(
                    self.drive.id.clone(),
                    anyhow::Error::new(e).context(format!("removing staging dir {}", staging.display())),
                ))
            }
        }
    }
}

#[async_trait]
impl StorageProvider for LocalFsProvider {
    fn drive(&self) -> &Drive {
        &self.drive
    }

    fn required_property_keys(&self) -> Vec<&'static str> {
        vec![ROOT_PROPERTY]
    }

    async fn test_connection(&self) -> StorageResult<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::backend(self.drive.id.clone(), anyhow::anyhow!("root {} is not a directory", self.root.display()))),
            Err(e) => Err(StorageError::backend(self.drive.id.clone(), anyhow::Error::new(e).context(format!("root {}", self.root.display())))),
        }
    }

    async fn find(&self, query: &Query) -> StorageResult<Vec<DriveItem>> {
        let start = paths::to_directory(&query.start_path);
        match self.metadata(&start).await? {
            Some(m) if m.is_dir() => {}
            _ => return Ok(Vec::new()),
        }
        let entries = self.walk(self.native(&start), query.recursive, false).await?;
        let raw = entries.into_iter().map(|e| {
            let path = self.canonical(&e.path);
            if e.is_dir { RawEntry::directory(&path, e.modified) } else { RawEntry::file(&path, e.len, e.modified) }
        });
        query::reconcile(query, raw)
    }

    async fn get_drive_item(&self, path: &str) -> StorageResult<DriveItem> {
        match self.metadata(path).await? {
            Some(meta) => Ok(self.item_for(path, &meta)),
            None => Err(StorageError::not_found(paths::normalize(path))),
        }
    }

    async fn download(&self, path: &str, local: &Path) -> StorageResult<()> {
        let item = self.get_drive_item(path).await?;
        if item.is_directory {
            return Err(StorageError::invalid(format!("{} is a directory", item.path)));
        }
        tokio::fs::copy(self.native(path), local).await.map_err(|e| self.io_err(path, e))?;
        Ok(())
    }

    async fn upload(&self, path: &str, local: &Path) -> StorageResult<DriveItem> {
        if paths::is_root(path) || matches!(self.metadata(path).await?, Some(m) if m.is_dir()) {
            return Err(StorageError::already_exists(paths::to_directory(path)));
        }
        self.ensure_parent(path).await?;
        tokio::fs::copy(local, self.native(path))
            .await
            .map_err(|e| StorageError::from_io(&self.drive.id, &local.display().to_string(), e))?;
        self.get_drive_item(path).await
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        let Some(meta) = self.metadata(src).await? else {
            return Err(StorageError::not_found(paths::normalize(src)));
        };
        self.check_free(dst).await?;
        if meta.is_dir() {
            if paths::is_root(src) || paths::is_descendant(&paths::to_directory(src), &paths::to_directory(dst)) {
                return Err(StorageError::invalid(format!("cannot copy {} into {}", src, dst)));
            }
            return self.copy_tree(src, dst).await;
        }
        self.ensure_parent(dst).await?;
        tokio::fs::copy(self.native(src), self.native(dst)).await.map_err(|e| self.io_err(dst, e))?;
        let mut report = DirectoryReport::default();
        report.record_ok(paths::to_file(dst));
        Ok(report)
    }

    async fn rename(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        let Some(meta) = self.metadata(src).await? else {
            return Err(StorageError::not_found(paths::normalize(src)));
        };
        if paths::is_root(src) || paths::is_descendant(&paths::to_directory(src), &paths::to_directory(dst)) {
            return Err(StorageError::invalid(format!("cannot move {} into {}", src, dst)));
        }
        self.check_free(dst).await?;
        self.ensure_parent(dst).await?;
        // Native rename is atomic on one filesystem
        tokio::fs::rename(self.native(src), self.native(dst)).await.map_err(|e| self.io_err(src, e))?;
        let mut report = DirectoryReport::default();
        report.record_ok(if meta.is_dir() { paths::to_directory(dst) } else { paths::to_file(dst) });
        Ok(report)
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        match self.metadata(path).await? {
            None => Err(StorageError::not_found(paths::to_file(path))),
            Some(m) if m.is_dir() => Err(StorageError::invalid(format!("{} is a directory", paths::to_directory(path)))),
            Some(_) => tokio::fs::remove_file(self.native(path)).await.map_err(|e| self.io_err(path, e)),
        }
    }

    async fn delete_directory(&self, path: &str) -> StorageResult<DirectoryReport> {
        if paths::is_root(path) {
            return Err(StorageError::invalid("cannot delete the drive root"));
        }
        match self.metadata(path).await? {
            None => return Err(StorageError::not_found(paths::to_directory(path))),
            Some(m) if !m.is_dir() => return Err(StorageError::invalid(format!("{} is not a directory", paths::to_file(path)))),
            Some(_) => {}
        }
        let mut report = DirectoryReport::default();
        for entry in self.walk(self.native(path), true, true).await? {
            let p = self.canonical(&entry.path);
            let res = if entry.is_dir { tokio::fs::remove_dir(&entry.path).await } else { tokio::fs::remove_file(&entry.path).await };
            match res {
                Ok(()) => report.record_ok(if entry.is_dir { paths::to_directory(&p) } else { p }),
                Err(e) => {
                    let err = self.io_err(&p, e);
                    report.record_err(p, &err);
                }
            }
        }
        if report.is_clean() {
            let dir = paths::to_directory(path);
            match tokio::fs::remove_dir(self.native(path)).await {
                Ok(()) => report.record_ok(dir),
                Err(e) => {
                    let err = self.io_err(&dir, e);
                    report.record_err(dir, &err);
                }
            }
        }
        report.into_result()
    }

    async fn mkdir(&self, path: &str) -> StorageResult<DriveItem> {
        if let Some(m) = self.metadata(path).await? {
            let existing = if m.is_dir() { paths::to_directory(path) } else { paths::to_file(path) };
            return Err(StorageError::already_exists(existing));
        }
        self.check_ancestors(path).await?;
        tokio::fs::create_dir_all(self.native(path)).await.map_err(|e| self.io_err(path, e))?;
        self.get_drive_item(&paths::to_directory(path)).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.metadata(path).await?.is_some())
    }

    async fn is_directory(&self, path: &str) -> StorageResult<bool> {
        Ok(self.metadata(path).await?.map(|m| m.is_dir()).unwrap_or(false))
    }

    async fn upload_start(&self, path: &str) -> StorageResult<UploadSession> {
        if paths::is_root(path) || paths::is_directory_path(path) {
            return Err(StorageError::invalid(format!("upload target {} is not a file path", path)));
        }
        self.check_free(path).await?;
        let id = Uuid::new_v4();
        let staging = self.staging.join(format!("{}{}", STAGING_PREFIX, id));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| StorageError::backend(self.drive.id.clone(), anyhow::Error::new(e).context("creating upload staging dir")))?;
        debug!(target: "drivegate::transfer", "staging upload of {} in {}", path, staging.display());
        // Filesystems impose no part minimum
        Ok(UploadSession::new(&self.drive.id, path, id.to_string(), 0))
    }

    async fn upload_part(&self, session: &mut UploadSession, bytes: &[u8], part_number: u32) -> StorageResult<()> {
        UploadSession::check_part_number(part_number)?;
        let part = Self::part_file(&self.staging_for(session)?, part_number);
        tokio::fs::write(&part, bytes)
            .await
            .map_err(|e| StorageError::backend(self.drive.id.clone(), anyhow::Error::new(e).context(format!("staging part {}", part_number))))?;
        let receipt = part.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        session.record_part(part_number, bytes.len() as u64, receipt)
    }

    async fn upload_complete(&self, session: UploadSession) -> StorageResult<DriveItem> {
        let staging = self.staging_for(&session)?;
        let result = self.assemble(&session, &staging).await;
        let cleaned = self.discard_staging(&staging).await;
        let item = result?;
        cleaned?;
        debug!(target: "drivegate::transfer", "assembled {} from {} parts", item.path, session.parts.len());
        Ok(item)
    }

    async fn upload_abort(&self, session: UploadSession) -> StorageResult<()> {
        self.discard_staging(&self.staging_for(&session)?).await
    }

    async fn download_start(&self, path: &str) -> StorageResult<DownloadSession> {
        let item = self.get_drive_item(path).await?;
        if item.is_directory {
            return Err(StorageError::invalid(format!("{} is a directory", item.path)));
        }
        let native = self.native(path);
        let mut session = DownloadSession::new(&self.drive.id, path, native.to_string_lossy().into_owned(), item.size_bytes);
        session.modified_at = item.modified_at;
        Ok(session)
    }

    async fn download_bytes(&self, session: &DownloadSession, offset: u64, count: usize) -> StorageResult<Vec<u8>> {
        let target = self.download_target(session)?;
        let Some((offset, count)) = session.clamp(offset, count) else {
            return Ok(Vec::new());
        };
        let mut file = tokio::fs::File::open(&target).await.map_err(|e| self.io_err(&session.path, e))?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| self.io_err(&session.path, e))?;
        let mut buf = Vec::with_capacity(count);
        file.take(count as u64).read_to_end(&mut buf).await.map_err(|e| self.io_err(&session.path, e))?;
        Ok(buf)
    }

    async fn download_complete(&self, session: DownloadSession) -> StorageResult<()> {
        crate::tprintln!("download session {} for {} released", session.id, session.path);
        Ok(())
    }

    async fn get_input_stream(&self, path: &str) -> StorageResult<ByteStream> {
        let session = self.download_start(path).await?;
        let file = tokio::fs::File::open(self.download_target(&session)?).await.map_err(|e| self.io_err(path, e))?;
        Ok(Box::pin(file))
    }

    fn external_location_uri(&self, path: &str) -> String {
        let root = self.root.to_string_lossy().replace('\\', "/");
        let (own, body) = paths::split_drive_letter(&root);
        let letter = own.or(self.drive_letter).map(|l| format!("/{}:", l)).unwrap_or_default();
        let encoded: Vec<String> = paths::to_file(path)
            .split(paths::SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        let body = paths::remove_trailing(body);
        if encoded.is_empty() {
            format!("file://{}{}/", letter, body)
        } else {
            format!("file://{}{}/{}", letter, body, encoded.join("/"))
        }
    }
}
