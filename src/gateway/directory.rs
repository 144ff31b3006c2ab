//! Directory emulation over flat object-key stores.
//!
//! `ObjectStore` is the narrow set of primitives a vendor client offers (list by prefix,
//! head, put, ranged get, copy, multipart). `ObjectStoreProvider` layers the full
//! provider contract on top of it, emulating directories:
//! - a directory exists when its placeholder key ("dir/") exists or any key has it as prefix
//! - writing under a directory drops the now redundant placeholders of its ancestors
//! - removing the last object of a directory writes its placeholder back
//! - directory copy/rename walk the sorted descendants one by one and report partial
//!   progress instead of rolling back

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{DirectoryReport, StorageError, StorageResult};

use super::paths;
use super::provider::{ByteStream, StorageProvider, TieringProvider};
use super::query::{self, RawEntry};
use super::tiering::{self, RestoreSummary};
use super::transfer::{DownloadSession, UploadSession};
use super::types::{Drive, DriveItem, Query, StorageClass};

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
    pub is_restoring: bool,
    pub restore_expires_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(key: &str, size: u64) -> Self {
        Self {
            key: key.to_string(),
            size,
            modified_at: None,
            etag: None,
            storage_class: None,
            is_restoring: false,
            restore_expires_at: None,
        }
    }

    fn raw_entry(&self) -> RawEntry {
        let mut e = RawEntry::from_object_key(&self.key, self.size, self.modified_at);
        e.storage_class = self.storage_class.clone();
        e.is_restoring = self.is_restoring;
        e.restore_expires_at = self.restore_expires_at;
        e
    }

    fn to_item(&self) -> DriveItem {
        let mut item = DriveItem::file(&paths::from_object_key(&self.key), self.size, self.modified_at);
        item.storage_class = self.storage_class.clone();
        item.is_restoring = self.is_restoring;
        item.restore_expires_at = self.restore_expires_at;
        item
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub objects: Vec<ObjectMeta>,
    /// Filled only for delimiter listings.
    pub common_prefixes: Vec<String>,
}

/// Flat key/value primitives of an object store. Keys never start with '/'.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket/container name.
    fn name(&self) -> &str;

    async fn ping(&self) -> anyhow::Result<()>;

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> anyhow::Result<ObjectListing>;

    async fn head(&self, key: &str) -> anyhow::Result<Option<ObjectMeta>>;

    async fn put(&self, key: &str, data: Vec<u8>, class: Option<&str>) -> anyhow::Result<ObjectMeta>;

    async fn get_range(&self, key: &str, offset: u64, count: usize) -> anyhow::Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Server-side copy. `class: None` keeps the source object's class.
    async fn copy_object(&self, src: &str, dst: &str, class: Option<&str>) -> anyhow::Result<ObjectMeta>;

    async fn create_multipart(&self, key: &str) -> anyhow::Result<String>;

    /// Returns the part etag.
    async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Vec<u8>) -> anyhow::Result<String>;

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[(u32, String)]) -> anyhow::Result<ObjectMeta>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> anyhow::Result<()>;

    /// Vendor minimum for non-final multipart parts, if the store declares one.
    fn min_part_size(&self) -> Option<u64>;

    fn storage_classes(&self) -> Vec<StorageClass> {
        Vec::new()
    }

    async fn restore_object(&self, key: &str, _days: u32) -> anyhow::Result<()> {
        anyhow::bail!("store '{}' cannot restore '{}'", self.name(), key)
    }

    fn requires_days_to_expire(&self) -> bool {
        false
    }

    fn external_uri(&self, key: &str) -> String;
}

/// Storage provider for any flat object store.
pub struct ObjectStoreProvider<S: ObjectStore> {
    drive: Drive,
    store: S,
    min_part_size: u64,
    classes: Vec<StorageClass>,
}

fn file_key(path: &str) -> String {
    paths::to_object_key(&paths::to_file(path))
}

fn dir_key(path: &str) -> String {
    paths::to_object_key(&paths::to_directory(path))
}

impl<S: ObjectStore> ObjectStoreProvider<S> {
    pub fn new(drive: Drive, store: S, default_min_part_size: u64) -> StorageResult<Self> {
        let classes = store.storage_classes();
        if !classes.is_empty() {
            tiering::validate_catalogue(&classes)?;
        }
        let min_part_size = store.min_part_size().unwrap_or(default_min_part_size);
        Ok(Self { drive, store, min_part_size, classes })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    fn unavailable(&self, e: anyhow::Error) -> StorageError {
        StorageError::backend(self.drive.id.clone(), e)
    }

    async fn list_all(&self, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        let listing = self.store.list(prefix, None).await.map_err(|e| self.unavailable(e))?;
        Ok(listing.objects)
    }

    async fn head_key(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        self.store.head(key).await.map_err(|e| self.unavailable(e))
    }

    /// The object stored at a file path; None for root and directory-form paths.
    async fn head_file(&self, path: &str) -> StorageResult<Option<ObjectMeta>> {
        if paths::is_root(path) || paths::is_directory_path(path) {
            return Ok(None);
        }
        self.head_key(&file_key(path)).await
    }

    /// Placeholder or semantic existence.
    async fn dir_exists(&self, path: &str) -> StorageResult<bool> {
        if paths::is_root(path) {
            return Ok(true);
        }
        let listing = self.store.list(&dir_key(path), Some(paths::SEPARATOR)).await.map_err(|e| self.unavailable(e))?;
        Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty())
    }

    async fn put_placeholder(&self, key: &str) -> StorageResult<()> {
        self.store.put(key, Vec::new(), None).await.map_err(|e| self.unavailable(e))?;
        Ok(())
    }

    /// Re-create a directory's placeholder when nothing else keeps it alive.
    async fn ensure_placeholder(&self, dir: &str) -> StorageResult<()> {
        if paths::is_root(dir) || self.dir_exists(dir).await? {
            return Ok(());
        }
        crate::tprintln!("restoring placeholder for {}", dir);
        self.put_placeholder(&dir_key(dir)).await
    }

    /// Drop placeholders of every ancestor of `path`; they now exist through it.
    async fn clear_ancestor_placeholders(&self, path: &str) -> StorageResult<()> {
        let mut dir = paths::parent(path);
        while !paths::is_root(&dir) {
            let key = dir_key(&dir);
            if self.head_key(&key).await?.is_some() {
                self.store.delete(&key).await.map_err(|e| self.unavailable(e))?;
            }
            dir = paths::parent(&dir);
        }
        Ok(())
    }

    async fn check_free(&self, path: &str) -> StorageResult<()> {
        if self.exists(path).await? {
            return Err(StorageError::already_exists(paths::normalize(path)));
        }
        Ok(())
    }

    async fn transfer_file(&self, meta: ObjectMeta, dst: &str, remove_source: bool) -> StorageResult<DirectoryReport> {
        self.check_free(dst).await?;
        let dst_key = file_key(dst);
        self.store.copy_object(&meta.key, &dst_key, None).await.map_err(|e| self.unavailable(e))?;
        self.clear_ancestor_placeholders(dst).await?;
        if remove_source {
            self.store.delete(&meta.key).await.map_err(|e| self.unavailable(e))?;
            self.ensure_placeholder(&paths::parent(&paths::from_object_key(&meta.key))).await?;
        }
        let mut report = DirectoryReport::default();
        report.record_ok(paths::to_file(dst));
        Ok(report)
    }

    /// Copy (or move) every object under `src` to `dst`, one key at a time.
    async fn transfer_tree(&self, src: &str, dst: &str, remove_source: bool) -> StorageResult<DirectoryReport> {
        let src_dir = paths::to_directory(src);
        let dst_dir = paths::to_directory(dst);
        if paths::is_root(&src_dir) {
            return Err(StorageError::invalid("cannot copy or move the drive root"));
        }
        if src_dir == dst_dir || paths::is_descendant(&src_dir, &dst_dir) {
            return Err(StorageError::invalid(format!("cannot copy {} into itself ({})", src_dir, dst_dir)));
        }
        self.check_free(&dst_dir).await?;
        if self.head_file(dst).await?.is_some() {
            return Err(StorageError::already_exists(paths::to_file(dst)));
        }

        let src_prefix = dir_key(&src_dir);
        let dst_prefix = dir_key(&dst_dir);
        let mut keys: Vec<String> = self.list_all(&src_prefix).await?.into_iter().map(|m| m.key).collect();
        keys.sort();

        // Destination marker first so the target directory exists even if nothing lands
        self.put_placeholder(&dst_prefix).await?;
        self.clear_ancestor_placeholders(&dst_dir).await?;

        let mut report = DirectoryReport::default();
        let mut moved_any = false;
        for key in &keys {
            let Some(rel) = key.strip_prefix(src_prefix.as_str()) else { continue };
            if rel.is_empty() {
                continue;
            }
            let target = format!("{}{}", dst_prefix, rel);
            let target_path = paths::from_object_key(&target);
            let step = async {
                self.store.copy_object(key, &target, None).await?;
                if remove_source {
                    self.store.delete(key).await?;
                }
                anyhow::Ok(())
            }
            .await;
            match step {
                Ok(()) => {
                    moved_any = true;
                    report.record_ok(target_path);
                }
                Err(e) => {
                    let err = self.unavailable(e);
                    warn!(target: "drivegate::directory", "{} -> {} failed: {}", key, target, err);
                    report.record_err(target_path, &err);
                }
            }
        }

        if moved_any {
            self.store.delete(&dst_prefix).await.map_err(|e| self.unavailable(e))?;
        }
        if remove_source && report.is_clean() {
            if keys.iter().any(|k| *k == src_prefix) {
                self.store.delete(&src_prefix).await.map_err(|e| self.unavailable(e))?;
            }
            self.ensure_placeholder(&paths::parent(&src_dir)).await?;
        }
        debug!(
            target: "drivegate::directory",
            "tree {} {} -> {}: {} ok, {} failed",
            if remove_source { "move" } else { "copy" }, src_dir, dst_dir, report.completed.len(), report.failed.len()
        );
        report.into_result()
    }

    async fn collect_restore(&self, items: Vec<DriveItem>, days: u32) -> StorageResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for item in items.into_iter().filter(|i| !i.is_directory) {
            if tiering::needs_restore(&self.classes, &item) {
                self.store.restore_object(&file_key(&item.path), days).await.map_err(|e| self.unavailable(e))?;
                summary.requested.push(item.path);
            } else {
                summary.skipped.push(item.path);
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl<S: ObjectStore> StorageProvider for ObjectStoreProvider<S> {
    fn drive(&self) -> &Drive {
        &self.drive
    }

    fn required_property_keys(&self) -> Vec<&'static str> {
        vec!["bucket"]
    }

    async fn test_connection(&self) -> StorageResult<()> {
        self.store.ping().await.map_err(|e| self.unavailable(e))
    }

    async fn find(&self, query: &Query) -> StorageResult<Vec<DriveItem>> {
        // Full prefix listing in both modes so placeholder-only directories are
        // treated the same whether or not the query recurses
        let objects = self.list_all(&dir_key(&query.start_path)).await?;
        query::reconcile(query, objects.iter().map(ObjectMeta::raw_entry))
    }

    async fn get_drive_item(&self, path: &str) -> StorageResult<DriveItem> {
        if let Some(meta) = self.head_file(path).await? {
            return Ok(meta.to_item());
        }
        if self.dir_exists(path).await? {
            let mut item = DriveItem::directory(path);
            if !paths::is_root(path) {
                item.modified_at = self.head_key(&dir_key(path)).await?.and_then(|m| m.modified_at);
            }
            return Ok(item);
        }
        Err(StorageError::not_found(paths::normalize(path)))
    }

    async fn download(&self, path: &str, local: &Path) -> StorageResult<()> {
        let session = self.download_start(path).await?;
        let bytes = self.download_bytes(&session, 0, session.length as usize).await?;
        self.download_complete(session).await?;
        tokio::fs::write(local, &bytes)
            .await
            .map_err(|e| StorageError::from_io(&self.drive.id, &local.display().to_string(), e))
    }

    async fn upload(&self, path: &str, local: &Path) -> StorageResult<DriveItem> {
        if paths::is_root(path) || self.is_directory(path).await? {
            return Err(StorageError::already_exists(paths::to_directory(path)));
        }
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| StorageError::from_io(&self.drive.id, &local.display().to_string(), e))?;
        let meta = self.store.put(&file_key(path), data, None).await.map_err(|e| self.unavailable(e))?;
        self.clear_ancestor_placeholders(path).await?;
        Ok(meta.to_item())
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        if let Some(meta) = self.head_file(src).await? {
            return self.transfer_file(meta, dst, false).await;
        }
        if self.dir_exists(src).await? {
            return self.transfer_tree(src, dst, false).await;
        }
        Err(StorageError::not_found(paths::normalize(src)))
    }

    async fn rename(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        if let Some(meta) = self.head_file(src).await? {
            return self.transfer_file(meta, dst, true).await;
        }
        if self.dir_exists(src).await? {
            return self.transfer_tree(src, dst, true).await;
        }
        Err(StorageError::not_found(paths::normalize(src)))
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        let Some(meta) = self.head_file(path).await? else {
            if self.dir_exists(path).await? {
                return Err(StorageError::invalid(format!("{} is a directory", paths::to_directory(path))));
            }
            return Err(StorageError::not_found(paths::to_file(path)));
        };
        self.store.delete(&meta.key).await.map_err(|e| self.unavailable(e))?;
        self.ensure_placeholder(&paths::parent(path)).await
    }

    async fn delete_directory(&self, path: &str) -> StorageResult<DirectoryReport> {
        if paths::is_root(path) {
            return Err(StorageError::invalid("cannot delete the drive root"));
        }
        if !self.dir_exists(path).await? {
            return Err(StorageError::not_found(paths::to_directory(path)));
        }
        let prefix = dir_key(path);
        let mut keys: Vec<String> = self.list_all(&prefix).await?.into_iter().map(|m| m.key).collect();
        keys.sort();
        // Own placeholder last
        if let Some(pos) = keys.iter().position(|k| *k == prefix) {
            let own = keys.remove(pos);
            keys.push(own);
        }

        let mut report = DirectoryReport::default();
        for key in &keys {
            let item_path = paths::from_object_key(key);
            match self.store.delete(key).await {
                Ok(()) => report.record_ok(item_path),
                Err(e) => report.record_err(item_path, &self.unavailable(e)),
            }
        }
        if report.is_clean() {
            self.ensure_placeholder(&paths::parent(path)).await?;
        }
        debug!(target: "drivegate::directory", "deleted {}: {} objects", prefix, report.completed.len());
        report.into_result()
    }

    async fn mkdir(&self, path: &str) -> StorageResult<DriveItem> {
        if paths::is_root(path) || self.dir_exists(path).await? {
            return Err(StorageError::already_exists(paths::to_directory(path)));
        }
        if self.head_key(&file_key(path)).await?.is_some() {
            return Err(StorageError::already_exists(paths::to_file(path)));
        }
        let meta = self.store.put(&dir_key(path), Vec::new(), None).await.map_err(|e| self.unavailable(e))?;
        self.clear_ancestor_placeholders(&paths::to_directory(path)).await?;
        let mut item = DriveItem::directory(path);
        item.modified_at = meta.modified_at;
        Ok(item)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        if self.head_file(path).await?.is_some() {
            return Ok(true);
        }
        self.dir_exists(path).await
    }

    async fn is_directory(&self, path: &str) -> StorageResult<bool> {
        if self.head_file(path).await?.is_some() {
            return Ok(false);
        }
        self.dir_exists(path).await
    }

    async fn upload_start(&self, path: &str) -> StorageResult<UploadSession> {
        if paths::is_root(path) || paths::is_directory_path(path) {
            return Err(StorageError::invalid(format!("upload target {} is not a file path", path)));
        }
        self.check_free(path).await?;
        let key = file_key(path);
        let upload_id = self.store.create_multipart(&key).await.map_err(|e| self.unavailable(e))?;
        debug!(target: "drivegate::transfer", "multipart start {} id={}", key, upload_id);
        Ok(UploadSession::new(&self.drive.id, path, upload_id, self.min_part_size))
    }

    async fn upload_part(&self, session: &mut UploadSession, bytes: &[u8], part_number: u32) -> StorageResult<()> {
        UploadSession::check_part_number(part_number)?;
        let etag = self
            .store
            .upload_part(&file_key(&session.path), &session.upload_id, part_number, bytes.to_vec())
            .await
            .map_err(|e| self.unavailable(e))?;
        session.record_part(part_number, bytes.len() as u64, etag)
    }

    async fn upload_complete(&self, session: UploadSession) -> StorageResult<DriveItem> {
        let key = file_key(&session.path);
        let committed = if session.parts.is_empty() {
            self.store.abort_multipart(&key, &session.upload_id).await.map_err(|e| self.unavailable(e))?;
            self.store.put(&key, Vec::new(), None).await.map_err(|e| self.unavailable(e))
        } else {
            match session.validate_sizes() {
                Ok(()) => self
                    .store
                    .complete_multipart(&key, &session.upload_id, &session.ordered_parts())
                    .await
                    .map_err(|e| self.unavailable(e)),
                Err(e) => Err(e),
            }
        };
        let meta = match committed {
            Ok(meta) => meta,
            Err(e) => {
                if let Err(abort_err) = self.store.abort_multipart(&key, &session.upload_id).await {
                    warn!(target: "drivegate::transfer", "abort after failed commit of {} failed: {:#}", key, abort_err);
                }
                return Err(e);
            }
        };
        self.clear_ancestor_placeholders(&session.path).await?;
        debug!(target: "drivegate::transfer", "multipart complete {} parts={} bytes={}", key, session.parts.len(), meta.size);
        Ok(meta.to_item())
    }

    async fn upload_abort(&self, session: UploadSession) -> StorageResult<()> {
        self.store
            .abort_multipart(&file_key(&session.path), &session.upload_id)
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn download_start(&self, path: &str) -> StorageResult<DownloadSession> {
        let Some(meta) = self.head_file(path).await? else {
            if self.dir_exists(path).await? {
                return Err(StorageError::invalid(format!("{} is a directory", paths::to_directory(path))));
            }
            return Err(StorageError::not_found(paths::to_file(path)));
        };
        let mut session = DownloadSession::new(&self.drive.id, path, meta.key.clone(), meta.size);
        session.modified_at = meta.modified_at;
        session.etag = meta.etag;
        Ok(session)
    }

    async fn download_bytes(&self, session: &DownloadSession, offset: u64, count: usize) -> StorageResult<Vec<u8>> {
        let key = file_key(&session.path);
        if session.handle != key {
            return Err(StorageError::invalid(format!(
                "download session {} reads '{}' but was opened for {}",
                session.id, session.handle, session.path
            )));
        }
        let Some((offset, count)) = session.clamp(offset, count) else {
            return Ok(Vec::new());
        };
        self.store.get_range(&key, offset, count).await.map_err(|e| self.unavailable(e))
    }

    async fn download_complete(&self, session: DownloadSession) -> StorageResult<()> {
        crate::tprintln!("download session {} for {} released", session.id, session.path);
        Ok(())
    }

    async fn get_input_stream(&self, path: &str) -> StorageResult<ByteStream> {
        let session = self.download_start(path).await?;
        let bytes = self.download_bytes(&session, 0, session.length as usize).await?;
        self.download_complete(session).await?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    fn external_location_uri(&self, path: &str) -> String {
        self.store.external_uri(&paths::to_object_key(path))
    }

    fn tiering(&self) -> Option<&dyn TieringProvider> {
        if self.classes.is_empty() { None } else { Some(self) }
    }
}

#[async_trait]
impl<S: ObjectStore> TieringProvider for ObjectStoreProvider<S> {
    fn storage_classes(&self) -> Vec<StorageClass> {
        self.classes.clone()
    }

    async fn update_storage_class(&self, path: &str, class_id: &str) -> StorageResult<DriveItem> {
        let class = tiering::find_class(&self.classes, class_id)?;
        let Some(meta) = self.head_file(path).await? else {
            if self.dir_exists(path).await? {
                return Err(StorageError::invalid("storage classes apply to files only"));
            }
            return Err(StorageError::not_found(paths::to_file(path)));
        };
        // Stores have no in-place class change: copy the object onto itself
        let updated = self
            .store
            .copy_object(&meta.key, &meta.key, Some(&class.class_id))
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(updated.to_item())
    }

    async fn restore(&self, path: &str, days: u32) -> StorageResult<RestoreSummary> {
        tiering::check_days(days, self.store.requires_days_to_expire())?;
        if let Some(meta) = self.head_file(path).await? {
            return self.collect_restore(vec![meta.to_item()], days).await;
        }
        if !self.dir_exists(path).await? {
            return Err(StorageError::not_found(paths::normalize(path)));
        }
        let items = self
            .list_all(&dir_key(path))
            .await?
            .iter()
            .filter(|m| !paths::is_directory_path(&m.key))
            .map(ObjectMeta::to_item)
            .collect();
        self.collect_restore(items, days).await
    }

    fn requires_days_to_expire(&self) -> bool {
        self.store.requires_days_to_expire()
    }
}
