//! Storage provider contract.
//!
//! Every backend implements `StorageProvider`. Tiering/restore is a separate capability
//! (`TieringProvider`) a backend exposes through `tiering()`; callers select it by
//! inspection instead of relying on a class hierarchy.
//!
//! Transfer state never lives on the provider: `upload_start`/`download_start` return
//! a session value the caller owns and threads through the following calls.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::{DirectoryReport, StorageResult};

use super::paths;
use super::tiering::RestoreSummary;
use super::transfer::{DownloadSession, UploadSession};
use super::types::{Drive, DriveItem, Query, StorageClass};

pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// The drive this provider instance was built for.
    fn drive(&self) -> &Drive;

    /// Named drive properties this backend needs.
    fn required_property_keys(&self) -> Vec<&'static str>;

    async fn test_connection(&self) -> StorageResult<()>;

    /// Raw, unfiltered query result (no security filtering).
    async fn find(&self, query: &Query) -> StorageResult<Vec<DriveItem>>;

    async fn get_drive_item(&self, path: &str) -> StorageResult<DriveItem>;

    /// Copy an item's content to a local file.
    async fn download(&self, path: &str, local: &Path) -> StorageResult<()>;

    /// Store a local file at `path`, replacing an existing file.
    async fn upload(&self, path: &str, local: &Path) -> StorageResult<DriveItem>;

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport>;

    async fn rename(&self, src: &str, dst: &str) -> StorageResult<DirectoryReport>;

    /// Delete a file or a whole directory.
    async fn delete(&self, path: &str) -> StorageResult<DirectoryReport> {
        if self.is_directory(path).await? {
            self.delete_directory(path).await
        } else {
            self.delete_file(path).await?;
            let mut rep = DirectoryReport::default();
            rep.record_ok(paths::to_file(path));
            Ok(rep)
        }
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()>;

    async fn delete_directory(&self, path: &str) -> StorageResult<DirectoryReport>;

    async fn mkdir(&self, path: &str) -> StorageResult<DriveItem>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    async fn is_directory(&self, path: &str) -> StorageResult<bool>;

    fn normalize_path(&self, path: &str) -> String {
        paths::normalize(path)
    }

    // ---- chunked upload -------------------------------------------------------

    async fn upload_start(&self, path: &str) -> StorageResult<UploadSession>;

    async fn upload_part(&self, session: &mut UploadSession, bytes: &[u8], part_number: u32) -> StorageResult<()>;

    /// Commit parts in ascending part number order; zero parts yields an empty file.
    async fn upload_complete(&self, session: UploadSession) -> StorageResult<DriveItem>;

    async fn upload_abort(&self, session: UploadSession) -> StorageResult<()>;

    // ---- chunked download -----------------------------------------------------

    async fn download_start(&self, path: &str) -> StorageResult<DownloadSession>;

    /// Up to `count` bytes from `offset`; short at end of data, empty past it.
    async fn download_bytes(&self, session: &DownloadSession, offset: u64, count: usize) -> StorageResult<Vec<u8>>;

    async fn download_complete(&self, session: DownloadSession) -> StorageResult<()>;

    async fn get_input_stream(&self, path: &str) -> StorageResult<ByteStream>;

    /// Address of `path` in the backend's own scheme, for external systems.
    fn external_location_uri(&self, path: &str) -> String;

    /// Tiering/restore capability, when the backend has one.
    fn tiering(&self) -> Option<&dyn TieringProvider> {
        None
    }

    fn storage_classes(&self) -> Vec<StorageClass> {
        self.tiering().map(|t| t.storage_classes()).unwrap_or_default()
    }
}

#[async_trait]
pub trait TieringProvider: Send + Sync {
    /// Fixed, backend-specific catalogue; exactly one entry is the default.
    fn storage_classes(&self) -> Vec<StorageClass>;

    /// Rewrite the item in place with the target class attached.
    async fn update_storage_class(&self, path: &str, class_id: &str) -> StorageResult<DriveItem>;

    /// Request asynchronous rehydration; returns without waiting for it.
    async fn restore(&self, path: &str, days: u32) -> StorageResult<RestoreSummary>;

    /// Whether `restore` needs a positive number of days.
    fn requires_days_to_expire(&self) -> bool;
}
