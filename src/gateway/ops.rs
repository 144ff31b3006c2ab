//! Gateway facade: every storage operation, gated by the security evaluator.
//!
//! Levels: Read for listing/stat/download/preview, Create for upload/mkdir, Modify for
//! copy/rename/class changes (plus Archive when moving into a restore-requiring
//! class), Delete for deletes and Restore for restores.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{DirectoryReport, StorageError, StorageResult};

use super::config::{EffectiveConfig, GatewayConfig};
use super::paths;
use super::provider::{ByteStream, StorageProvider, TieringProvider};
use super::query;
use super::registry::DriveRegistry;
use super::security::{self, AccessLevel};
use super::tiering::{self, RestoreSummary};
use super::transfer::{self, DownloadSession, Preview, PreviewOptions, UploadSession};
use super::types::{Drive, DriveItem, Principal, Query, StorageClass};

/// A drive resolved for one call.
struct Bound {
    drive: Drive,
    eff: EffectiveConfig,
    provider: Arc<dyn StorageProvider>,
}

impl Bound {
    fn gate(&self, principal: &Principal, path: &str, level: AccessLevel) -> StorageResult<()> {
        security::assert_access(&self.eff, &self.drive, principal, path, level)
    }

    fn can(&self, principal: &Principal, path: &str, level: AccessLevel) -> bool {
        security::can_access(&self.eff, &self.drive, principal, path, level)
    }

    fn tiering(&self) -> StorageResult<&dyn TieringProvider> {
        self.provider
            .tiering()
            .ok_or_else(|| StorageError::unsupported(format!("drive '{}' has no storage tiers", self.drive.id)))
    }
}

pub struct Gateway {
    registry: Arc<DriveRegistry>,
}

impl Gateway {
    pub fn new(registry: DriveRegistry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    pub fn from_config(cfg: GatewayConfig) -> StorageResult<Self> {
        Ok(Self::new(DriveRegistry::from_config(cfg)?))
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    fn bind(&self, drive_id: &str) -> StorageResult<Bound> {
        let drive = self.registry.drive(drive_id)?;
        let provider = self.registry.provider(drive_id)?;
        let eff = self.registry.effective(&drive);
        Ok(Bound { drive, eff, provider })
    }

    pub async fn test_connection(&self, drive_id: &str) -> StorageResult<()> {
        self.bind(drive_id)?.provider.test_connection().await
    }

    pub fn required_property_keys(&self, drive_id: &str) -> StorageResult<Vec<&'static str>> {
        Ok(self.bind(drive_id)?.provider.required_property_keys())
    }

    // ---- query --------------------------------------------------------------

    /// Run a query; items the principal may not read are dropped.
    pub async fn find(&self, principal: &Principal, query: &Query) -> StorageResult<Vec<DriveItem>> {
        let b = self.bind(&query.drive_id)?;
        b.gate(principal, &query.start_path, AccessLevel::Read)?;
        let raw = b.provider.find(query).await?;
        let total = raw.len();
        let items = query::retain_readable(raw, |p| b.can(principal, p, AccessLevel::Read));
        tracing::debug!(target: "drivegate::ops", "find {}:{} -> {} of {} readable", b.drive.id, query.start_path, items.len(), total);
        Ok(items)
    }

    /// Direct children of a directory.
    pub async fn list(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<Vec<DriveItem>> {
        self.find(principal, &Query::new(drive_id, path)).await
    }

    pub async fn stat(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<DriveItem> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.get_drive_item(path).await
    }

    pub async fn exists(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<bool> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.exists(path).await
    }

    pub async fn is_directory(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<bool> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.is_directory(path).await
    }

    // ---- whole-file transfer -----------------------------------------------

    pub async fn download(&self, principal: &Principal, drive_id: &str, path: &str, local: &Path) -> StorageResult<()> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.download(path, local).await
    }

    pub async fn upload(&self, principal: &Principal, drive_id: &str, path: &str, local: &Path) -> StorageResult<DriveItem> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Create)?;
        let item = b.provider.upload(path, local).await?;
        info!(target: "drivegate::ops", "upload {}:{} ({} bytes) by {}", b.drive.id, item.path, item.size_bytes, principal.id);
        Ok(item)
    }

    pub async fn get_input_stream(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<ByteStream> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.get_input_stream(path).await
    }

    pub fn external_location_uri(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<String> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        Ok(b.provider.external_location_uri(path))
    }

    // ---- structure ------------------------------------------------------------

    pub async fn mkdir(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<DriveItem> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Create)?;
        let item = b.provider.mkdir(path).await?;
        info!(target: "drivegate::ops", "mkdir {}:{} by {}", b.drive.id, item.path, principal.id);
        Ok(item)
    }

    pub async fn copy(&self, principal: &Principal, drive_id: &str, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        let b = self.bind(drive_id)?;
        b.gate(principal, src, AccessLevel::Modify)?;
        b.gate(principal, dst, AccessLevel::Modify)?;
        let report = b.provider.copy(src, dst).await?;
        info!(target: "drivegate::ops", "copy {}:{} -> {} ({} items) by {}", b.drive.id, paths::normalize(src), paths::normalize(dst), report.completed.len(), principal.id);
        Ok(report)
    }

    pub async fn rename(&self, principal: &Principal, drive_id: &str, src: &str, dst: &str) -> StorageResult<DirectoryReport> {
        let b = self.bind(drive_id)?;
        b.gate(principal, src, AccessLevel::Modify)?;
        b.gate(principal, dst, AccessLevel::Modify)?;
        let report = b.provider.rename(src, dst).await?;
        info!(target: "drivegate::ops", "rename {}:{} -> {} ({} items) by {}", b.drive.id, paths::normalize(src), paths::normalize(dst), report.completed.len(), principal.id);
        Ok(report)
    }

    pub async fn delete(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<DirectoryReport> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Delete)?;
        let report = b.provider.delete(path).await?;
        info!(target: "drivegate::ops", "delete {}:{} ({} items) by {}", b.drive.id, paths::normalize(path), report.completed.len(), principal.id);
        Ok(report)
    }

    pub async fn delete_file(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<()> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Delete)?;
        b.provider.delete_file(path).await?;
        info!(target: "drivegate::ops", "delete file {}:{} by {}", b.drive.id, paths::to_file(path), principal.id);
        Ok(())
    }

    pub async fn delete_directory(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<DirectoryReport> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Delete)?;
        let report = b.provider.delete_directory(path).await?;
        info!(target: "drivegate::ops", "delete dir {}:{} ({} items) by {}", b.drive.id, paths::to_directory(path), report.completed.len(), principal.id);
        Ok(report)
    }

    // ---- chunked transfer -----------------------------------------------------

    pub async fn upload_start(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<UploadSession> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Create)?;
        b.provider.upload_start(path).await
    }

    pub async fn upload_part(&self, principal: &Principal, session: &mut UploadSession, bytes: &[u8], part_number: u32) -> StorageResult<()> {
        let b = self.bind(&session.drive_id)?;
        b.gate(principal, &session.path, AccessLevel::Create)?;
        b.provider.upload_part(session, bytes, part_number).await
    }

    pub async fn upload_complete(&self, principal: &Principal, session: UploadSession) -> StorageResult<DriveItem> {
        let b = self.bind(&session.drive_id)?;
        b.gate(principal, &session.path, AccessLevel::Create)?;
        let parts = session.parts.len();
        let item = b.provider.upload_complete(session).await?;
        info!(target: "drivegate::ops", "chunked upload {}:{} ({} parts, {} bytes) by {}", b.drive.id, item.path, parts, item.size_bytes, principal.id);
        Ok(item)
    }

    pub async fn upload_abort(&self, principal: &Principal, session: UploadSession) -> StorageResult<()> {
        let b = self.bind(&session.drive_id)?;
        b.gate(principal, &session.path, AccessLevel::Create)?;
        b.provider.upload_abort(session).await
    }

    pub async fn download_start(&self, principal: &Principal, drive_id: &str, path: &str) -> StorageResult<DownloadSession> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        b.provider.download_start(path).await
    }

    pub async fn download_bytes(&self, principal: &Principal, session: &DownloadSession, offset: u64, count: usize) -> StorageResult<Vec<u8>> {
        let b = self.bind(&session.drive_id)?;
        b.gate(principal, &session.path, AccessLevel::Read)?;
        b.provider.download_bytes(session, offset, count).await
    }

    pub async fn download_complete(&self, session: DownloadSession) -> StorageResult<()> {
        let b = self.bind(&session.drive_id)?;
        b.provider.download_complete(session).await
    }

    /// First `n` lines of a file, read through ranged downloads.
    pub async fn preview_lines(&self, principal: &Principal, drive_id: &str, path: &str, n: usize) -> StorageResult<Preview> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Read)?;
        let opts = PreviewOptions::from_config(&b.eff);
        transfer::preview_path(b.provider.as_ref(), path, n, &opts).await
    }

    // ---- tiering --------------------------------------------------------------

    /// Class catalogue of a drive; empty when the backend has no tiers.
    pub fn storage_classes(&self, drive_id: &str) -> StorageResult<Vec<StorageClass>> {
        Ok(self.bind(drive_id)?.provider.storage_classes())
    }

    pub fn requires_days_to_expire(&self, drive_id: &str) -> StorageResult<bool> {
        let b = self.bind(drive_id)?;
        Ok(b.provider.tiering().map(|t| t.requires_days_to_expire()).unwrap_or(false))
    }

    pub async fn update_storage_class(&self, principal: &Principal, drive_id: &str, path: &str, class_id: &str) -> StorageResult<DriveItem> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Modify)?;
        let tier = b.tiering()?;
        let classes = tier.storage_classes();
        let class = tiering::find_class(&classes, class_id)?;
        if class.requires_restore {
            b.gate(principal, path, AccessLevel::Archive)?;
        }
        let item = tier.update_storage_class(path, &class.class_id).await?;
        info!(target: "drivegate::ops", "storage class {}:{} -> {} by {}", b.drive.id, item.path, class.class_id, principal.id);
        Ok(item)
    }

    pub async fn restore(&self, principal: &Principal, drive_id: &str, path: &str, days: u32) -> StorageResult<RestoreSummary> {
        let b = self.bind(drive_id)?;
        b.gate(principal, path, AccessLevel::Restore)?;
        let summary = b.tiering()?.restore(path, days).await?;
        info!(
            target: "drivegate::ops",
            "restore {}:{} for {} days: {} requested, {} skipped by {}",
            b.drive.id, paths::normalize(path), days, summary.requested.len(), summary.skipped.len(), principal.id
        );
        Ok(summary)
    }
}
