//! Chunked transfer protocol: caller-held upload/download sessions and line preview.
//!
//! A session is a plain value returned by `upload_start`/`download_start`. Providers
//! keep no per-transfer state, so concurrent transfers against one drive never share
//! a part list.
//!
//! Preview is built only on ranged reads. It walks fixed-size windows from offset 0,
//! splitting on CR, LF or CRLF (one terminator, even when the pair straddles two
//! windows), and stops once `n` lines are collected, data ends, or the scan ceiling
//! is hit.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

use super::config::{EffectiveConfig, GlobalGatewayConfig};
use super::paths;
use super::provider::StorageProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub part_number: u32,
    pub size: u64,
    /// Backend receipt for the part (object-store etag, staging file name).
    pub etag: String,
}

/// In-progress chunked upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub drive_id: String,
    pub path: String,
    /// Backend handle: multipart upload id or staging id.
    pub upload_id: String,
    pub parts: BTreeMap<u32, UploadedPart>,
    /// Minimum size of every part but the last; 0 means no minimum.
    pub min_part_size: u64,
    pub started_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(drive_id: &str, path: &str, upload_id: String, min_part_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            drive_id: drive_id.to_string(),
            path: paths::to_file(path),
            upload_id,
            parts: BTreeMap::new(),
            min_part_size,
            started_at: Utc::now(),
        }
    }

    /// Record an uploaded part. Re-sending a part number replaces the earlier one.
    pub fn record_part(&mut self, part_number: u32, size: u64, etag: String) -> StorageResult<()> {
        if part_number == 0 {
            return Err(StorageError::invalid("part numbers start at 1"));
        }
        self.parts.insert(part_number, UploadedPart { part_number, size, etag });
        Ok(())
    }

    /// Reject a part number before any bytes are sent for it.
    pub fn check_part_number(part_number: u32) -> StorageResult<()> {
        if part_number == 0 { Err(StorageError::invalid("part numbers start at 1")) } else { Ok(()) }
    }

    pub fn bytes_received(&self) -> u64 {
        self.parts.values().map(|p| p.size).sum()
    }

    /// (part number, etag) in ascending part order.
    pub fn ordered_parts(&self) -> Vec<(u32, String)> {
        self.parts.values().map(|p| (p.part_number, p.etag.clone())).collect()
    }

    /// Every part except the highest-numbered one must meet the minimum size.
    pub fn validate_sizes(&self) -> StorageResult<()> {
        let last = self.parts.keys().next_back().copied();
        for p in self.parts.values() {
            if Some(p.part_number) != last && p.size < self.min_part_size {
                return Err(StorageError::invalid(format!(
                    "part {} of {} is {} bytes, below the minimum of {}",
                    p.part_number, self.path, p.size, self.min_part_size
                )));
            }
        }
        Ok(())
    }
}

/// In-progress chunked download. Length and metadata are fixed at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub id: Uuid,
    pub drive_id: String,
    pub path: String,
    /// Backend handle: object key or native path.
    pub handle: String,
    pub length: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl DownloadSession {
    pub fn new(drive_id: &str, path: &str, handle: String, length: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            drive_id: drive_id.to_string(),
            path: paths::to_file(path),
            handle,
            length,
            modified_at: None,
            etag: None,
        }
    }

    /// Clamp a read to the session length. None when `offset` is at or past the end.
    pub fn clamp(&self, offset: u64, count: usize) -> Option<(u64, usize)> {
        if offset >= self.length || count == 0 {
            return None;
        }
        let avail = self.length - offset;
        let n = (count as u64).min(avail) as usize;
        Some((offset, n))
    }
}

/// Anything that can serve byte ranges; a short read means end of data.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn read_range(&self, offset: u64, count: usize) -> StorageResult<Vec<u8>>;
}

/// Range reads through a provider's download session.
pub struct SessionSource<'a> {
    pub provider: &'a dyn StorageProvider,
    pub session: &'a DownloadSession,
}

#[async_trait]
impl RangeSource for SessionSource<'_> {
    async fn read_range(&self, offset: u64, count: usize) -> StorageResult<Vec<u8>> {
        self.provider.download_bytes(self.session, offset, count).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOptions {
    pub window_bytes: u64,
    pub max_scan_bytes: u64,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl PreviewOptions {
    pub fn from_config(eff: &EffectiveConfig) -> Self {
        Self {
            window_bytes: eff.preview_window_bytes.max(1),
            max_scan_bytes: eff.preview_max_scan_bytes,
            retry_attempts: eff.preview_retry_attempts.max(1),
            retry_delay: Duration::from_millis(eff.preview_retry_delay_ms),
        }
    }
}

impl Default for PreviewOptions {
    fn default() -> Self {
        let g = GlobalGatewayConfig::default();
        Self {
            window_bytes: g.preview_window_bytes,
            max_scan_bytes: g.preview_max_scan_bytes,
            retry_attempts: g.preview_retry_attempts,
            retry_delay: Duration::from_millis(g.preview_retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub lines: Vec<String>,
    pub bytes_scanned: u64,
    /// True when the whole content was consumed.
    pub reached_end: bool,
}

#[derive(Default)]
struct LineSplitter {
    lines: Vec<String>,
    current: Vec<u8>,
    pending_cr: bool,
}

impl LineSplitter {
    /// Feed bytes until `want` lines exist; returns how many bytes were consumed.
    fn feed(&mut self, bytes: &[u8], want: usize) -> usize {
        for (i, &b) in bytes.iter().enumerate() {
            if self.lines.len() >= want {
                return i;
            }
            if std::mem::take(&mut self.pending_cr) && b == b'\n' {
                continue;
            }
            match b {
                b'\r' => { self.finish_line(); self.pending_cr = true; }
                b'\n' => self.finish_line(),
                _ => self.current.push(b),
            }
        }
        bytes.len()
    }

    fn finish_line(&mut self) {
        let raw = std::mem::take(&mut self.current);
        self.lines.push(String::from_utf8_lossy(&raw).into_owned());
    }

    /// An unterminated final line still counts.
    fn finish(mut self, want: usize) -> Vec<String> {
        if !self.current.is_empty() && self.lines.len() < want {
            self.finish_line();
        }
        self.lines
    }
}

fn is_transient(err: &StorageError) -> bool {
    matches!(err, StorageError::BackendUnavailable { .. })
}

async fn read_with_retry<R>(source: &R, offset: u64, count: usize, opts: &PreviewOptions) -> StorageResult<Vec<u8>>
where
    R: RangeSource + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match source.read_range(offset, count).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if !is_transient(&e) => return Err(e),
            Err(e) if attempt >= opts.retry_attempts => {
                return Err(StorageError::RetryExhausted { attempts: attempt, source: Box::new(e) });
            }
            Err(e) => {
                warn!(target: "drivegate::transfer", "preview read at {} failed (attempt {}/{}): {}", offset, attempt, opts.retry_attempts, e);
                tokio::time::sleep(opts.retry_delay).await;
            }
        }
    }
}

/// First `n` lines of a byte source.
pub async fn preview_lines<R>(source: &R, n: usize, opts: &PreviewOptions) -> StorageResult<Preview>
where
    R: RangeSource + ?Sized,
{
    if n == 0 {
        return Ok(Preview::default());
    }
    let window = opts.window_bytes.max(1);
    let mut splitter = LineSplitter::default();
    let mut offset = 0u64;
    let mut reached_end = false;

    while splitter.lines.len() < n {
        if offset >= opts.max_scan_bytes {
            // Ceiling reached: only fine if nothing is left to read
            let probe = read_with_retry(source, offset, 1, opts).await?;
            if probe.is_empty() {
                reached_end = true;
                break;
            }
            return Err(StorageError::PreviewTooLarge { scanned: offset, limit: opts.max_scan_bytes });
        }
        let count = window.min(opts.max_scan_bytes - offset) as usize;
        let chunk = read_with_retry(source, offset, count, opts).await?;
        let used = splitter.feed(&chunk, n);
        offset += used as u64;
        if chunk.len() < count {
            reached_end = used == chunk.len();
            break;
        }
    }

    let lines = splitter.finish(n);
    debug!(target: "drivegate::transfer", "preview lines={} scanned={} end={}", lines.len(), offset, reached_end);
    Ok(Preview { lines, bytes_scanned: offset, reached_end })
}

/// Preview a stored file through a download session; the session is always released.
pub async fn preview_path(provider: &dyn StorageProvider, path: &str, n: usize, opts: &PreviewOptions) -> StorageResult<Preview> {
    let session = provider.download_start(path).await?;
    let result = preview_lines(&SessionSource { provider, session: &session }, n, opts).await;
    let released = provider.download_complete(session).await;
    let preview = result?;
    released?;
    Ok(preview)
}
