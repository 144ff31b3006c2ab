//! In-memory flat object store.
//!
//! Behaves like an S3 bucket: opaque keys, prefix/delimiter listing, server-side copy,
//! multipart uploads, an S3-style class catalogue and asynchronous restores. Clones
//! share the same bucket, so tests can keep a handle to drive failures and restores.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::gateway::directory::{ObjectListing, ObjectMeta, ObjectStore};
use crate::gateway::tiering;
use crate::gateway::types::StorageClass;

/// Stable etag for a byte slice; fixed-width lowercase hex.
pub fn etag_for_bytes(bytes: &[u8]) -> String {
    let h = xxh3_64(bytes);
    format!("{h:016x}")
}

/// Multipart etag: hash over the part count, each part etag in order and the total size.
pub fn etag_composite(part_etags: &[String], total_size: u64) -> String {
    let mut buf: Vec<u8> = Vec::with_capacity(8 + part_etags.len() * 16 + 8);
    buf.extend_from_slice(&(part_etags.len() as u64).to_le_bytes());
    for e in part_etags {
        buf.extend_from_slice(e.as_bytes());
    }
    buf.extend_from_slice(&total_size.to_le_bytes());
    format!("{:016x}-{}", xxh3_64(&buf), part_etags.len())
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified_at: DateTime<Utc>,
    etag: String,
    storage_class: Option<String>,
    is_restoring: bool,
    restore_expires_at: Option<DateTime<Utc>>,
}

impl StoredObject {
    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            modified_at: Some(self.modified_at),
            etag: Some(self.etag.clone()),
            storage_class: self.storage_class.clone(),
            is_restoring: self.is_restoring,
            restore_expires_at: self.restore_expires_at,
        }
    }
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (Vec<u8>, String)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    /// key -> requested restore days
    restores: HashMap<String, u32>,
    failure_filter: Option<String>,
    offline: bool,
}

#[derive(Debug, Default)]
struct Inner {
    bucket: String,
    min_part_size: Option<u64>,
    state: RwLock<State>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Inner>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self { inner: Arc::new(Inner { bucket: bucket.to_string(), min_part_size: None, state: RwLock::new(State::default()) }) }
    }

    pub fn with_min_part_size(bucket: &str, min_part_size: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                bucket: bucket.to_string(),
                min_part_size: Some(min_part_size),
                state: RwLock::new(State::default()),
            }),
        }
    }

    /// Fail every keyed operation whose key contains `needle`.
    pub fn set_failure_filter(&self, needle: Option<&str>) {
        self.inner.state.write().failure_filter = needle.map(str::to_string);
    }

    /// Simulate a connectivity loss for every call.
    pub fn set_offline(&self, offline: bool) {
        self.inner.state.write().offline = offline;
    }

    /// Finish every outstanding restore request.
    pub fn complete_pending_restores(&self) -> usize {
        let mut st = self.inner.state.write();
        let pending: Vec<(String, u32)> = st.restores.drain().collect();
        let now = Utc::now();
        for (key, days) in &pending {
            if let Some(obj) = st.objects.get_mut(key) {
                obj.is_restoring = false;
                obj.restore_expires_at = Some(now + Duration::days(i64::from(*days)));
            }
        }
        pending.len()
    }

    pub fn object_count(&self) -> usize {
        self.inner.state.read().objects.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.state.read().objects.keys().cloned().collect()
    }

    fn check(&self, st: &State, key: &str) -> Result<()> {
        if st.offline {
            bail!("bucket '{}' is unreachable", self.inner.bucket);
        }
        if let Some(needle) = &st.failure_filter {
            if key.contains(needle.as_str()) {
                bail!("injected failure for key '{}'", key);
            }
        }
        Ok(())
    }

    fn store_object(st: &mut State, key: &str, data: Vec<u8>, etag: String, class: Option<String>) -> ObjectMeta {
        let obj = StoredObject {
            data,
            modified_at: Utc::now(),
            etag,
            storage_class: class,
            is_restoring: false,
            restore_expires_at: None,
        };
        let meta = obj.meta(key);
        st.objects.insert(key.to_string(), obj);
        meta
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.inner.bucket
    }

    async fn ping(&self) -> Result<()> {
        let st = self.inner.state.read();
        self.check(&st, "")
    }

    async fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<ObjectListing> {
        let st = self.inner.state.read();
        self.check(&st, prefix)?;
        let mut listing = ObjectListing::default();
        for (key, obj) in st.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else { break };
            match delimiter.and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((d, i)) => {
                    let cp = format!("{}{}{}", prefix, &rest[..i], d);
                    if listing.common_prefixes.last() != Some(&cp) {
                        listing.common_prefixes.push(cp);
                    }
                }
                None => listing.objects.push(obj.meta(key)),
            }
        }
        Ok(listing)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let st = self.inner.state.read();
        self.check(&st, key)?;
        Ok(st.objects.get(key).map(|o| o.meta(key)))
    }

    async fn put(&self, key: &str, data: Vec<u8>, class: Option<&str>) -> Result<ObjectMeta> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        let etag = etag_for_bytes(&data);
        Ok(Self::store_object(&mut st, key, data, etag, class.map(str::to_string)))
    }

    async fn get_range(&self, key: &str, offset: u64, count: usize) -> Result<Vec<u8>> {
        let st = self.inner.state.read();
        self.check(&st, key)?;
        let obj = st.objects.get(key).ok_or_else(|| anyhow!("no such key '{}'", key))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(obj.data.len());
        let end = start.saturating_add(count).min(obj.data.len());
        Ok(obj.data[start..end].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        st.objects.remove(key);
        st.restores.remove(key);
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str, class: Option<&str>) -> Result<ObjectMeta> {
        let mut st = self.inner.state.write();
        self.check(&st, src)?;
        self.check(&st, dst)?;
        let source = st.objects.get(src).cloned().ok_or_else(|| anyhow!("no such key '{}'", src))?;
        let class = class.map(str::to_string).or(source.storage_class);
        Ok(Self::store_object(&mut st, dst, source.data, source.etag, class))
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        let id = Uuid::new_v4().to_string();
        st.uploads.insert(id.clone(), PendingUpload { key: key.to_string(), parts: BTreeMap::new() });
        Ok(id)
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Vec<u8>) -> Result<String> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        let upload = st.uploads.get_mut(upload_id).ok_or_else(|| anyhow!("no such upload '{}'", upload_id))?;
        if upload.key != key {
            bail!("upload '{}' belongs to '{}', not '{}'", upload_id, upload.key, key);
        }
        let etag = etag_for_bytes(&data);
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[(u32, String)]) -> Result<ObjectMeta> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        match st.uploads.get(upload_id) {
            None => bail!("no such upload '{}'", upload_id),
            Some(upload) if upload.key != key => {
                bail!("upload '{}' belongs to '{}', not '{}'", upload_id, upload.key, key)
            }
            Some(_) => {}
        }
        let upload = st.uploads.remove(upload_id).ok_or_else(|| anyhow!("no such upload '{}'", upload_id))?;
        let mut data = Vec::new();
        let mut etags = Vec::with_capacity(parts.len());
        for (n, etag) in parts {
            let (bytes, stored_etag) = upload.parts.get(n).ok_or_else(|| anyhow!("part {} was never uploaded", n))?;
            if stored_etag != etag {
                bail!("etag mismatch for part {}", n);
            }
            data.extend_from_slice(bytes);
            etags.push(etag.clone());
        }
        let etag = etag_composite(&etags, data.len() as u64);
        Ok(Self::store_object(&mut st, key, data, etag, None))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        if let Some(upload) = st.uploads.get(upload_id) {
            if upload.key != key {
                bail!("upload '{}' belongs to '{}', not '{}'", upload_id, upload.key, key);
            }
        }
        st.uploads.remove(upload_id);
        Ok(())
    }

    fn min_part_size(&self) -> Option<u64> {
        self.inner.min_part_size
    }

    fn storage_classes(&self) -> Vec<StorageClass> {
        tiering::object_store_classes()
    }

    async fn restore_object(&self, key: &str, days: u32) -> Result<()> {
        let mut st = self.inner.state.write();
        self.check(&st, key)?;
        let obj = st.objects.get_mut(key).ok_or_else(|| anyhow!("no such key '{}'", key))?;
        obj.is_restoring = true;
        st.restores.insert(key.to_string(), days);
        Ok(())
    }

    fn requires_days_to_expire(&self) -> bool {
        true
    }

    fn external_uri(&self, key: &str) -> String {
        format!("memory://{}/{}", self.inner.bucket, urlencoding::encode(key).replace("%2F", "/"))
    }
}

#[cfg(test)]
mod memory_tests;
