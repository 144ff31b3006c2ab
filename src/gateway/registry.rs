//! Drive registry: drive definitions, one provider factory per backend type, and
//! the providers built from them.
//!
//! Providers are created lazily on first use and then shared read-only across calls.
//! Third-party drivers plug in through `register_factory`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

use super::backends::{LocalFsProvider, MemoryObjectStore};
use super::config::{EffectiveConfig, GatewayConfig, GlobalGatewayConfig};
use super::directory::ObjectStoreProvider;
use super::provider::StorageProvider;
use super::types::{BackendType, Drive};

/// Builds providers for one backend type.
pub trait ProviderFactory: Send + Sync {
    /// Drive properties that must be present before `build` is attempted.
    fn required_property_keys(&self) -> Vec<&'static str>;

    fn build(&self, drive: &Drive, eff: &EffectiveConfig) -> StorageResult<Arc<dyn StorageProvider>>;
}

/// In-memory buckets, shared by every drive that names the same bucket.
#[derive(Default)]
pub struct MemoryFactory {
    buckets: RwLock<HashMap<String, MemoryObjectStore>>,
}

impl MemoryFactory {
    pub const BUCKET: &'static str = "bucket";
    pub const MIN_PART_SIZE: &'static str = "minPartSize";

    /// Handle on an existing bucket.
    pub fn bucket(&self, name: &str) -> Option<MemoryObjectStore> {
        self.buckets.read().get(name).cloned()
    }
}

impl ProviderFactory for MemoryFactory {
    fn required_property_keys(&self) -> Vec<&'static str> {
        vec![Self::BUCKET]
    }

    fn build(&self, drive: &Drive, eff: &EffectiveConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        let bucket = drive.property(Self::BUCKET).unwrap_or_default();
        let min_part = match drive.property(Self::MIN_PART_SIZE) {
            Some(v) => Some(v.trim().parse::<u64>().map_err(|e| {
                StorageError::invalid(format!("drive '{}': {} '{}' is not a byte count: {}", drive.id, Self::MIN_PART_SIZE, v, e))
            })?),
            None => None,
        };
        let store = self
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_insert_with(|| match min_part {
                Some(n) => MemoryObjectStore::with_min_part_size(bucket, n),
                None => MemoryObjectStore::new(bucket),
            })
            .clone();
        Ok(Arc::new(ObjectStoreProvider::new(drive.clone(), store, eff.min_part_size)?))
    }
}

pub struct LocalFsFactory;

impl ProviderFactory for LocalFsFactory {
    fn required_property_keys(&self) -> Vec<&'static str> {
        vec![super::backends::local::ROOT_PROPERTY]
    }

    fn build(&self, drive: &Drive, _eff: &EffectiveConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        Ok(Arc::new(LocalFsProvider::new(drive.clone())?))
    }
}

pub struct DriveRegistry {
    global: GlobalGatewayConfig,
    drives: RwLock<BTreeMap<String, Drive>>,
    factories: RwLock<HashMap<BackendType, Arc<dyn ProviderFactory>>>,
    providers: RwLock<HashMap<String, Arc<dyn StorageProvider>>>,
    memory: Arc<MemoryFactory>,
}

impl DriveRegistry {
    /// Empty registry with the built-in memory and local filesystem drivers.
    pub fn new(global: GlobalGatewayConfig) -> Self {
        let memory = Arc::new(MemoryFactory::default());
        let mut factories: HashMap<BackendType, Arc<dyn ProviderFactory>> = HashMap::new();
        factories.insert(BackendType::Memory, memory.clone());
        factories.insert(BackendType::LocalFilesystem, Arc::new(LocalFsFactory));
        Self {
            global,
            drives: RwLock::new(BTreeMap::new()),
            factories: RwLock::new(factories),
            providers: RwLock::new(HashMap::new()),
            memory,
        }
    }

    pub fn from_config(cfg: GatewayConfig) -> StorageResult<Self> {
        cfg.validate().map_err(|e| StorageError::invalid(format!("{:#}", e)))?;
        let reg = Self::new(cfg.global);
        for d in cfg.drives {
            reg.add_drive(d)?;
        }
        Ok(reg)
    }

    pub fn global(&self) -> &GlobalGatewayConfig {
        &self.global
    }

    pub fn effective(&self, drive: &Drive) -> EffectiveConfig {
        EffectiveConfig::from_layers(&self.global, &drive.config)
    }

    /// The built-in memory driver, for inspecting buckets.
    pub fn memory(&self) -> &MemoryFactory {
        &self.memory
    }

    pub fn register_factory(&self, backend: BackendType, factory: Arc<dyn ProviderFactory>) {
        info!(target: "drivegate::registry", "driver registered for {:?}", backend);
        self.factories.write().insert(backend, factory);
    }

    pub fn add_drive(&self, drive: Drive) -> StorageResult<()> {
        if drive.id.trim().is_empty() {
            return Err(StorageError::invalid("drive id cannot be empty"));
        }
        let mut drives = self.drives.write();
        if drives.contains_key(&drive.id) {
            return Err(StorageError::already_exists(format!("drive:{}", drive.id)));
        }
        debug!(target: "drivegate::registry", "drive '{}' added ({:?})", drive.id, drive.backend_type);
        drives.insert(drive.id.clone(), drive);
        Ok(())
    }

    /// Replace a drive definition; its cached provider is dropped.
    pub fn update_drive(&self, drive: Drive) -> StorageResult<()> {
        let mut drives = self.drives.write();
        if !drives.contains_key(&drive.id) {
            return Err(StorageError::backend(drive.id.clone(), anyhow::anyhow!("unknown drive '{}'", drive.id)));
        }
        self.providers.write().remove(&drive.id);
        drives.insert(drive.id.clone(), drive);
        Ok(())
    }

    pub fn remove_drive(&self, id: &str) -> Option<Drive> {
        self.providers.write().remove(id);
        self.drives.write().remove(id)
    }

    pub fn drive(&self, id: &str) -> StorageResult<Drive> {
        self.drives
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::backend(id, anyhow::anyhow!("unknown drive '{}'", id)))
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.drives.read().values().cloned().collect()
    }

    /// Register a drive together with an already built provider.
    pub fn insert_provider(&self, provider: Arc<dyn StorageProvider>) -> StorageResult<()> {
        let drive = provider.drive().clone();
        let id = drive.id.clone();
        self.add_drive(drive)?;
        self.providers.write().insert(id, provider);
        Ok(())
    }

    /// Provider for a drive, built on first use.
    pub fn provider(&self, id: &str) -> StorageResult<Arc<dyn StorageProvider>> {
        if let Some(p) = self.providers.read().get(id) {
            return Ok(p.clone());
        }
        let drive = self.drive(id)?;
        let factory = self.factories.read().get(&drive.backend_type).cloned().ok_or_else(|| {
            StorageError::backend(id, anyhow::anyhow!("no driver registered for backend {:?}", drive.backend_type))
        })?;
        let missing: Vec<&str> = factory
            .required_property_keys()
            .into_iter()
            .filter(|k| drive.property(k).map(|v| v.trim().is_empty()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::invalid(format!("drive '{}' is missing required properties: {}", id, missing.join(", "))));
        }

        let built = factory.build(&drive, &self.effective(&drive))?;
        let mut providers = self.providers.write();
        // A concurrent caller may have won the race; keep the first instance
        let provider = providers.entry(id.to_string()).or_insert(built).clone();
        info!(target: "drivegate::registry", "provider ready for drive '{}' ({:?})", id, drive.backend_type);
        Ok(provider)
    }
}

#[cfg(test)]
mod registry_tests;
