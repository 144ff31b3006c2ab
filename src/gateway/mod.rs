//! Backend-agnostic storage gateway: path model, provider contract, query engine,
//! directory emulation, chunked transfer, tiering and the security evaluator.

pub mod paths;
pub mod types;
pub mod config;
pub mod security;
pub mod provider;
pub mod query;
pub mod directory;
pub mod transfer;
pub mod tiering;
pub mod backends;
pub mod registry;
pub mod ops;

// Re-export the common surface
pub use config::{DriveConfig, EffectiveConfig, GatewayConfig, GlobalGatewayConfig};
pub use types::{BackendType, Drive, DriveItem, DriveProperty, Principal, Query, StorageClass};
pub use security::{applies, assert_access, can_access, is_granted, AccessLevel, SecurityRule};
pub use provider::{ByteStream, StorageProvider, TieringProvider};
pub use query::{reconcile, RawEntry, RawKind};
pub use directory::{ObjectListing, ObjectMeta, ObjectStore, ObjectStoreProvider};
pub use transfer::{preview_lines, DownloadSession, Preview, PreviewOptions, RangeSource, UploadSession};
pub use tiering::RestoreSummary;
pub use backends::{LocalFsProvider, MemoryObjectStore};
pub use registry::{DriveRegistry, ProviderFactory};
pub use ops::Gateway;
