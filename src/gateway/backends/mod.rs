//! Reference backends: one flat object store, one hierarchical filesystem.

pub mod local;
pub mod memory;

pub use local::LocalFsProvider;
pub use memory::MemoryObjectStore;
