//! Unified storage error model and mapping helpers.
//! Every gateway operation returns `StorageResult<T>`; upstream transports (REST, WebDAV)
//! map the variants onto their own status codes with `http_status`.

use thiserror::Error;

use crate::gateway::security::AccessLevel;

/// Outcome of a multi-object directory operation (copy, rename, delete).
/// Operations are not transactional: `completed` lists what already landed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DirectoryReport {
    pub fn is_clean(&self) -> bool { self.failed.is_empty() }

    pub fn record_ok(&mut self, path: impl Into<String>) { self.completed.push(path.into()); }

    pub fn record_err(&mut self, path: impl Into<String>, err: &StorageError) {
        self.failed.push((path.into(), err.to_string()));
    }

    /// Ok when nothing failed, otherwise `PartialFailure` carrying the report.
    pub fn into_result(self) -> StorageResult<DirectoryReport> {
        if self.is_clean() { Ok(self) } else { Err(StorageError::PartialFailure(self)) }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("access denied: {level:?} on {path}")]
    AccessDenied { path: String, level: AccessLevel },

    #[error("backend unavailable for drive '{drive}': {source:#}")]
    BackendUnavailable {
        drive: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("partial failure: {} completed, {} failed", .0.completed.len(), .0.failed.len())]
    PartialFailure(DirectoryReport),

    #[error("preview scanned {scanned} bytes without finding the requested lines (limit {limit})")]
    PreviewTooLarge { scanned: u64, limit: u64 },

    #[error("read failed after {attempts} attempts: {source:#}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self { StorageError::NotFound { path: path.into() } }
    pub fn already_exists(path: impl Into<String>) -> Self { StorageError::AlreadyExists { path: path.into() } }
    pub fn denied(path: impl Into<String>, level: AccessLevel) -> Self { StorageError::AccessDenied { path: path.into(), level } }
    pub fn backend(drive: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        StorageError::BackendUnavailable { drive: drive.into(), source: source.into() }
    }
    pub fn invalid<S: Into<String>>(msg: S) -> Self { StorageError::InvalidArgument(msg.into()) }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self { StorageError::Unsupported(msg.into()) }

    /// Map a native I/O error, keeping the typed variants the gateway cares about.
    pub fn from_io(drive: &str, path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::not_found(path),
            std::io::ErrorKind::AlreadyExists => StorageError::already_exists(path),
            _ => StorageError::backend(drive, anyhow::Error::new(err).context(format!("path {}", path))),
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "not_found",
            StorageError::AlreadyExists { .. } => "already_exists",
            StorageError::AccessDenied { .. } => "access_denied",
            StorageError::BackendUnavailable { .. } => "backend_unavailable",
            StorageError::PartialFailure(_) => "partial_failure",
            StorageError::PreviewTooLarge { .. } => "preview_too_large",
            StorageError::RetryExhausted { .. } => "retry_exhausted",
            StorageError::InvalidArgument(_) => "invalid_argument",
            StorageError::Unsupported(_) => "unsupported",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            StorageError::NotFound { .. } => 404,
            StorageError::AlreadyExists { .. } => 409,
            StorageError::AccessDenied { .. } => 403,
            StorageError::BackendUnavailable { .. } => 503,
            StorageError::PartialFailure(_) => 207,
            StorageError::PreviewTooLarge { .. } => 413,
            StorageError::RetryExhausted { .. } => 503,
            StorageError::InvalidArgument(_) => 400,
            StorageError::Unsupported(_) => 501,
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, StorageError::NotFound { .. }) }
}
