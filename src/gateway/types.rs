//! Core gateway data contracts: drives, items, queries, storage classes.
//! Keep this module purely about types/serde and light helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::DriveConfig;
use super::paths;
use super::security::SecurityRule;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    // Flat object-key stores
    S3,
    AzureBlob,
    GoogleCloudStorage,
    Memory,
    // Hierarchical filesystems and shares
    LocalFilesystem,
    SmbShare,
    Sftp,
}

impl BackendType {
    /// Flat backends have no native directories and need directory emulation.
    pub fn is_flat(&self) -> bool {
        matches!(self, BackendType::S3 | BackendType::AzureBlob | BackendType::GoogleCloudStorage | BackendType::Memory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveProperty {
    pub name: String,
    pub value: String,
}

/// A configured storage location. Read-only to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drive {
    pub id: String,
    pub backend_type: BackendType,
    #[serde(default)]
    pub properties: Vec<DriveProperty>,
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
    #[serde(default)]
    pub config: DriveConfig,
}

impl Drive {
    pub fn new(id: &str, backend_type: BackendType) -> Self {
        Self { id: id.to_string(), backend_type, properties: vec![], security_rules: vec![], config: DriveConfig::default() }
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_rule(mut self, rule: SecurityRule) -> Self {
        self.security_rules.push(rule);
        self
    }

    /// First value for a named property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.iter().find(|p| p.name == name).map(|p| p.value.as_str())
    }

    /// Replace an existing property in place, keeping its position, or append it.
    pub fn set_property(&mut self, name: &str, value: &str) {
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(p) => p.value = value.to_string(),
            None => self.properties.push(DriveProperty { name: name.to_string(), value: value.to_string() }),
        }
    }
}

/// One file or directory inside a drive. Produced on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveItem {
    pub path: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub is_restoring: bool,
    #[serde(default)]
    pub restore_expires_at: Option<DateTime<Utc>>,
}

impl DriveItem {
    pub fn file(path: &str, size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            path: paths::to_file(path),
            is_directory: false,
            size_bytes,
            modified_at,
            storage_class: None,
            is_restoring: false,
            restore_expires_at: None,
        }
    }

    pub fn directory(path: &str) -> Self {
        Self {
            path: paths::to_directory(path),
            is_directory: true,
            size_bytes: 0,
            modified_at: None,
            storage_class: None,
            is_restoring: false,
            restore_expires_at: None,
        }
    }

    pub fn name(&self) -> String { paths::name(&self.path) }

    pub fn parent(&self) -> String { paths::parent(&self.path) }
}

/// Immutable description of a `find` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    pub drive_id: String,
    pub start_path: String,
    /// Regex matched against the final path segment only; "" matches everything.
    #[serde(default)]
    pub search_pattern: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_placeholders: bool,
}

impl Query {
    pub fn new(drive_id: &str, start_path: &str) -> Self {
        Self {
            drive_id: drive_id.to_string(),
            start_path: paths::to_directory(start_path),
            search_pattern: String::new(),
            recursive: false,
            include_placeholders: false,
        }
    }

    pub fn pattern(mut self, pattern: &str) -> Self { self.search_pattern = pattern.to_string(); self }
    pub fn recursive(mut self, recursive: bool) -> Self { self.recursive = recursive; self }
    pub fn placeholders(mut self, include: bool) -> Self { self.include_placeholders = include; self }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageClass {
    pub class_id: String,
    pub display_name: String,
    /// Data must be rehydrated before it can be read cheaply.
    pub requires_restore: bool,
    pub is_default: bool,
}

impl StorageClass {
    pub fn new(class_id: &str, display_name: &str, requires_restore: bool, is_default: bool) -> Self {
        Self { class_id: class_id.to_string(), display_name: display_name.to_string(), requires_restore, is_default }
    }
}

/// Caller identity used by the security evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: &str, roles: &[&str]) -> Self {
        Self { id: id.to_string(), roles: roles.iter().map(|r| r.to_string()).collect() }
    }

    pub fn has_role(&self, role: &str) -> bool { self.roles.iter().any(|r| r.eq_ignore_ascii_case(role)) }
}
