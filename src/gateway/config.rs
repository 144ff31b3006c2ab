use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::Drive;

/// Global gateway settings applied to all drives unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalGatewayConfig {
    /// Dev bypass: when false every access check is allowed.
    pub security_check_enabled: bool,

    /// Bytes fetched per window while previewing lines.
    pub preview_window_bytes: u64,
    /// Total bytes a preview may scan before giving up.
    pub preview_max_scan_bytes: u64,
    pub preview_retry_attempts: u32,
    pub preview_retry_delay_ms: u64,

    /// Minimum multipart part size for flat backends that do not declare their own.
    pub default_min_part_size: u64,
}

impl Default for GlobalGatewayConfig {
    fn default() -> Self {
        Self {
            security_check_enabled: true,
            preview_window_bytes: 5_000,
            preview_max_scan_bytes: 500_000,
            preview_retry_attempts: 20,
            preview_retry_delay_ms: 100,
            default_min_part_size: 5 * 1024 * 1024,
        }
    }
}

/// Per-drive configuration. Unspecified values inherit from Global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DriveConfig {
    pub security_check_enabled: Option<bool>,
    pub preview_window_bytes: Option<u64>,
    pub preview_max_scan_bytes: Option<u64>,
    pub preview_retry_attempts: Option<u32>,
    pub preview_retry_delay_ms: Option<u64>,
    pub min_part_size: Option<u64>,
}

/// Fully resolved effective config used during execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveConfig {
    pub security_check_enabled: bool,
    pub preview_window_bytes: u64,
    pub preview_max_scan_bytes: u64,
    pub preview_retry_attempts: u32,
    pub preview_retry_delay_ms: u64,
    pub min_part_size: u64,
}

impl EffectiveConfig {
    /// Build an effective config from Global + Drive layers.
    pub fn from_layers(global: &GlobalGatewayConfig, drive: &DriveConfig) -> Self {
        Self {
            security_check_enabled: drive.security_check_enabled.unwrap_or(global.security_check_enabled),
            preview_window_bytes: drive.preview_window_bytes.unwrap_or(global.preview_window_bytes).max(1),
            preview_max_scan_bytes: drive.preview_max_scan_bytes.unwrap_or(global.preview_max_scan_bytes),
            preview_retry_attempts: drive.preview_retry_attempts.unwrap_or(global.preview_retry_attempts).max(1),
            preview_retry_delay_ms: drive.preview_retry_delay_ms.unwrap_or(global.preview_retry_delay_ms),
            min_part_size: drive.min_part_size.unwrap_or(global.default_min_part_size),
        }
    }
}

/// Top-level configuration file: global settings plus drive definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub global: GlobalGatewayConfig,
    #[serde(default)]
    pub drives: Vec<Drive>,
}

impl GatewayConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: GatewayConfig = serde_json::from_str(text).context("invalid gateway config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Drive ids must be unique and non-empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for d in &self.drives {
            if d.id.trim().is_empty() { anyhow::bail!("drive id cannot be empty"); }
            if !seen.insert(d.id.as_str()) { anyhow::bail!("duplicate drive id '{}'", d.id); }
        }
        Ok(())
    }

    pub fn effective(&self, drive: &Drive) -> EffectiveConfig {
        EffectiveConfig::from_layers(&self.global, &drive.config)
    }
}

#[cfg(test)]
mod config_tests;
