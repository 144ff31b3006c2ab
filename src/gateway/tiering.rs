//! Storage tiering and restore helpers shared by tiered backends.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

use super::types::{DriveItem, StorageClass};

/// Outcome of a (possibly recursive) restore request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Paths a rehydration request was issued for.
    pub requested: Vec<String>,
    /// Paths left alone: not in a restore-requiring class, or already restoring.
    pub skipped: Vec<String>,
}

/// A catalogue must have exactly one default class and unique ids.
pub fn validate_catalogue(classes: &[StorageClass]) -> StorageResult<()> {
    let defaults = classes.iter().filter(|c| c.is_default).count();
    if defaults != 1 {
        return Err(StorageError::invalid(format!("storage class catalogue has {} defaults, expected 1", defaults)));
    }
    let mut ids: Vec<&str> = classes.iter().map(|c| c.class_id.as_str()).collect();
    ids.sort_unstable();
    if ids.windows(2).any(|w| w[0] == w[1]) {
        return Err(StorageError::invalid("duplicate storage class id"));
    }
    Ok(())
}

pub fn default_class(classes: &[StorageClass]) -> Option<&StorageClass> {
    classes.iter().find(|c| c.is_default)
}

/// Look up a class by id (case-insensitive, as vendors accept either).
pub fn find_class<'a>(classes: &'a [StorageClass], class_id: &str) -> StorageResult<&'a StorageClass> {
    classes
        .iter()
        .find(|c| c.class_id.eq_ignore_ascii_case(class_id))
        .ok_or_else(|| StorageError::invalid(format!("unknown storage class '{}'", class_id)))
}

/// Does this item need (and not already have) a rehydration request?
/// Items without an explicit class are in the default class.
pub fn needs_restore(classes: &[StorageClass], item: &DriveItem) -> bool {
    if item.is_directory || item.is_restoring {
        return false;
    }
    let class = match &item.storage_class {
        Some(id) => classes.iter().find(|c| c.class_id.eq_ignore_ascii_case(id)),
        None => default_class(classes),
    };
    class.map(|c| c.requires_restore).unwrap_or(false)
}

/// Restore window in days, checked against the backend's requirement.
pub fn check_days(days: u32, requires_days: bool) -> StorageResult<()> {
    if requires_days && days == 0 {
        return Err(StorageError::invalid("restore requires a positive number of days"));
    }
    Ok(())
}

/// Catalogue used by S3-style object stores.
pub fn object_store_classes() -> Vec<StorageClass> {
    vec![
        StorageClass::new("STANDARD", "Standard", false, true),
        StorageClass::new("STANDARD_IA", "Standard Infrequent Access", false, false),
        StorageClass::new("GLACIER", "Glacier Flexible Retrieval", true, false),
        StorageClass::new("DEEP_ARCHIVE", "Glacier Deep Archive", true, false),
    ]
}
