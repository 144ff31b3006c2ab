//! Security rule evaluator: AccessLevel lattice + include/exclude path rules.
//!
//! Rules are evaluated fresh on every check. Decision: granted iff at least one
//! applicable, matching include rule exists and no applicable, matching exclude rule
//! exists. An empty rule set denies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

use super::config::EffectiveConfig;
use super::paths;
use super::types::{Drive, Principal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Create,
    Modify,
    Delete,
    Restore,
    Archive,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 7] = [
        AccessLevel::None,
        AccessLevel::Read,
        AccessLevel::Create,
        AccessLevel::Modify,
        AccessLevel::Delete,
        AccessLevel::Restore,
        AccessLevel::Archive,
    ];

    /// Position in the Read < Create < Modify < Delete chain; None for the
    /// exact-match-only levels.
    pub fn chain_rank(self) -> Option<u8> {
        match self {
            AccessLevel::Read => Some(1),
            AccessLevel::Create => Some(2),
            AccessLevel::Modify => Some(3),
            AccessLevel::Delete => Some(4),
            AccessLevel::None | AccessLevel::Restore | AccessLevel::Archive => None,
        }
    }
}

/// Does a rule configured at `granted` apply to a request for `requested`?
pub fn applies(granted: AccessLevel, requested: AccessLevel) -> bool {
    match (granted.chain_rank(), requested.chain_rank()) {
        (Some(g), Some(r)) => g >= r,
        _ => granted == requested,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityRule {
    pub role_name: String,
    /// Regex that must match the whole canonical path.
    pub path_pattern: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub exclude: bool,
}

impl SecurityRule {
    pub fn include(role: &str, pattern: &str, level: AccessLevel) -> Self {
        Self { role_name: role.to_string(), path_pattern: pattern.to_string(), access_level: level, exclude: false }
    }

    pub fn exclude(role: &str, pattern: &str, level: AccessLevel) -> Self {
        Self { role_name: role.to_string(), path_pattern: pattern.to_string(), access_level: level, exclude: true }
    }

    /// Whole-path match. An invalid pattern matches nothing.
    pub fn matches(&self, path: &str) -> bool {
        match Regex::new(&format!("^(?:{})$", self.path_pattern)) {
            Ok(rx) => rx.is_match(path),
            Err(e) => {
                warn!(target: "drivegate::security", "ignoring rule with invalid pattern '{}': {}", self.path_pattern, e);
                false
            }
        }
    }

    fn held_by(&self, principal: &Principal) -> bool {
        self.role_name == "*" || principal.has_role(&self.role_name)
    }
}

/// Pure decision over a rule set, ignoring roles.
pub fn is_granted(rules: &[SecurityRule], path: &str, level: AccessLevel) -> bool {
    let mut included = false;
    for rule in rules.iter().filter(|r| applies(r.access_level, level)) {
        if !rule.matches(path) { continue; }
        if rule.exclude { return false; }
        included = true;
    }
    included
}

/// Rules from `drive` that the principal holds through one of its roles.
pub fn rules_for(drive: &Drive, principal: &Principal) -> Vec<SecurityRule> {
    drive.security_rules.iter().filter(|r| r.held_by(principal)).cloned().collect()
}

/// Boolean check used to filter query results.
pub fn can_access(eff: &EffectiveConfig, drive: &Drive, principal: &Principal, path: &str, level: AccessLevel) -> bool {
    if !eff.security_check_enabled {
        crate::tprintln!("security bypass enabled; allowing {:?} on {}", level, path);
        return true;
    }
    let path = paths::normalize(path);
    let rules = rules_for(drive, principal);
    let allow = is_granted(&rules, &path, level);
    crate::tprintln!("security eval: drive={} user={} level={:?} path={} allow={}", drive.id, principal.id, level, path, allow);
    allow
}

/// Gate for every path operation: `AccessDenied` unless the rules grant `level`.
pub fn assert_access(eff: &EffectiveConfig, drive: &Drive, principal: &Principal, path: &str, level: AccessLevel) -> StorageResult<()> {
    if can_access(eff, drive, principal, path, level) {
        Ok(())
    } else {
        let path = paths::normalize(path);
        debug!(target: "drivegate::security", "denied {:?} on {}:{} for {}", level, drive.id, path, principal.id);
        Err(StorageError::denied(path, level))
    }
}
