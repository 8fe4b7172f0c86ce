//! Version Checker
//!
//! Pure comparison operations over dotted numeric version strings, host
//! compatibility checks, and batch update detection against remote plugin
//! manifests. Unparsable versions are treated permissively throughout: a
//! plugin with a malformed version tag is never rejected on that basis.

use std::cmp::Ordering;
use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::traits::PluginDependency;

/// Version assumed when a plugin has no recorded installed version
pub const ABSENT_VERSION: &str = "0.0.0.0";

/// Remote plugin manifest consumed from the update repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Published version
    pub version: String,

    /// Minimum host version this release supports
    pub minimum_host_version: Option<String>,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,

    /// Where to fetch the plugin module from
    pub download_url: String,

    /// Content hash of the published module
    pub file_hash: String,

    /// Size of the published module in bytes
    pub file_size: u64,

    /// Publication timestamp
    pub release_date: DateTime<Utc>,

    /// Release notes, if published
    pub changelog: Option<String>,

    /// Search tags, if published
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether this is a host-bundled system plugin
    #[serde(default)]
    pub is_system_plugin: bool,
}

/// A manifest the current host version cannot run
#[derive(Debug, Clone)]
pub struct CompatibilityIssue {
    /// Plugin the issue applies to
    pub plugin_id: String,

    /// Minimum host version the plugin demands
    pub required_host_version: String,

    /// The host version that failed the check
    pub host_version: String,
}

/// An installed plugin with a newer published version
#[derive(Debug, Clone)]
pub struct PluginUpdateInfo {
    /// Plugin the update applies to
    pub plugin_id: String,

    /// Currently installed version, if any
    pub installed_version: Option<String>,

    /// Newer published version
    pub available_version: String,

    /// The manifest the update came from
    pub manifest: PluginManifest,
}

/// Checker for plugin/host version compatibility and update availability
#[derive(Debug, Clone)]
pub struct VersionChecker {
    /// Version of the running host
    host_version: String,
}

impl VersionChecker {
    /// Create a checker for an explicit host version
    pub fn new<S: Into<String>>(host_version: S) -> Self {
        Self { host_version: host_version.into() }
    }

    /// The host version this checker validates against
    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    /// Parse a dotted numeric version into its segments
    ///
    /// Returns None for anything that is not purely dotted numbers; callers
    /// decide what "unparsable" means for their check.
    fn parse_version(version: &str) -> Option<Vec<u64>> {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return None;
        }
        trimmed
            .split('.')
            .map(|segment| segment.parse::<u64>().ok())
            .collect()
    }

    /// Compare two parsed segment vectors, padding the shorter with zeros
    fn compare_segments(a: &[u64], b: &[u64]) -> Ordering {
        for i in 0..std::cmp::max(a.len(), b.len()) {
            let left = a.get(i).copied().unwrap_or(0);
            let right = b.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Compare two dotted numeric version strings
    ///
    /// Unparsable inputs compare as `0.0.0.0`, so they order below any real
    /// release but equal to each other.
    pub fn compare_versions(a: &str, b: &str) -> Ordering {
        let left = Self::parse_version(a).unwrap_or_default();
        let right = Self::parse_version(b).unwrap_or_default();
        Self::compare_segments(&left, &right)
    }

    /// Check whether the host satisfies a plugin's minimum host version
    ///
    /// Absent or unparsable requirements are treated as compatible.
    pub fn is_compatible(&self, minimum_host_version: Option<&str>) -> bool {
        let Some(minimum) = minimum_host_version else {
            return true;
        };
        let (Some(host), Some(min)) = (
            Self::parse_version(&self.host_version),
            Self::parse_version(minimum),
        ) else {
            return true;
        };
        Self::compare_segments(&host, &min) != Ordering::Less
    }

    /// Check whether a candidate version is newer than the installed one
    ///
    /// An absent installed version counts as `0.0.0.0`, so any real release
    /// is an update.
    pub fn is_update_available(current: Option<&str>, candidate: &str) -> bool {
        let current = current.unwrap_or(ABSENT_VERSION);
        Self::compare_versions(candidate, current) == Ordering::Greater
    }

    /// Check an actual version against inclusive `[min, max]` bounds
    ///
    /// Unparsable actual versions or bounds are permissively compatible.
    pub fn is_version_compatible(
        actual: &str,
        min_version: Option<&str>,
        max_version: Option<&str>,
    ) -> bool {
        let Some(actual) = Self::parse_version(actual) else {
            return true;
        };

        if let Some(min) = min_version.and_then(Self::parse_version) {
            if Self::compare_segments(&actual, &min) == Ordering::Less {
                return false;
            }
        }

        if let Some(max) = max_version.and_then(Self::parse_version) {
            if Self::compare_segments(&actual, &max) == Ordering::Greater {
                return false;
            }
        }

        true
    }

    /// Find manifests the current host version cannot run
    pub fn check_compatibility(&self, manifests: &[PluginManifest]) -> Vec<CompatibilityIssue> {
        manifests
            .iter()
            .filter(|manifest| !self.is_compatible(manifest.minimum_host_version.as_deref()))
            .map(|manifest| CompatibilityIssue {
                plugin_id: manifest.id.clone(),
                required_host_version: manifest
                    .minimum_host_version
                    .clone()
                    .unwrap_or_default(),
                host_version: self.host_version.clone(),
            })
            .collect()
    }

    /// Find installed plugins with a newer, host-compatible published version
    pub fn get_available_updates(
        &self,
        installed_versions: &HashMap<String, String>,
        manifests: &[PluginManifest],
    ) -> Vec<PluginUpdateInfo> {
        let mut updates = Vec::new();

        for manifest in manifests {
            let installed = installed_versions.get(&manifest.id);
            // Only installed plugins are update candidates.
            let Some(installed) = installed else {
                continue;
            };
            if !self.is_compatible(manifest.minimum_host_version.as_deref()) {
                continue;
            }
            if Self::is_update_available(Some(installed), &manifest.version) {
                updates.push(PluginUpdateInfo {
                    plugin_id: manifest.id.clone(),
                    installed_version: Some(installed.clone()),
                    available_version: manifest.version.clone(),
                    manifest: manifest.clone(),
                });
            }
        }

        updates
    }
}

impl Default for VersionChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}
