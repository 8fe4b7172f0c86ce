//! Core Plugin Traits
//!
//! Defines the capability contract every hosted plugin implements, plus the
//! host-side descriptor record consumed by the dependency resolver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use super::error::PluginResult;

/// Core plugin interface that all plugins must implement
///
/// The host never constructs plugins directly; instances come out of a
/// module's registration entry point (see [`crate::plugin::module`]).
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin identifier
    fn id(&self) -> &str;

    /// Human-readable plugin name
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Icon resource identifier for the host shell
    fn icon(&self) -> &str;

    /// Plugin version string (dotted numeric, e.g. "1.2.0")
    fn version(&self) -> &str;

    /// Whether this plugin ships with the host and cannot be uninstalled
    fn is_system_plugin(&self) -> bool {
        false
    }

    /// Declared dependencies on other plugins
    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// Called once after the plugin has been installed
    async fn on_installed(&mut self) -> PluginResult<()>;

    /// Called once before the plugin is uninstalled
    async fn on_uninstalled(&mut self) -> PluginResult<()>;

    /// Called when the host is shutting the plugin down
    async fn on_shutdown(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Stop any background work the plugin is doing
    async fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Page surface the plugin contributes to the host's feature area
    fn feature_extension(&self) -> Option<PageDescriptor> {
        None
    }

    /// Page surface the plugin contributes to the host's settings area
    fn settings_page(&self) -> Option<PageDescriptor> {
        None
    }

    /// Cast to StatefulPlugin if this plugin implements that capability
    fn as_stateful(&self) -> Option<&dyn StatefulPlugin> {
        None
    }

    /// Cast to mutable StatefulPlugin if this plugin implements that capability
    fn as_stateful_mut(&mut self) -> Option<&mut dyn StatefulPlugin> {
        None
    }
}

/// State-preservation capability for plugins that survive hot reloads
///
/// The runtime treats the serialized bytes as opaque; `state_version` and
/// the previous plugin version are tags the plugin itself consults during
/// restore.
pub trait StatefulPlugin: Plugin {
    /// Serialize the plugin's logical state to an opaque blob
    fn serialize_state(&self) -> PluginResult<Vec<u8>>;

    /// Restore state saved by a (possibly older) version of this plugin
    ///
    /// Returns true if the state was accepted, false if the plugin chose to
    /// discard it (e.g. incompatible state version).
    fn deserialize_state(&mut self, bytes: &[u8], previous_version: &str) -> PluginResult<bool>;

    /// Version tag for the plugin's state layout
    fn state_version(&self) -> u32;
}

/// Descriptor of a page surface contributed by a plugin
///
/// The host shell is responsible for rendering; the runtime only carries
/// the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Stable page identifier
    pub page_id: String,

    /// Display title
    pub title: String,
}

/// Plugin dependency specification
///
/// Directed edge from a plugin to a prerequisite plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    /// Identifier of the prerequisite plugin
    pub plugin_id: String,

    /// Minimum acceptable version (inclusive), if constrained
    pub min_version: Option<String>,

    /// Maximum acceptable version (inclusive), if constrained
    pub max_version: Option<String>,

    /// Optional dependencies do not affect load ordering or installation
    pub is_optional: bool,

    /// Human-readable reason the dependency exists
    pub reason: Option<String>,
}

impl PluginDependency {
    /// Create a required dependency with no version constraints
    pub fn required<S: Into<String>>(plugin_id: S) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            min_version: None,
            max_version: None,
            is_optional: false,
            reason: None,
        }
    }

    /// Create an optional dependency with no version constraints
    pub fn optional<S: Into<String>>(plugin_id: S) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            min_version: None,
            max_version: None,
            is_optional: true,
            reason: None,
        }
    }

    /// Set the minimum acceptable version
    pub fn with_min_version<S: Into<String>>(mut self, version: S) -> Self {
        self.min_version = Some(version.into());
        self
    }

    /// Set the maximum acceptable version
    pub fn with_max_version<S: Into<String>>(mut self, version: S) -> Self {
        self.max_version = Some(version.into());
        self
    }

    /// Set the reason the dependency exists
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Host-side registration record for a plugin
///
/// Fed to the dependency resolver and the diagnostic graph; the runtime
/// builds these from installed plugin metadata before any module is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Installed version string
    pub version: String,

    /// Declared dependencies
    pub dependencies: Vec<PluginDependency>,

    /// Whether the plugin is currently installed
    pub is_installed: bool,
}

impl PluginDescriptor {
    /// Create a descriptor for an installed plugin
    pub fn new<S: Into<String>>(id: S, version: S) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            dependencies: Vec::new(),
            is_installed: true,
        }
    }

    /// Set the display name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}
