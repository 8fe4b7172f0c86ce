//! Plugin Runtime Module
//!
//! Hosts third-party plugins behind a trait-based contract: dependency
//! resolution with deterministic load ordering, per-plugin sandboxes with
//! permission and resource gating, hot reload with state migration, and
//! repository-driven update checks.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use exthost::plugin::{DynamicLibraryHost, PluginSandbox, SandboxConfiguration};
//!
//! let sandbox = PluginSandbox::new(Arc::new(DynamicLibraryHost::new()));
//! sandbox.create_sandbox(
//!     "my-plugin",
//!     std::path::Path::new("/opt/plugins/my_plugin.so"),
//!     SandboxConfiguration::default(),
//! )?;
//! # Ok::<(), exthost::plugin::PluginError>(())
//! ```

pub mod traits;
pub mod error;
pub mod events;
pub mod version;
pub mod resolver;
pub mod module;
pub mod sandbox;
pub mod state;
pub mod hot_reload;
pub mod settings;
pub mod updates;

#[cfg(test)]
pub mod tests;

// Re-export core types for easier access
pub use traits::{Plugin, StatefulPlugin, PluginDependency, PluginDescriptor, PageDescriptor};
pub use error::{PluginError, PluginResult};
pub use events::{ObserverSet, SubscriptionToken};

// Dependency resolution
pub use resolver::{
    DependencyGraph, DependencyResolutionResult, DependencyResolver, VersionConflict,
};

// Versioning and updates
pub use version::{CompatibilityIssue, PluginManifest, PluginUpdateInfo, VersionChecker};
pub use updates::{PluginRepository, PluginUpdateManager, UpdateConfiguration, UpdateEvent};

// Module loading and sandboxing
pub use module::{DynamicLibraryHost, InProcessModuleHost, ModuleHost, PluginModule};
pub use sandbox::{
    PluginPermissions, PluginSandbox, SandboxConfiguration, SandboxEvent,
    SandboxExecutionResult, SandboxedPluginInfo,
};

// Hot reload and persistence
pub use hot_reload::{
    HotReloadConfiguration, HotReloadEvent, PluginHotReload, ReloadOutcome,
};
pub use state::{PluginStateData, PluginStateStore};
pub use settings::PluginConfigStore;
