//! Module Loading Boundary
//!
//! Owns how plugin code gets from a module file to a live [`Plugin`]
//! instance. Every plugin module exports one well-known entry function
//! (one module, one plugin instance); there is no runtime type scanning.
//!
//! Unloading a dynamic library is modeled as dropping the handle. Whether
//! the code pages are actually evicted is platform-dependent; callers must
//! never re-enter instances obtained from a dropped module.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::Mutex;
use super::error::{PluginError, PluginResult};
use super::traits::Plugin;

/// Symbol every plugin module must export as its registration entry point
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"plugin_entry";

/// Signature of the registration entry point
pub type PluginEntryFn = fn() -> Box<dyn Plugin>;

/// File-name prefix reserved for the host's own modules
///
/// Host modules are never plugin modules; the dynamic host refuses them
/// outright so a plugin directory cannot shadow host code.
pub const HOST_MODULE_PREFIX: &str = "exthost";

/// Loads plugin modules from module paths
pub trait ModuleHost: Send + Sync {
    /// Load the module at `path`, verifying its entry point
    fn load_module(&self, path: &Path) -> PluginResult<Box<dyn PluginModule>>;
}

/// One loaded plugin module
///
/// Dropping the module releases its code (best effort on platforms without
/// true in-process unload).
pub trait PluginModule: Send + Sync {
    /// Path the module was loaded from
    fn path(&self) -> &Path;

    /// Instantiate the module's plugin via its entry point
    fn instantiate(&self) -> PluginResult<Box<dyn Plugin>>;
}

/// Dynamic-library module host backed by the platform loader
///
/// Resolution of a plugin's private libraries is left to the platform
/// loader and whatever search paths the module itself carries (its RPATH
/// on Linux, loader defaults elsewhere); the host injects no search paths
/// of its own.
pub struct DynamicLibraryHost {
    host_prefix: String,
}

impl DynamicLibraryHost {
    /// Create a host with the default reserved prefix
    pub fn new() -> Self {
        Self {
            host_prefix: HOST_MODULE_PREFIX.to_string(),
        }
    }

    /// Create a host with a custom reserved prefix
    pub fn with_host_prefix<S: Into<String>>(prefix: S) -> Self {
        Self {
            host_prefix: prefix.into(),
        }
    }

    fn is_host_module(&self, path: &Path) -> bool {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| {
                stem.to_ascii_lowercase()
                    .starts_with(&self.host_prefix.to_ascii_lowercase())
            })
            .unwrap_or(false)
    }
}

impl Default for DynamicLibraryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleHost for DynamicLibraryHost {
    fn load_module(&self, path: &Path) -> PluginResult<Box<dyn PluginModule>> {
        if !path.exists() {
            return Err(PluginError::module_not_found(path.display().to_string()));
        }
        if self.is_host_module(path) {
            return Err(PluginError::loading_failed(format!(
                "Refusing to load host module '{}' as a plugin",
                path.display()
            )));
        }

        log::debug!("Loading plugin module from {}", path.display());
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            PluginError::loading_failed(format!(
                "Failed to load module '{}': {}",
                path.display(),
                e
            ))
        })?;

        // Verify the entry point up front so a bad module fails at load
        // time, not on first instantiation.
        unsafe {
            library
                .get::<PluginEntryFn>(PLUGIN_ENTRY_SYMBOL)
                .map_err(|e| {
                    PluginError::loading_failed(format!(
                        "Module '{}' does not export a plugin entry point: {}",
                        path.display(),
                        e
                    ))
                })?;
        }

        Ok(Box::new(DynamicLibraryModule {
            path: path.to_path_buf(),
            library,
        }))
    }
}

/// A module loaded through [`DynamicLibraryHost`]
struct DynamicLibraryModule {
    path: PathBuf,
    library: libloading::Library,
}

impl PluginModule for DynamicLibraryModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn instantiate(&self) -> PluginResult<Box<dyn Plugin>> {
        let entry = unsafe {
            self.library
                .get::<PluginEntryFn>(PLUGIN_ENTRY_SYMBOL)
                .map_err(|e| {
                    PluginError::loading_failed(format!(
                        "Entry point vanished from '{}': {}",
                        self.path.display(),
                        e
                    ))
                })?
        };
        Ok(entry())
    }
}

/// Plugin instance factory used by the in-process host
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// In-process module host for built-in plugins and tests
///
/// Factories stand in for module files, keyed by the path the sandbox
/// would otherwise load from. Preserves "one module, one plugin instance"
/// without touching the platform loader.
pub struct InProcessModuleHost {
    factories: Mutex<HashMap<PathBuf, PluginFactory>>,
}

impl InProcessModuleHost {
    /// Create an empty in-process host
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory for a module path
    pub fn register_factory<P, F>(&self, path: P, factory: F)
    where
        P: Into<PathBuf>,
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.lock().insert(path.into(), Arc::new(factory));
    }

    /// Remove a registered factory
    pub fn unregister_factory(&self, path: &Path) -> bool {
        self.factories.lock().remove(path).is_some()
    }
}

impl Default for InProcessModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleHost for InProcessModuleHost {
    fn load_module(&self, path: &Path) -> PluginResult<Box<dyn PluginModule>> {
        let factory = self
            .factories
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| PluginError::module_not_found(path.display().to_string()))?;

        Ok(Box::new(InProcessModule {
            path: path.to_path_buf(),
            factory,
        }))
    }
}

struct InProcessModule {
    path: PathBuf,
    factory: PluginFactory,
}

impl PluginModule for InProcessModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn instantiate(&self) -> PluginResult<Box<dyn Plugin>> {
        Ok((self.factory)())
    }
}
