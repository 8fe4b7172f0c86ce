//! Plugin Settings
//!
//! Flat per-plugin key/value configuration, one JSON file per plugin id
//! under the host configuration directory. Values are strings; typed
//! interpretation is the plugin's concern. Writes are explicit: mutations
//! mark the store dirty and `save` flushes only when something changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use super::error::{PluginError, PluginResult};

/// Default plugin settings directory (`<config dir>/exthost/plugins`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("exthost")
        .join("plugins")
}

struct ConfigInner {
    values: HashMap<String, String>,
    dirty: bool,
}

/// Key/value settings for one plugin, backed by a JSON file
pub struct PluginConfigStore {
    plugin_id: String,
    config_path: PathBuf,
    inner: Mutex<ConfigInner>,
}

impl PluginConfigStore {
    /// Open the settings for `plugin_id`, reading any existing file
    ///
    /// A missing file yields an empty store; an unreadable one is an error
    /// so a corrupt config is surfaced rather than silently emptied.
    pub fn open(config_dir: &Path, plugin_id: &str) -> PluginResult<Self> {
        let config_path = config_dir.join(format!("{}.json", plugin_id));

        let values = match std::fs::read(&config_path) {
            Ok(contents) => serde_json::from_slice(&contents).map_err(|e| {
                PluginError::configuration_error(format!(
                    "Unreadable settings file {}: {}",
                    config_path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(PluginError::configuration_error(format!(
                    "Failed to read settings file {}: {}",
                    config_path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            plugin_id: plugin_id.to_string(),
            config_path,
            inner: Mutex::new(ConfigInner {
                values,
                dirty: false,
            }),
        })
    }

    /// Plugin this store belongs to
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// File the settings persist into
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Fetch a value
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Fetch a value, falling back to a default
    pub fn get_or<'a>(&self, key: &str, default: &'a str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Set a value; a no-op write does not mark the store dirty
    pub fn set<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        let mut inner = self.inner.lock();
        if inner.values.get(&key) == Some(&value) {
            return;
        }
        inner.values.insert(key, value);
        inner.dirty = true;
    }

    /// Remove a value, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.values.remove(key).is_some() {
            inner.dirty = true;
            true
        } else {
            false
        }
    }

    /// All keys currently set
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether unsaved changes exist
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Flush to disk if anything changed since the last save
    pub fn save(&self) -> PluginResult<()> {
        let snapshot = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            inner.values.clone()
        };

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PluginError::configuration_error(format!(
                    "Failed to create settings directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&self.config_path, json).map_err(|e| {
            PluginError::configuration_error(format!(
                "Failed to write settings file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        log::debug!(
            "Saved {} settings for '{}'",
            snapshot.len(),
            self.plugin_id
        );
        Ok(())
    }
}
