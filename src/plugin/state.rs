//! Plugin State Persistence
//!
//! Durable storage for the opaque state blobs plugins hand over before a
//! hot reload. One JSON record per plugin id, cached in memory and lazily
//! repopulated from disk after a host restart. The runtime never interprets
//! the bytes or the version tags; those belong to the plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use super::error::{PluginError, PluginResult};

/// Directory name for saved plugin states under the host state directory
pub const STATE_SUBDIR: &str = "PluginStates";

/// Default host state directory (`<local data dir>/exthost`)
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("exthost")
}

/// One saved plugin state record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStateData {
    /// Plugin the state belongs to
    pub plugin_id: String,

    /// Opaque serialized state, if the plugin produced any
    pub state_bytes: Option<Vec<u8>>,

    /// The plugin's state layout version at save time
    pub state_version: u32,

    /// When the state was saved
    pub saved_at: DateTime<Utc>,

    /// The plugin version that produced the state
    pub plugin_version: String,

    /// Free-form metadata attached by the saver
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Durable per-plugin state store with a lazy in-memory cache
pub struct PluginStateStore {
    state_dir: PathBuf,
    cache: Mutex<HashMap<String, PluginStateData>>,
}

impl PluginStateStore {
    /// Create a store rooted at `<state_dir>/PluginStates`
    pub fn new<P: Into<PathBuf>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.into().join(STATE_SUBDIR),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn state_file(&self, plugin_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", plugin_id))
    }

    /// Persist a state record, overwriting any previous save for the id
    pub async fn save_state(&self, state: PluginStateData) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.state_dir).await.map_err(|e| {
            PluginError::state_error(format!(
                "Failed to create state directory {}: {}",
                self.state_dir.display(),
                e
            ))
        })?;

        let path = self.state_file(&state.plugin_id);
        let json = serde_json::to_vec_pretty(&state)?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            PluginError::state_error(format!(
                "Failed to write state file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::debug!(
            "Saved state for '{}' ({} bytes)",
            state.plugin_id,
            state.state_bytes.as_ref().map(Vec::len).unwrap_or(0)
        );
        self.cache.lock().insert(state.plugin_id.clone(), state);
        Ok(())
    }

    /// Fetch the saved state for a plugin, reading from disk on cache miss
    pub fn get_saved_state(&self, plugin_id: &str) -> Option<PluginStateData> {
        if let Some(state) = self.cache.lock().get(plugin_id) {
            return Some(state.clone());
        }

        let path = self.state_file(plugin_id);
        let contents = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<PluginStateData>(&contents) {
            Ok(state) => {
                self.cache.lock().insert(plugin_id.to_string(), state.clone());
                Some(state)
            }
            Err(e) => {
                log::warn!(
                    "Discarding unreadable state file {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Remove the saved state for a plugin from cache and disk
    pub fn clear_saved_state(&self, plugin_id: &str) -> PluginResult<()> {
        self.cache.lock().remove(plugin_id);

        let path = self.state_file(plugin_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginError::state_error(format!(
                "Failed to remove state file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Drop the in-memory cache, forcing the next read to hit disk
    ///
    /// Only useful for simulating a host restart in tests.
    pub fn drop_cache(&self) {
        self.cache.lock().clear();
    }

    /// Directory the store persists into
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
