//! Plugin Hot Reload
//!
//! Swaps a running plugin's module for a new version while attempting to
//! carry its logical state across the swap. Also provides watch-triggered
//! auto-reload and module backups.
//!
//! The reload protocol is not transactional: a failure partway through is
//! reported via `ReloadFailed` but completed steps (an unload that
//! succeeded, say) are not rolled back.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use dashmap::DashMap;
use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use super::error::{PluginError, PluginResult};
use super::events::ObserverSet;
use super::sandbox::PluginSandbox;
use super::state::{PluginStateData, PluginStateStore};

/// Directory name for module backups under the host state directory
pub const BACKUP_SUBDIR: &str = "PluginBackups";

/// Hot reload behavior switches and timing
#[derive(Debug, Clone)]
pub struct HotReloadConfiguration {
    /// Master switch; nothing reloads when false
    pub enabled: bool,

    /// Attach file watchers and reload on module changes
    pub auto_reload_on_change: bool,

    /// Save and restore plugin state across the swap
    pub restore_state: bool,

    /// Back up the outgoing module before swapping
    pub keep_backup: bool,

    /// Debounce window between a detected file change and the reload
    pub reload_delay_ms: u64,

    /// Budget for the plugin's state serialization
    pub state_serialization_timeout_seconds: u64,

    /// Budget for the plugin's shutdown hooks during unload
    pub shutdown_timeout_seconds: u64,

    /// Backups retained per plugin; oldest pruned first
    pub max_backup_count: usize,
}

impl Default for HotReloadConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_reload_on_change: false,
            restore_state: true,
            keep_backup: true,
            reload_delay_ms: 500,
            state_serialization_timeout_seconds: 10,
            shutdown_timeout_seconds: 5,
            max_backup_count: 5,
        }
    }
}

/// Terminal result of one reload attempt
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
    pub state_restored: bool,
}

impl ReloadOutcome {
    fn succeeded(duration: Duration, state_restored: bool) -> Self {
        Self {
            success: true,
            error_message: None,
            duration,
            state_restored,
        }
    }

    fn failed<S: Into<String>>(message: S, duration: Duration) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            duration,
            state_restored: false,
        }
    }
}

/// Events raised by the hot reload component
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// A reload is starting
    PluginReloading { plugin_id: String, old_version: String },

    /// A reload finished successfully
    PluginReloaded {
        plugin_id: String,
        duration_ms: u64,
        state_restored: bool,
    },

    /// A watched module file changed on disk
    FileChanged { plugin_id: String, path: PathBuf },

    /// A reload aborted partway through
    ReloadFailed {
        plugin_id: String,
        message: String,
        elapsed_ms: u64,
    },
}

struct WatcherHandle {
    _watcher: notify::RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

/// Orchestrates module swaps, state migration, watching, and backups
pub struct PluginHotReload {
    config: HotReloadConfiguration,
    sandbox: Arc<PluginSandbox>,
    state_store: PluginStateStore,
    backup_root: PathBuf,
    enabled_plugins: Mutex<HashSet<String>>,
    watchers: Mutex<HashMap<String, WatcherHandle>>,
    // Single-flight guard: concurrent reloads of one id are serialized.
    reload_guards: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    events: Arc<ObserverSet<HotReloadEvent>>,
}

impl PluginHotReload {
    /// Create a hot reload manager persisting under `state_dir`
    pub fn new(
        config: HotReloadConfiguration,
        sandbox: Arc<PluginSandbox>,
        state_dir: &Path,
    ) -> Self {
        Self {
            config,
            sandbox,
            state_store: PluginStateStore::new(state_dir),
            backup_root: state_dir.join(BACKUP_SUBDIR),
            enabled_plugins: Mutex::new(HashSet::new()),
            watchers: Mutex::new(HashMap::new()),
            reload_guards: DashMap::new(),
            events: Arc::new(ObserverSet::new()),
        }
    }

    /// Observer registration for hot reload events
    pub fn events(&self) -> &ObserverSet<HotReloadEvent> {
        &self.events
    }

    /// The active configuration
    pub fn config(&self) -> &HotReloadConfiguration {
        &self.config
    }

    /// Enable or disable hot reload for a specific plugin id
    pub fn set_plugin_enabled(&self, plugin_id: &str, enabled: bool) {
        let mut plugins = self.enabled_plugins.lock();
        if enabled {
            plugins.insert(plugin_id.to_string());
        } else {
            plugins.remove(plugin_id);
        }
    }

    /// Whether hot reload is enabled for a specific plugin id
    pub fn is_plugin_enabled(&self, plugin_id: &str) -> bool {
        self.enabled_plugins.lock().contains(plugin_id)
    }

    fn reload_guard(&self, plugin_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.reload_guards
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Swap a plugin's module for the one at `new_module_path`
    ///
    /// Runs the full reload protocol; the first failing step aborts the
    /// rest and raises `ReloadFailed`. Never returns an error: the outcome
    /// object is the contract.
    pub async fn reload_plugin(&self, plugin_id: &str, new_module_path: &Path) -> ReloadOutcome {
        let started = Instant::now();

        if !self.config.enabled || !self.is_plugin_enabled(plugin_id) {
            log::debug!("Reload of '{}' refused: hot reload not enabled", plugin_id);
            return ReloadOutcome::failed(
                format!("Hot reload is not enabled for plugin '{}'", plugin_id),
                started.elapsed(),
            );
        }

        let guard = self.reload_guard(plugin_id);
        let _serialized = guard.lock().await;

        let old_version = self
            .sandbox
            .sandbox_info(plugin_id)
            .map(|info| info.version)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        log::info!(
            "Reloading plugin '{}' (v{}) from {}",
            plugin_id,
            old_version,
            new_module_path.display()
        );
        self.events.emit(&HotReloadEvent::PluginReloading {
            plugin_id: plugin_id.to_string(),
            old_version,
        });

        // State save failures are logged but do not abort the reload.
        let mut state_saved = false;
        if self.config.restore_state {
            match self.save_plugin_state(plugin_id).await {
                Ok(saved) => state_saved = saved,
                Err(e) => log::warn!("Could not save state for '{}': {}", plugin_id, e),
            }
        }

        if let Err(e) = self.swap_module(plugin_id, new_module_path).await {
            let elapsed = started.elapsed();
            log::error!("Reload of '{}' failed: {}", plugin_id, e);
            self.events.emit(&HotReloadEvent::ReloadFailed {
                plugin_id: plugin_id.to_string(),
                message: e.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
            return ReloadOutcome::failed(e.to_string(), elapsed);
        }

        let mut state_restored = false;
        if state_saved {
            match self.restore_plugin_state(plugin_id).await {
                Ok(restored) => state_restored = restored,
                Err(e) => log::warn!("Could not restore state for '{}': {}", plugin_id, e),
            }
        }

        let duration = started.elapsed();
        log::info!(
            "Reloaded plugin '{}' in {} ms (state restored: {})",
            plugin_id,
            duration.as_millis(),
            state_restored
        );
        self.events.emit(&HotReloadEvent::PluginReloaded {
            plugin_id: plugin_id.to_string(),
            duration_ms: duration.as_millis() as u64,
            state_restored,
        });
        ReloadOutcome::succeeded(duration, state_restored)
    }

    /// Steps 4-8 of the protocol: backup, unload, destroy, recreate, load
    async fn swap_module(&self, plugin_id: &str, new_module_path: &Path) -> PluginResult<()> {
        if self.config.keep_backup {
            if let Some(current) = self.sandbox.module_path(plugin_id) {
                self.backup_module(plugin_id, &current)?;
            }
        }

        // Snapshot before destroy so the new sandbox inherits permissions
        // and memory limits from the old one.
        let prior_config = self.sandbox.configuration(plugin_id);

        let shutdown_budget = Duration::from_secs(self.config.shutdown_timeout_seconds);
        tokio::time::timeout(shutdown_budget, self.sandbox.unload_plugin(plugin_id))
            .await
            .map_err(|_| {
                PluginError::reload_failed(format!(
                    "Unload of '{}' exceeded {} seconds",
                    plugin_id,
                    shutdown_budget.as_secs()
                ))
            })?
            .map_err(|e| {
                PluginError::reload_failed(format!("Failed to unload '{}': {}", plugin_id, e))
            })?;
        self.sandbox.destroy_sandbox(plugin_id).await.map_err(|e| {
            PluginError::reload_failed(format!("Failed to destroy sandbox for '{}': {}", plugin_id, e))
        })?;

        self.sandbox
            .create_sandbox(plugin_id, new_module_path, prior_config.unwrap_or_default())
            .map_err(|e| {
                PluginError::reload_failed(format!(
                    "Failed to create sandbox for '{}' at {}: {}",
                    plugin_id,
                    new_module_path.display(),
                    e
                ))
            })?;
        self.sandbox.load_plugin(plugin_id).await.map_err(|e| {
            PluginError::reload_failed(format!("Failed to load '{}': {}", plugin_id, e))
        })?;

        Ok(())
    }

    /// Serialize and persist the plugin's state, if it is stateful
    ///
    /// Returns true when a state record was written.
    pub async fn save_plugin_state(&self, plugin_id: &str) -> PluginResult<bool> {
        let budget = Duration::from_secs(self.config.state_serialization_timeout_seconds);
        let snapshot = tokio::time::timeout(
            budget,
            self.sandbox.with_plugin(plugin_id, |plugin| {
                let plugin_version = plugin.version().to_string();
                match plugin.as_stateful() {
                    Some(stateful) => Ok(Some((
                        stateful.serialize_state()?,
                        stateful.state_version(),
                        plugin_version,
                    ))),
                    None => Ok(None),
                }
            }),
        )
        .await
        .map_err(|_| {
            PluginError::timeout(format!(
                "State serialization for '{}' exceeded {} seconds",
                plugin_id,
                budget.as_secs()
            ))
        })??;

        let Some((bytes, state_version, plugin_version)) = snapshot else {
            log::debug!("Plugin '{}' is not stateful, nothing to save", plugin_id);
            return Ok(false);
        };

        self.state_store
            .save_state(PluginStateData {
                plugin_id: plugin_id.to_string(),
                state_bytes: Some(bytes),
                state_version,
                saved_at: Utc::now(),
                plugin_version,
                metadata: HashMap::new(),
            })
            .await?;
        Ok(true)
    }

    /// Feed saved state into the (freshly loaded) plugin instance
    ///
    /// Returns true when the plugin accepted the state.
    async fn restore_plugin_state(&self, plugin_id: &str) -> PluginResult<bool> {
        let Some(state) = self.state_store.get_saved_state(plugin_id) else {
            return Ok(false);
        };
        let Some(bytes) = state.state_bytes else {
            return Ok(false);
        };

        let previous_version = state.plugin_version;
        self.sandbox
            .with_plugin(plugin_id, move |plugin| match plugin.as_stateful_mut() {
                Some(stateful) => stateful.deserialize_state(&bytes, &previous_version),
                None => Ok(false),
            })
            .await
    }

    /// Fetch a plugin's saved state record
    pub fn get_saved_state(&self, plugin_id: &str) -> Option<PluginStateData> {
        self.state_store.get_saved_state(plugin_id)
    }

    /// Remove a plugin's saved state record
    pub fn clear_saved_state(&self, plugin_id: &str) -> PluginResult<()> {
        self.state_store.clear_saved_state(plugin_id)
    }

    /// The durable state store (exposed for host restart handling)
    pub fn state_store(&self) -> &PluginStateStore {
        &self.state_store
    }

    /// Back up the plugin's current module and same-stem sibling artifacts
    pub fn create_backup(&self, plugin_id: &str) -> PluginResult<PathBuf> {
        let module_path = self
            .sandbox
            .module_path(plugin_id)
            .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;
        self.backup_module(plugin_id, &module_path)
    }

    fn backup_module(&self, plugin_id: &str, module_path: &Path) -> PluginResult<PathBuf> {
        let stem = module_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                PluginError::reload_failed(format!(
                    "Module path {} has no file stem",
                    module_path.display()
                ))
            })?;
        let module_ext = module_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();

        let backup_dir = self.backup_root.join(plugin_id);
        std::fs::create_dir_all(&backup_dir)?;

        let timestamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let backup_path = backup_dir.join(format!("{}_{}.{}", stem, timestamp, module_ext));
        std::fs::copy(module_path, &backup_path)?;

        // Sibling artifacts sharing the module's base name travel with it.
        if let Some(parent) = module_path.parent() {
            for entry in std::fs::read_dir(parent)?.flatten() {
                let sibling = entry.path();
                if sibling == *module_path || !sibling.is_file() {
                    continue;
                }
                let same_stem = sibling
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s == stem)
                    .unwrap_or(false);
                if !same_stem {
                    continue;
                }
                let ext = sibling.extension().and_then(|e| e.to_str()).unwrap_or("bin");
                let target = backup_dir.join(format!("{}_{}.{}", stem, timestamp, ext));
                if let Err(e) = std::fs::copy(&sibling, &target) {
                    log::warn!(
                        "Could not back up sibling artifact {}: {}",
                        sibling.display(),
                        e
                    );
                }
            }
        }

        self.prune_backups(&backup_dir, &module_ext)?;
        log::debug!(
            "Backed up module for '{}' to {}",
            plugin_id,
            backup_path.display()
        );
        Ok(backup_path)
    }

    /// Delete the oldest backups beyond the retention count
    fn prune_backups(&self, backup_dir: &Path, module_ext: &str) -> PluginResult<()> {
        let mut module_backups: Vec<PathBuf> = std::fs::read_dir(backup_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e == module_ext)
                        .unwrap_or(false)
            })
            .collect();

        // Timestamped names sort chronologically.
        module_backups.sort();

        while module_backups.len() > self.config.max_backup_count {
            let oldest = module_backups.remove(0);
            let oldest_stem = oldest
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            log::debug!("Pruning backup {}", oldest.display());

            // Remove the module backup and its same-timestamp siblings.
            for entry in std::fs::read_dir(backup_dir)?.flatten() {
                let path = entry.path();
                let matches = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s == oldest_stem)
                    .unwrap_or(false);
                if matches {
                    if let Err(e) = std::fs::remove_file(&path) {
                        log::warn!("Could not prune backup {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(())
    }

    /// List a plugin's module backups, newest first
    pub fn get_backups(&self, plugin_id: &str) -> Vec<PathBuf> {
        let backup_dir = self.backup_root.join(plugin_id);
        let module_ext = self
            .sandbox
            .module_path(plugin_id)
            .and_then(|p| p.extension().and_then(|e| e.to_str()).map(String::from));

        let Ok(entries) = std::fs::read_dir(&backup_dir) else {
            return Vec::new();
        };

        let mut backups: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| match &module_ext {
                Some(ext) => path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e == ext)
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        backups.sort();
        backups.reverse();
        backups
    }

    /// Reload the plugin from a backup module
    pub async fn restore_from_backup(
        &self,
        plugin_id: &str,
        backup_path: &Path,
    ) -> ReloadOutcome {
        log::info!(
            "Restoring plugin '{}' from backup {}",
            plugin_id,
            backup_path.display()
        );
        self.reload_plugin(plugin_id, backup_path).await
    }

    /// Watch a plugin's module file and reload on change
    ///
    /// Only active when `auto_reload_on_change` is configured; a change is
    /// debounced by `reload_delay_ms` so a partially-written module is not
    /// picked up.
    pub fn start_watching(self: &Arc<Self>, plugin_id: &str, path: &Path) -> PluginResult<()> {
        if !self.config.enabled || !self.config.auto_reload_on_change {
            log::debug!(
                "Not watching '{}': auto reload on change is disabled",
                plugin_id
            );
            return Ok(());
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                match result {
                    Ok(event) => {
                        if matches!(
                            event.kind,
                            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                        ) {
                            let _ = tx.send(());
                        }
                    }
                    Err(e) => log::warn!("File watcher error: {}", e),
                }
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        let manager = Arc::clone(self);
        let id = plugin_id.to_string();
        let watch_path = path.to_path_buf();
        let delay = Duration::from_millis(self.config.reload_delay_ms);

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                manager.events.emit(&HotReloadEvent::FileChanged {
                    plugin_id: id.clone(),
                    path: watch_path.clone(),
                });

                // Wait until the file has been quiet for the whole delay.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => break,
                        more = rx.recv() => {
                            if more.is_none() {
                                return;
                            }
                        }
                    }
                }

                let outcome = manager.reload_plugin(&id, &watch_path).await;
                if !outcome.success {
                    log::warn!(
                        "Auto reload of '{}' failed: {}",
                        id,
                        outcome.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        });

        let mut watchers = self.watchers.lock();
        if let Some(previous) = watchers.insert(
            plugin_id.to_string(),
            WatcherHandle {
                _watcher: watcher,
                task,
            },
        ) {
            previous.task.abort();
        }
        log::info!("Watching {} for '{}'", path.display(), plugin_id);
        Ok(())
    }

    /// Dispose the watcher for a plugin id
    pub fn stop_watching(&self, plugin_id: &str) {
        if let Some(handle) = self.watchers.lock().remove(plugin_id) {
            handle.task.abort();
            log::info!("Stopped watching '{}'", plugin_id);
        }
    }

    /// Whether a watcher is attached for the id
    pub fn is_watching(&self, plugin_id: &str) -> bool {
        self.watchers.lock().contains_key(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_defaults() {
        let config = HotReloadConfiguration::default();
        assert!(config.enabled);
        assert!(!config.auto_reload_on_change);
        assert!(config.restore_state);
        assert!(config.keep_backup);
        assert_eq!(config.max_backup_count, 5);
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ReloadOutcome::succeeded(Duration::from_millis(42), true);
        assert!(ok.success);
        assert!(ok.state_restored);
        assert!(ok.error_message.is_none());

        let bad = ReloadOutcome::failed("step 5 exploded", Duration::from_millis(7));
        assert!(!bad.success);
        assert!(!bad.state_restored);
        assert_eq!(bad.error_message.as_deref(), Some("step 5 exploded"));
    }
}
