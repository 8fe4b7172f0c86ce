//! Plugin Updates
//!
//! Periodic and on-demand update checks against a plugin repository, with
//! a durable record of the last successful check so restarts do not reset
//! the check cadence. Checks are single-flight: a check already in
//! progress absorbs concurrent requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use super::error::{PluginError, PluginResult};
use super::events::ObserverSet;
use super::version::{PluginManifest, PluginUpdateInfo, VersionChecker};

/// File name of the persisted update-check record
pub const UPDATE_STATE_FILE: &str = "update_check.json";

/// Source of plugin manifests and module downloads
#[async_trait]
pub trait PluginRepository: Send + Sync {
    /// Fetch the manifests of all published plugins
    async fn fetch_manifests(&self) -> PluginResult<Vec<PluginManifest>>;

    /// Download the module a manifest describes, returning its local path
    async fn download_plugin(&self, manifest: &PluginManifest) -> PluginResult<PathBuf>;
}

/// Provider of the currently installed plugin versions, keyed by plugin id
pub type InstalledVersions = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// Update check behavior
#[derive(Debug, Clone)]
pub struct UpdateConfiguration {
    /// Run a check shortly after startup and on a periodic timer
    pub auto_check_enabled: bool,

    /// Minimum interval between automatic checks
    pub check_frequency: Duration,
}

impl Default for UpdateConfiguration {
    fn default() -> Self {
        Self {
            auto_check_enabled: true,
            check_frequency: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Events raised by the update manager
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// A check found newer versions for installed plugins
    UpdatesFound(Vec<PluginUpdateInfo>),

    /// A check failed; the last-checked record is untouched
    UpdateCheckFailed { message: String },

    /// A check completed successfully
    UpdateCheckCompleted {
        updates_found: usize,
        checked_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpdateCheckRecord {
    last_checked: DateTime<Utc>,
}

/// Coordinates update checks against a [`PluginRepository`]
pub struct PluginUpdateManager {
    config: UpdateConfiguration,
    repository: Arc<dyn PluginRepository>,
    installed_versions: InstalledVersions,
    version_checker: VersionChecker,
    state_path: PathBuf,
    last_manifests: Mutex<Vec<PluginManifest>>,
    // Single-flight: one permit, so overlapping checks serialize.
    check_gate: tokio::sync::Semaphore,
    shutdown: CancellationToken,
    events: Arc<ObserverSet<UpdateEvent>>,
}

impl PluginUpdateManager {
    /// Create a manager persisting its check record under `state_dir`
    pub fn new(
        config: UpdateConfiguration,
        repository: Arc<dyn PluginRepository>,
        installed_versions: InstalledVersions,
        version_checker: VersionChecker,
        state_dir: &Path,
    ) -> Self {
        Self {
            config,
            repository,
            installed_versions,
            version_checker,
            state_path: state_dir.join(UPDATE_STATE_FILE),
            last_manifests: Mutex::new(Vec::new()),
            check_gate: tokio::sync::Semaphore::new(1),
            shutdown: CancellationToken::new(),
            events: Arc::new(ObserverSet::new()),
        }
    }

    /// Observer registration for update events
    pub fn events(&self) -> &ObserverSet<UpdateEvent> {
        &self.events
    }

    /// When the last successful check ran, if any
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        let contents = std::fs::read(&self.state_path).ok()?;
        serde_json::from_slice::<UpdateCheckRecord>(&contents)
            .ok()
            .map(|record| record.last_checked)
    }

    fn record_check(&self, checked_at: DateTime<Utc>) -> PluginResult<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&UpdateCheckRecord {
            last_checked: checked_at,
        })?;
        std::fs::write(&self.state_path, json)?;
        Ok(())
    }

    /// Check the repository for updates to installed plugins
    ///
    /// On success the last-checked record is persisted and events are
    /// raised; on failure only `UpdateCheckFailed` fires and the record
    /// keeps its previous value.
    pub async fn check_for_updates(&self) -> PluginResult<Vec<PluginUpdateInfo>> {
        let _permit = self.check_gate.acquire().await.map_err(|_| {
            PluginError::update_failed("Update manager is shutting down")
        })?;

        log::info!("Checking for plugin updates");
        let manifests = match self.repository.fetch_manifests().await {
            Ok(manifests) => manifests,
            Err(e) => {
                log::warn!("Update check failed: {}", e);
                self.events.emit(&UpdateEvent::UpdateCheckFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let installed = (self.installed_versions)();
        let updates = self
            .version_checker
            .get_available_updates(&installed, &manifests);

        *self.last_manifests.lock() = manifests;

        let checked_at = Utc::now();
        if let Err(e) = self.record_check(checked_at) {
            log::warn!("Could not persist update check record: {}", e);
        }

        log::info!(
            "Update check complete: {} update(s) available",
            updates.len()
        );
        if !updates.is_empty() {
            self.events.emit(&UpdateEvent::UpdatesFound(updates.clone()));
        }
        self.events.emit(&UpdateEvent::UpdateCheckCompleted {
            updates_found: updates.len(),
            checked_at,
        });

        Ok(updates)
    }

    /// Download the newest published module for a plugin
    ///
    /// Uses the manifests from the most recent check, running a fresh
    /// check if none are cached.
    pub async fn install_update(&self, plugin_id: &str) -> PluginResult<PathBuf> {
        let cached = self
            .last_manifests
            .lock()
            .iter()
            .find(|m| m.id.eq_ignore_ascii_case(plugin_id))
            .cloned();

        let manifest = match cached {
            Some(manifest) => manifest,
            None => {
                self.check_for_updates().await?;
                self.last_manifests
                    .lock()
                    .iter()
                    .find(|m| m.id.eq_ignore_ascii_case(plugin_id))
                    .cloned()
                    .ok_or_else(|| {
                        PluginError::update_failed(format!(
                            "No published manifest for plugin '{}'",
                            plugin_id
                        ))
                    })?
            }
        };

        log::info!(
            "Downloading '{}' v{} from {}",
            manifest.id,
            manifest.version,
            manifest.download_url
        );
        self.repository.download_plugin(&manifest).await
    }

    /// Whether the configured check interval has elapsed
    pub fn check_is_due(&self) -> bool {
        match self.last_checked() {
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed.to_std().map(|d| d >= self.config.check_frequency).unwrap_or(true)
            }
            None => true,
        }
    }

    /// Fire-and-forget check at startup; failures are logged only
    pub fn spawn_startup_check(self: &Arc<Self>) {
        if !self.config.auto_check_enabled {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if !manager.check_is_due() {
                log::debug!("Skipping startup update check, interval not elapsed");
                return;
            }
            if let Err(e) = manager.check_for_updates().await {
                log::warn!("Startup update check failed: {}", e);
            }
        });
    }

    /// Periodic checker: wakes daily, checks when the interval has elapsed
    pub fn spawn_periodic_check(self: &Arc<Self>) {
        if !self.config.auto_check_enabled {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let tick = Duration::from_secs(24 * 60 * 60);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {}
                }
                if !manager.check_is_due() {
                    continue;
                }
                if let Err(e) = manager.check_for_updates().await {
                    log::warn!("Periodic update check failed: {}", e);
                }
            }
            log::debug!("Periodic update checker stopped");
        });
    }

    /// Stop background checkers
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
