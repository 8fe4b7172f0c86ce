//! Plugin Sandbox
//!
//! Owns the isolation boundary and lifecycle for each plugin's loaded
//! module: one sandbox per plugin id, permission bitmask checks, guarded
//! execution with timeout and violation classification, and a background
//! resource monitor per loaded plugin.
//!
//! Isolation here is a logical module boundary with advisory permission
//! checks, not a hardened security boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use super::error::{PluginError, PluginResult};
use super::events::ObserverSet;
use super::module::{ModuleHost, PluginModule};
use super::traits::Plugin;

bitflags! {
    /// Coarse capability flags granted to a sandboxed plugin
    ///
    /// Advisory: `has_permission` answers the question, callers perform the
    /// gated work.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PluginPermissions: u32 {
        const NONE = 0;
        const FILE_SYSTEM_READ = 1 << 0;
        const FILE_SYSTEM_WRITE = 1 << 1;
        const NETWORK_ACCESS = 1 << 2;
        const REGISTRY_READ = 1 << 3;
        const REGISTRY_WRITE = 1 << 4;
        const SYSTEM_INFORMATION = 1 << 5;
        const HARDWARE_ACCESS = 1 << 6;
        const UI_CUSTOMIZATION = 1 << 7;
        const INTER_PLUGIN_COMMUNICATION = 1 << 8;
        const ALL = (1 << 9) - 1;
    }
}

/// Per-sandbox configuration: permissions, soft resource limits, and the
/// execution timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfiguration {
    /// Granted permission bitmask
    pub permissions: PluginPermissions,

    /// Soft memory ceiling; execution is refused once usage exceeds it
    pub max_memory_mb: u64,

    /// Soft CPU ceiling, advisory only
    pub max_cpu_percentage: f32,

    /// Paths the plugin may touch (advisory, consulted by callers)
    pub allowed_paths: Vec<PathBuf>,

    /// Paths the plugin must not touch
    pub blocked_paths: Vec<PathBuf>,

    /// Remote hosts the plugin may contact
    pub allowed_hosts: Vec<String>,

    /// Whether the plugin may load further modules at runtime
    pub allow_dynamic_module_loading: bool,

    /// Whether the plugin may inspect host type information
    pub allow_type_introspection: bool,

    /// Budget for a single sandboxed async operation
    pub operation_timeout_seconds: u64,
}

impl Default for SandboxConfiguration {
    fn default() -> Self {
        Self {
            permissions: PluginPermissions::FILE_SYSTEM_READ
                | PluginPermissions::SYSTEM_INFORMATION,
            max_memory_mb: 256,
            max_cpu_percentage: 25.0,
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            allowed_hosts: Vec::new(),
            allow_dynamic_module_loading: false,
            allow_type_introspection: false,
            operation_timeout_seconds: 30,
        }
    }
}

/// Snapshot of one sandbox, assembled on request
#[derive(Debug, Clone)]
pub struct SandboxedPluginInfo {
    pub plugin_id: String,
    pub plugin_name: String,
    pub version: String,
    pub configuration: SandboxConfiguration,
    pub memory_usage_bytes: u64,
    pub is_active: bool,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Running counters for one sandbox, updated by its monitor loop
#[derive(Debug, Clone, Default)]
pub struct ResourceStats {
    pub current_memory_bytes: u64,
    pub peak_memory_bytes: u64,
    pub cpu_percentage: f32,
    pub operation_count: u64,
    pub total_latency_ms: u64,
    pub violation_count: u64,
}

impl ResourceStats {
    /// Mean operation latency in milliseconds
    pub fn average_latency_ms(&self) -> f64 {
        if self.operation_count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.operation_count as f64
        }
    }
}

/// Outcome of a sandboxed operation
#[derive(Debug, Clone)]
pub struct SandboxExecutionResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_message: Option<String>,
    pub was_blocked: bool,
}

impl<T> SandboxExecutionResult<T> {
    /// Successful execution with a payload
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
            was_blocked: false,
        }
    }

    /// Ordinary failure
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            was_blocked: false,
        }
    }

    /// Refused or cancelled by the sandbox (limit breach, violation, timeout)
    pub fn blocked<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            was_blocked: true,
        }
    }
}

/// Events raised by the sandbox
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    /// A plugin operation matched a known isolation-violation shape
    Violation { plugin_id: String, message: String },

    /// Process memory exceeded a sandbox's soft ceiling (non-interrupting)
    ResourceLimitExceeded {
        plugin_id: String,
        memory_usage_bytes: u64,
        limit_bytes: u64,
    },
}

/// Shared handle to one loaded plugin instance
pub type PluginInstance = Arc<tokio::sync::Mutex<Box<dyn Plugin>>>;

struct MonitorHandle {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct SandboxEntry {
    module_path: PathBuf,
    config: SandboxConfiguration,
    module: Option<Box<dyn PluginModule>>,
    instance: Option<PluginInstance>,
    stats: Arc<RwLock<ResourceStats>>,
    monitor: Option<MonitorHandle>,
    plugin_name: String,
    version: String,
    loaded_at: Option<DateTime<Utc>>,
}

impl SandboxEntry {
    fn is_loaded(&self) -> bool {
        self.instance.is_some()
    }
}

/// Sandbox manager: one isolated execution context per plugin id
///
/// State machine per id: no sandbox → created → loaded → back to created on
/// unload → gone on destroy. At most one active module instance per id.
pub struct PluginSandbox {
    module_host: Arc<dyn ModuleHost>,
    sandboxes: Mutex<HashMap<String, SandboxEntry>>,
    events: Arc<ObserverSet<SandboxEvent>>,
}

impl PluginSandbox {
    /// Create a sandbox manager over the given module-loading boundary
    pub fn new(module_host: Arc<dyn ModuleHost>) -> Self {
        Self {
            module_host,
            sandboxes: Mutex::new(HashMap::new()),
            events: Arc::new(ObserverSet::new()),
        }
    }

    /// Observer registration for sandbox events
    pub fn events(&self) -> &ObserverSet<SandboxEvent> {
        &self.events
    }

    /// Create an isolated context for a plugin
    ///
    /// Fails if a sandbox already exists for the id or the module path is
    /// missing. Does not load any code yet.
    pub fn create_sandbox(
        &self,
        plugin_id: &str,
        module_path: &Path,
        config: SandboxConfiguration,
    ) -> PluginResult<()> {
        if !module_path.exists() {
            return Err(PluginError::module_not_found(module_path.display().to_string()));
        }

        let mut sandboxes = self.sandboxes.lock();
        if sandboxes.contains_key(plugin_id) {
            return Err(PluginError::sandbox_already_exists(plugin_id));
        }

        log::debug!(
            "Created sandbox for '{}' at {}",
            plugin_id,
            module_path.display()
        );
        sandboxes.insert(
            plugin_id.to_string(),
            SandboxEntry {
                module_path: module_path.to_path_buf(),
                config,
                module: None,
                instance: None,
                stats: Arc::new(RwLock::new(ResourceStats::default())),
                monitor: None,
                plugin_name: String::new(),
                version: String::new(),
                loaded_at: None,
            },
        );
        Ok(())
    }

    /// Load the plugin's module and instantiate it inside its sandbox
    ///
    /// Idempotent: a second call for an already-loaded id returns the
    /// existing instance without a second module load.
    pub async fn load_plugin(&self, plugin_id: &str) -> PluginResult<PluginInstance> {
        let mut sandboxes = self.sandboxes.lock();
        let entry = sandboxes
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;

        if let Some(instance) = &entry.instance {
            log::debug!("Plugin '{}' already loaded, returning existing instance", plugin_id);
            return Ok(Arc::clone(instance));
        }

        let module = self.module_host.load_module(&entry.module_path)?;
        let plugin = module.instantiate()?;

        entry.plugin_name = plugin.name().to_string();
        entry.version = plugin.version().to_string();
        entry.loaded_at = Some(Utc::now());

        let instance: PluginInstance = Arc::new(tokio::sync::Mutex::new(plugin));
        entry.module = Some(module);
        entry.instance = Some(Arc::clone(&instance));
        entry.monitor = Some(self.spawn_monitor(
            plugin_id.to_string(),
            Arc::clone(&entry.stats),
            entry.config.max_memory_mb,
        ));

        log::info!(
            "Loaded plugin '{}' v{} into its sandbox",
            plugin_id,
            entry.version
        );
        Ok(instance)
    }

    /// Unload the plugin's instance and module, keeping the sandbox itself
    ///
    /// Runs the plugin's shutdown hooks first; hook failures are logged,
    /// not fatal to the unload.
    pub async fn unload_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let (instance, module, monitor) = {
            let mut sandboxes = self.sandboxes.lock();
            let entry = sandboxes
                .get_mut(plugin_id)
                .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;

            if !entry.is_loaded() {
                return Err(PluginError::invalid_state(format!(
                    "Plugin '{}' is not loaded",
                    plugin_id
                )));
            }

            entry.loaded_at = None;
            (entry.instance.take(), entry.module.take(), entry.monitor.take())
        };

        if let Some(monitor) = monitor {
            monitor.token.cancel();
            monitor.task.abort();
        }

        if let Some(instance) = instance {
            let mut plugin = instance.lock().await;
            if let Err(e) = plugin.on_shutdown().await {
                log::warn!("Plugin '{}' shutdown hook failed: {}", plugin_id, e);
            }
            if let Err(e) = plugin.stop().await {
                log::warn!("Plugin '{}' stop hook failed: {}", plugin_id, e);
            }
        }

        // Dropping the module releases its code (best effort).
        drop(module);
        log::info!("Unloaded plugin '{}'", plugin_id);
        Ok(())
    }

    /// Unload if necessary, then discard all sandbox state for the id
    pub async fn destroy_sandbox(&self, plugin_id: &str) -> PluginResult<()> {
        let loaded = {
            let sandboxes = self.sandboxes.lock();
            let entry = sandboxes
                .get(plugin_id)
                .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;
            entry.is_loaded()
        };

        if loaded {
            self.unload_plugin(plugin_id).await?;
        }

        self.sandboxes.lock().remove(plugin_id);
        log::info!("Destroyed sandbox for '{}'", plugin_id);
        Ok(())
    }

    /// Execute a synchronous operation against the plugin instance
    ///
    /// Refuses execution up front (`was_blocked`) when current memory usage
    /// already exceeds the configured ceiling; the operation body is never
    /// invoked in that case.
    pub async fn execute_in_sandbox<T, F>(
        &self,
        plugin_id: &str,
        op: F,
    ) -> SandboxExecutionResult<T>
    where
        F: FnOnce(&mut dyn Plugin) -> PluginResult<T>,
    {
        let (instance, stats, limit_bytes) = match self.execution_parts(plugin_id) {
            Ok(parts) => parts,
            Err(e) => return SandboxExecutionResult::failed(e.to_string()),
        };

        if let Some(result) = self.memory_precheck(plugin_id, &stats, limit_bytes) {
            return result;
        }

        let start = Instant::now();
        let outcome = {
            let mut guard = instance.lock().await;
            op(&mut **guard)
        };
        self.record_operation(&stats, start.elapsed());
        self.classify_outcome(plugin_id, &stats, outcome)
    }

    /// Execute an asynchronous operation with the configured timeout
    ///
    /// A timeout cancels the pending operation and reports `was_blocked`
    /// without terminating the sandbox.
    pub async fn execute_in_sandbox_async<T, F>(
        &self,
        plugin_id: &str,
        op: F,
    ) -> SandboxExecutionResult<T>
    where
        F: for<'a> FnOnce(&'a mut dyn Plugin) -> BoxFuture<'a, PluginResult<T>>,
    {
        let (instance, stats, limit_bytes) = match self.execution_parts(plugin_id) {
            Ok(parts) => parts,
            Err(e) => return SandboxExecutionResult::failed(e.to_string()),
        };

        if let Some(result) = self.memory_precheck(plugin_id, &stats, limit_bytes) {
            return result;
        }

        let timeout = {
            let sandboxes = self.sandboxes.lock();
            Duration::from_secs(
                sandboxes
                    .get(plugin_id)
                    .map(|e| e.config.operation_timeout_seconds)
                    .unwrap_or(30),
            )
        };

        let start = Instant::now();
        let run = async {
            let mut guard = instance.lock().await;
            op(&mut **guard).await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(outcome) => {
                self.record_operation(&stats, start.elapsed());
                self.classify_outcome(plugin_id, &stats, outcome)
            }
            Err(_) => {
                log::warn!(
                    "Sandboxed operation for '{}' timed out after {:?}",
                    plugin_id,
                    timeout
                );
                SandboxExecutionResult::blocked(format!(
                    "Operation timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
        }
    }

    /// Run a closure against the loaded instance, outside the execution
    /// result contract (used by lifecycle orchestration)
    pub async fn with_plugin<T, F>(&self, plugin_id: &str, f: F) -> PluginResult<T>
    where
        F: FnOnce(&mut dyn Plugin) -> PluginResult<T>,
    {
        let instance = {
            let sandboxes = self.sandboxes.lock();
            let entry = sandboxes
                .get(plugin_id)
                .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;
            entry
                .instance
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| {
                    PluginError::invalid_state(format!("Plugin '{}' is not loaded", plugin_id))
                })?
        };

        let mut guard = instance.lock().await;
        f(&mut **guard)
    }

    /// Pure advisory bitmask test against the sandbox configuration
    pub fn has_permission(&self, plugin_id: &str, permission: PluginPermissions) -> bool {
        self.sandboxes
            .lock()
            .get(plugin_id)
            .map(|entry| entry.config.permissions.contains(permission))
            .unwrap_or(false)
    }

    /// Whether any sandbox exists for the id
    pub fn sandbox_exists(&self, plugin_id: &str) -> bool {
        self.sandboxes.lock().contains_key(plugin_id)
    }

    /// Whether the plugin's module is currently loaded
    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.sandboxes
            .lock()
            .get(plugin_id)
            .map(|entry| entry.is_loaded())
            .unwrap_or(false)
    }

    /// Snapshot of one sandbox
    pub fn sandbox_info(&self, plugin_id: &str) -> Option<SandboxedPluginInfo> {
        let sandboxes = self.sandboxes.lock();
        let entry = sandboxes.get(plugin_id)?;
        let info = SandboxedPluginInfo {
            plugin_id: plugin_id.to_string(),
            plugin_name: entry.plugin_name.clone(),
            version: entry.version.clone(),
            configuration: entry.config.clone(),
            memory_usage_bytes: entry.stats.read().current_memory_bytes,
            is_active: entry.is_loaded(),
            loaded_at: entry.loaded_at,
        };
        Some(info)
    }

    /// The module path a sandbox was created over
    pub fn module_path(&self, plugin_id: &str) -> Option<PathBuf> {
        self.sandboxes
            .lock()
            .get(plugin_id)
            .map(|entry| entry.module_path.clone())
    }

    /// The sandbox's current configuration
    pub fn configuration(&self, plugin_id: &str) -> Option<SandboxConfiguration> {
        self.sandboxes
            .lock()
            .get(plugin_id)
            .map(|entry| entry.config.clone())
    }

    /// Snapshot of a sandbox's resource counters
    pub fn resource_stats(&self, plugin_id: &str) -> Option<ResourceStats> {
        self.sandboxes
            .lock()
            .get(plugin_id)
            .map(|entry| entry.stats.read().clone())
    }

    /// Ids of all existing sandboxes
    pub fn sandbox_ids(&self) -> Vec<String> {
        self.sandboxes.lock().keys().cloned().collect()
    }

    fn execution_parts(
        &self,
        plugin_id: &str,
    ) -> PluginResult<(PluginInstance, Arc<RwLock<ResourceStats>>, u64)> {
        let sandboxes = self.sandboxes.lock();
        let entry = sandboxes
            .get(plugin_id)
            .ok_or_else(|| PluginError::sandbox_not_found(plugin_id))?;
        let instance = entry.instance.as_ref().map(Arc::clone).ok_or_else(|| {
            PluginError::invalid_state(format!("Plugin '{}' is not loaded", plugin_id))
        })?;
        Ok((
            instance,
            Arc::clone(&entry.stats),
            entry.config.max_memory_mb * 1024 * 1024,
        ))
    }

    fn memory_precheck<T>(
        &self,
        plugin_id: &str,
        stats: &Arc<RwLock<ResourceStats>>,
        limit_bytes: u64,
    ) -> Option<SandboxExecutionResult<T>> {
        let current = stats.read().current_memory_bytes;
        if current > limit_bytes {
            log::warn!(
                "Refusing execution for '{}': memory usage {} bytes exceeds limit {} bytes",
                plugin_id,
                current,
                limit_bytes
            );
            return Some(SandboxExecutionResult::blocked(format!(
                "Memory usage {} bytes exceeds limit of {} bytes",
                current, limit_bytes
            )));
        }
        None
    }

    fn record_operation(&self, stats: &Arc<RwLock<ResourceStats>>, elapsed: Duration) {
        let mut stats = stats.write();
        stats.operation_count += 1;
        stats.total_latency_ms += elapsed.as_millis() as u64;
    }

    fn classify_outcome<T>(
        &self,
        plugin_id: &str,
        stats: &Arc<RwLock<ResourceStats>>,
        outcome: PluginResult<T>,
    ) -> SandboxExecutionResult<T> {
        match outcome {
            Ok(data) => SandboxExecutionResult::ok(data),
            Err(e) if e.is_violation() => {
                stats.write().violation_count += 1;
                let message = e.to_string();
                log::warn!("Sandbox violation in '{}': {}", plugin_id, message);
                self.events.emit(&SandboxEvent::Violation {
                    plugin_id: plugin_id.to_string(),
                    message: message.clone(),
                });
                SandboxExecutionResult::blocked(message)
            }
            Err(e) => SandboxExecutionResult::failed(e.to_string()),
        }
    }

    /// Background loop polling process memory once per second
    ///
    /// Limit breaches raise an event without interrupting execution; poll
    /// failures are logged and the loop continues until cancelled.
    fn spawn_monitor(
        &self,
        plugin_id: String,
        stats: Arc<RwLock<ResourceStats>>,
        max_memory_mb: u64,
    ) -> MonitorHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let events = Arc::clone(&self.events);
        let limit_bytes = max_memory_mb * 1024 * 1024;

        let task = tokio::spawn(async move {
            let mut system = sysinfo::System::new();
            let pid = match sysinfo::get_current_pid() {
                Ok(pid) => pid,
                Err(e) => {
                    log::error!("Resource monitor for '{}' cannot resolve pid: {}", plugin_id, e);
                    return;
                }
            };
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        log::debug!("Resource monitor for '{}' cancelled", plugin_id);
                        break;
                    }
                    _ = interval.tick() => {
                        if !system.refresh_process(pid) {
                            log::debug!("Resource monitor for '{}' failed to refresh process", plugin_id);
                            continue;
                        }
                        let Some(process) = system.process(pid) else {
                            continue;
                        };
                        let memory = process.memory();
                        let cpu = process.cpu_usage();
                        {
                            let mut stats = stats.write();
                            stats.current_memory_bytes = memory;
                            stats.cpu_percentage = cpu;
                            if memory > stats.peak_memory_bytes {
                                stats.peak_memory_bytes = memory;
                            }
                        }
                        if memory > limit_bytes {
                            events.emit(&SandboxEvent::ResourceLimitExceeded {
                                plugin_id: plugin_id.clone(),
                                memory_usage_bytes: memory,
                                limit_bytes,
                            });
                        }
                    }
                }
            }
        });

        MonitorHandle { token, task }
    }

    /// Test hook: overwrite a sandbox's observed memory usage
    #[cfg(test)]
    pub(crate) fn set_memory_usage_for_test(&self, plugin_id: &str, bytes: u64) {
        if let Some(entry) = self.sandboxes.lock().get(plugin_id) {
            entry.stats.write().current_memory_bytes = bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bitmask() {
        let granted = PluginPermissions::FILE_SYSTEM_READ | PluginPermissions::NETWORK_ACCESS;
        assert!(granted.contains(PluginPermissions::FILE_SYSTEM_READ));
        assert!(granted.contains(PluginPermissions::NETWORK_ACCESS));
        assert!(!granted.contains(PluginPermissions::REGISTRY_WRITE));
        assert!(PluginPermissions::ALL.contains(granted));
        assert_eq!(PluginPermissions::NONE.bits(), 0);
    }

    #[test]
    fn test_configuration_round_trip() {
        let config = SandboxConfiguration {
            permissions: PluginPermissions::UI_CUSTOMIZATION,
            max_memory_mb: 64,
            ..SandboxConfiguration::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: SandboxConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back.permissions, PluginPermissions::UI_CUSTOMIZATION);
        assert_eq!(back.max_memory_mb, 64);
        assert_eq!(back.operation_timeout_seconds, 30);
    }

    #[test]
    fn test_execution_result_constructors() {
        let ok: SandboxExecutionResult<u32> = SandboxExecutionResult::ok(7);
        assert!(ok.success);
        assert_eq!(ok.data, Some(7));
        assert!(!ok.was_blocked);

        let failed: SandboxExecutionResult<u32> = SandboxExecutionResult::failed("nope");
        assert!(!failed.success);
        assert!(!failed.was_blocked);

        let blocked: SandboxExecutionResult<u32> = SandboxExecutionResult::blocked("limit");
        assert!(!blocked.success);
        assert!(blocked.was_blocked);
    }

    #[test]
    fn test_average_latency() {
        let mut stats = ResourceStats::default();
        assert_eq!(stats.average_latency_ms(), 0.0);

        stats.operation_count = 4;
        stats.total_latency_ms = 100;
        assert_eq!(stats.average_latency_ms(), 25.0);
    }
}
