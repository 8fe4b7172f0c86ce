//! Mock Plugin Implementations for Testing
//!
//! Mock plugins with lifecycle recording, failure injection, and an
//! optional stateful variant for reload round-trips.

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::{Plugin, PluginDependency, StatefulPlugin};

/// Basic mock plugin recording its lifecycle calls
pub struct MockPlugin {
    id: String,
    name: String,
    version: String,
    dependencies: Vec<PluginDependency>,
    fail_on_install: bool,
    lifecycle: Arc<Mutex<Vec<String>>>,
}

impl MockPlugin {
    /// Create a mock plugin with the given id and version
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Mock {}", id),
            version: version.to_string(),
            dependencies: Vec::new(),
            fail_on_install: false,
            lifecycle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make `on_installed` fail
    pub fn failing_install(mut self) -> Self {
        self.fail_on_install = true;
        self
    }

    /// Declare a dependency
    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Shared handle to the recorded lifecycle calls
    pub fn lifecycle_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.lifecycle)
    }

    fn record(&self, call: &str) {
        self.lifecycle.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock plugin for runtime tests"
    }

    fn icon(&self) -> &str {
        "mock-icon"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<PluginDependency> {
        self.dependencies.clone()
    }

    async fn on_installed(&mut self) -> PluginResult<()> {
        self.record("on_installed");
        if self.fail_on_install {
            return Err(PluginError::initialization_failed("install rigged to fail"));
        }
        Ok(())
    }

    async fn on_uninstalled(&mut self) -> PluginResult<()> {
        self.record("on_uninstalled");
        Ok(())
    }

    async fn on_shutdown(&mut self) -> PluginResult<()> {
        self.record("on_shutdown");
        Ok(())
    }

    async fn stop(&mut self) -> PluginResult<()> {
        self.record("stop");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CounterState {
    counter: u64,
    label: String,
}

/// Stateful mock plugin carrying a counter across reloads
pub struct StatefulMockPlugin {
    inner: MockPlugin,
    state: CounterState,
    fail_serialize: bool,
    reject_restore: bool,
    restored_from: Option<String>,
}

impl StatefulMockPlugin {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            inner: MockPlugin::new(id, version),
            state: CounterState::default(),
            fail_serialize: false,
            reject_restore: false,
            restored_from: None,
        }
    }

    /// Make `serialize_state` fail
    pub fn failing_serialize(mut self) -> Self {
        self.fail_serialize = true;
        self
    }

    /// Make `deserialize_state` discard any offered state
    pub fn rejecting_restore(mut self) -> Self {
        self.reject_restore = true;
        self
    }

    pub fn set_counter(&mut self, counter: u64) {
        self.state.counter = counter;
    }

    pub fn counter(&self) -> u64 {
        self.state.counter
    }

    pub fn set_label(&mut self, label: &str) {
        self.state.label = label.to_string();
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    /// The plugin version the restored state came from, if any
    pub fn restored_from(&self) -> Option<&str> {
        self.restored_from.as_deref()
    }
}

#[async_trait]
impl Plugin for StatefulMockPlugin {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        "Stateful mock plugin for reload tests"
    }

    fn icon(&self) -> &str {
        self.inner.icon()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn on_installed(&mut self) -> PluginResult<()> {
        self.inner.on_installed().await
    }

    async fn on_uninstalled(&mut self) -> PluginResult<()> {
        self.inner.on_uninstalled().await
    }

    async fn on_shutdown(&mut self) -> PluginResult<()> {
        self.inner.on_shutdown().await
    }

    fn as_stateful(&self) -> Option<&dyn StatefulPlugin> {
        Some(self)
    }

    fn as_stateful_mut(&mut self) -> Option<&mut dyn StatefulPlugin> {
        Some(self)
    }
}

impl StatefulPlugin for StatefulMockPlugin {
    fn serialize_state(&self) -> PluginResult<Vec<u8>> {
        if self.fail_serialize {
            return Err(PluginError::state_error("serialization rigged to fail"));
        }
        Ok(serde_json::to_vec(&self.state)?)
    }

    fn deserialize_state(&mut self, bytes: &[u8], previous_version: &str) -> PluginResult<bool> {
        if self.reject_restore {
            return Ok(false);
        }
        self.state = serde_json::from_slice(bytes)?;
        self.restored_from = Some(previous_version.to_string());
        Ok(true)
    }

    fn state_version(&self) -> u32 {
        1
    }
}
