//! Plugin Error Types
//!
//! Error taxonomy for the plugin runtime. Resolution and reload failures are
//! returned as data; sandbox violations are classified here so the sandbox
//! can report them via events rather than letting them escape.

use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Error types for plugin runtime operations
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// Plugin initialization failed
    #[error("Plugin initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Plugin execution error
    #[error("Plugin execution error: {message}")]
    ExecutionFailed { message: String },

    /// Plugin not found
    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// A sandbox already exists for this plugin id
    #[error("Sandbox already exists for plugin: {plugin_id}")]
    SandboxAlreadyExists { plugin_id: String },

    /// No sandbox exists for this plugin id
    #[error("No sandbox exists for plugin: {plugin_id}")]
    SandboxNotFound { plugin_id: String },

    /// Plugin module file missing or unreadable
    #[error("Plugin module not found: {path}")]
    ModuleNotFound { path: String },

    /// Plugin module loading error
    #[error("Plugin loading error: {message}")]
    LoadingFailed { message: String },

    /// Plugin attempted something outside its isolation boundary
    #[error("Sandbox violation: {message}")]
    SandboxViolation { message: String },

    /// Plugin attempted a permission-gated operation it does not hold
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Version compatibility error
    #[error("Version compatibility error: {message}")]
    VersionIncompatible { message: String },

    /// Plugin dependency error
    #[error("Plugin dependency error: {message}")]
    DependencyError { message: String },

    /// Configuration error
    #[error("Plugin configuration error: {message}")]
    ConfigurationError { message: String },

    /// State serialization/persistence error
    #[error("Plugin state error: {message}")]
    StateError { message: String },

    /// Hot reload protocol error
    #[error("Plugin reload error: {message}")]
    ReloadFailed { message: String },

    /// File watcher error
    #[error("Plugin watch error: {message}")]
    WatchError { message: String },

    /// Update check / repository error
    #[error("Plugin update error: {message}")]
    UpdateFailed { message: String },

    /// Async operation error
    #[error("Async operation error: {message}")]
    AsyncError { message: String },

    /// Invalid plugin state
    #[error("Invalid plugin state: {message}")]
    InvalidState { message: String },

    /// Timeout error
    #[error("Plugin operation timed out: {message}")]
    Timeout { message: String },

    /// Generic plugin error
    #[error("Plugin error: {message}")]
    Generic { message: String },
}

impl PluginError {
    /// Create an initialization error
    pub fn initialization_failed<S: Into<String>>(message: S) -> Self {
        Self::InitializationFailed { message: message.into() }
    }

    /// Create an execution error
    pub fn execution_failed<S: Into<String>>(message: S) -> Self {
        Self::ExecutionFailed { message: message.into() }
    }

    /// Create a plugin not found error
    pub fn plugin_not_found<S: Into<String>>(plugin_id: S) -> Self {
        Self::PluginNotFound { plugin_id: plugin_id.into() }
    }

    /// Create a sandbox already exists error
    pub fn sandbox_already_exists<S: Into<String>>(plugin_id: S) -> Self {
        Self::SandboxAlreadyExists { plugin_id: plugin_id.into() }
    }

    /// Create a sandbox not found error
    pub fn sandbox_not_found<S: Into<String>>(plugin_id: S) -> Self {
        Self::SandboxNotFound { plugin_id: plugin_id.into() }
    }

    /// Create a module not found error
    pub fn module_not_found<S: Into<String>>(path: S) -> Self {
        Self::ModuleNotFound { path: path.into() }
    }

    /// Create a loading failed error
    pub fn loading_failed<S: Into<String>>(message: S) -> Self {
        Self::LoadingFailed { message: message.into() }
    }

    /// Create a sandbox violation error
    pub fn sandbox_violation<S: Into<String>>(message: S) -> Self {
        Self::SandboxViolation { message: message.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Create a version incompatible error
    pub fn version_incompatible<S: Into<String>>(message: S) -> Self {
        Self::VersionIncompatible { message: message.into() }
    }

    /// Create a dependency error
    pub fn dependency_error<S: Into<String>>(message: S) -> Self {
        Self::DependencyError { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Create a state error
    pub fn state_error<S: Into<String>>(message: S) -> Self {
        Self::StateError { message: message.into() }
    }

    /// Create a reload failed error
    pub fn reload_failed<S: Into<String>>(message: S) -> Self {
        Self::ReloadFailed { message: message.into() }
    }

    /// Create a watch error
    pub fn watch_error<S: Into<String>>(message: S) -> Self {
        Self::WatchError { message: message.into() }
    }

    /// Create an update failed error
    pub fn update_failed<S: Into<String>>(message: S) -> Self {
        Self::UpdateFailed { message: message.into() }
    }

    /// Create an async error
    pub fn async_error<S: Into<String>>(message: S) -> Self {
        Self::AsyncError { message: message.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout { message: message.into() }
    }

    /// Create a generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic { message: message.into() }
    }

    /// Check if this error shape is a sandbox isolation violation
    ///
    /// Violations are reported through the sandbox event channel and counted
    /// against the plugin; ordinary failures are not.
    pub fn is_violation(&self) -> bool {
        matches!(self,
            PluginError::SandboxViolation { .. } |
            PluginError::PermissionDenied { .. }
        )
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            PluginError::ExecutionFailed { .. } |
            PluginError::AsyncError { .. } |
            PluginError::Timeout { .. } |
            PluginError::UpdateFailed { .. }
        )
    }

    /// Check if error is a configuration issue
    pub fn is_configuration_error(&self) -> bool {
        matches!(self,
            PluginError::ConfigurationError { .. } |
            PluginError::VersionIncompatible { .. } |
            PluginError::DependencyError { .. }
        )
    }

    /// Check if error is related to plugin lifecycle
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self,
            PluginError::InitializationFailed { .. } |
            PluginError::PluginNotFound { .. } |
            PluginError::SandboxAlreadyExists { .. } |
            PluginError::SandboxNotFound { .. } |
            PluginError::ModuleNotFound { .. } |
            PluginError::LoadingFailed { .. } |
            PluginError::InvalidState { .. }
        )
    }
}

// Allow conversion from common error types
impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::generic(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::state_error(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for PluginError {
    fn from(err: tokio::task::JoinError) -> Self {
        PluginError::async_error(format!("Task join error: {}", err))
    }
}

impl From<notify::Error> for PluginError {
    fn from(err: notify::Error) -> Self {
        PluginError::watch_error(format!("Watcher error: {}", err))
    }
}
