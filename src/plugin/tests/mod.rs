//! Plugin Runtime Tests
//!
//! Scenario tests for the runtime, driven by mock plugin implementations.

pub mod mock_plugins;
