//! Configuration loading and hot-reloading for the qingyan relay.
//!
//! Uses figment for YAML-based configuration with sensible defaults and
//! `QINGYAN_`-prefixed environment overrides, and notify + arc-swap for live
//! file watching.

pub mod schema;
pub mod watcher;

pub use schema::{AgentConfig, Config, LogConfig, LogFormat, TimeoutConfig};
pub use watcher::ConfigWatcher;
