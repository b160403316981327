use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Yaml},
};
use qingyan_types::{AgentCredentials, CredentialSource};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// Prefix for environment overrides; nested keys are split on `__`.
pub const ENV_PREFIX: &str = "QINGYAN_";

fn default_greeting() -> String {
    "你好".to_string()
}

/// Upstream endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the assistant API, e.g. `https://chatglm.cn/chatglm/assistant-api/v1`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Prompt sent in place of a blank one, and used to open conversations.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_secret: None,
            greeting: default_greeting(),
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("greeting", &self.greeting)
            .finish()
    }
}

impl AgentConfig {
    #[must_use]
    pub fn credentials(&self) -> AgentCredentials {
        AgentCredentials {
            base_url: self.url.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
        }
    }
}

fn default_connect_secs() -> u64 {
    10
}
fn default_request_secs() -> u64 {
    30
}
fn default_stream_secs() -> u64 {
    300
}
fn default_bootstrap_secs() -> u64 {
    15
}
fn default_shutdown_grace_secs() -> u64 {
    2
}

/// Network and wait deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// End-to-end limit for token exchange and aggregate dialog calls.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    /// End-to-end limit for a streamed chat turn.
    #[serde(default = "default_stream_secs")]
    pub stream_secs: u64,
    /// Deadline for capturing a conversation id.
    #[serde(default = "default_bootstrap_secs")]
    pub bootstrap_secs: u64,
    /// How long shutdown waits for in-flight sessions before cancelling them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
            stream_secs: default_stream_secs(),
            bootstrap_secs: default_bootstrap_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
    #[must_use]
    pub fn stream(&self) -> Duration {
        Duration::from_secs(self.stream_secs)
    }
    #[must_use]
    pub fn bootstrap(&self) -> Duration {
        Duration::from_secs(self.bootstrap_secs)
    }
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_level() -> String {
    "info".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file; rotated daily.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads configuration from a file path, merged with defaults and then
    /// with `QINGYAN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &std::path::Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Loads configuration from defaults and environment variables only.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if an environment value has the wrong type.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

impl CredentialSource for Config {
    fn credentials(&self) -> AgentCredentials {
        self.agent.credentials()
    }
}
