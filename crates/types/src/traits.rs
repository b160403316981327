//! Traits shared across all qingyan crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `qingyan-types`, not on each other.

use crate::{Credential, RelayError, error::Result};
use async_trait::async_trait;
use std::fmt;

/// Upstream endpoint and key pair, as supplied by configuration.
///
/// Any field may be absent; absence is reported when the values are needed,
/// never when they are loaded.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AgentCredentials {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl AgentCredentials {
    /// Base URL with surrounding whitespace and trailing slashes removed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the URL is absent or blank.
    pub fn base_url(&self) -> Result<&str> {
        non_blank(self.base_url.as_deref())
            .map(|u| u.trim_end_matches('/'))
            .ok_or_else(|| RelayError::Config("missing agent.url".into()))
    }

    /// The `(api_key, api_secret)` pair, trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if either value is absent or blank.
    pub fn key_pair(&self) -> Result<(&str, &str)> {
        match (
            non_blank(self.api_key.as_deref()),
            non_blank(self.api_secret.as_deref()),
        ) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(RelayError::Config(
                "missing agent.api_key or agent.api_secret".into(),
            )),
        }
    }
}

impl fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Supplies the current upstream credentials. Read on every token fetch so
/// that rotated keys take effect at the next refresh.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> AgentCredentials;
}

impl CredentialSource for AgentCredentials {
    fn credentials(&self) -> AgentCredentials {
        self.clone()
    }
}

/// Exchanges the configured key pair for a fresh bearer [`Credential`].
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Perform the credential exchange.
    ///
    /// # Errors
    ///
    /// Returns a typed [`RelayError`] for configuration, transport, HTTP and
    /// protocol failures; implementations never panic on expected failures.
    async fn fetch(&self) -> Result<Credential>;
}
