//! Credential exchange against `POST {base}/get_token`.
//!
//! Upstream answers in one of two shapes, with the token either at the top
//! level or nested under `result`:
//!
//! ```json
//! {"status": 0, "message": "ok", "access_token": "…", "expires_in": 3600}
//! {"status": 0, "message": "ok", "result": {"access_token": "…", "expires_in": 3600}}
//! ```
use async_trait::async_trait;
use qingyan_types::{
    Credential, CredentialSource, RelayError, TokenFetcher,
    error::{Result, body_preview},
};
use reqwest::Client;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};

/// Path of the token endpoint, relative to the configured base URL.
pub const TOKEN_PATH: &str = "/get_token";

/// Maximum characters of an error body written to the log.
const LOG_PREVIEW_CHARS: usize = 2000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse the token endpoint JSON response into a [`Credential`].
///
/// The nested `result` object is preferred when present. A missing `status`
/// field counts as success.
///
/// # Errors
///
/// Returns [`RelayError::Protocol`] (502) if `status` is non-zero or the token
/// is absent or blank, carrying upstream's `message` when it has one.
pub fn parse_token_response(json: &Value) -> Result<Credential> {
    let status = json
        .get("status")
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
        .unwrap_or(0);
    let scope = json.get("result").filter(|r| r.is_object()).unwrap_or(json);
    let token = scope
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match token {
        Some(token) if status == 0 => {
            let expires_in = scope
                .get("expires_in")
                .and_then(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
                .unwrap_or(0);
            Ok(Credential::new(token, expires_in))
        }
        _ => {
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("get_token failed");
            Err(RelayError::Protocol {
                status: 502,
                message: message.to_string(),
            })
        }
    }
}

/// [`TokenFetcher`] backed by the upstream HTTP endpoint.
pub struct HttpTokenFetcher {
    http: Client,
    source: Arc<dyn CredentialSource>,
    timeout: Duration,
}

impl HttpTokenFetcher {
    /// Creates a fetcher that reads credentials from `source` on every call.
    pub fn new(http: Client, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            http,
            source,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the end-to-end request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self) -> Result<Credential> {
        let creds = self.source.credentials();
        let base = creds.base_url()?;
        let (api_key, api_secret) = creds.key_pair()?;

        let resp = self
            .http
            .post(format!("{base}{TOKEN_PATH}"))
            .header("accept", "application/json")
            .timeout(self.timeout)
            .json(&json!({ "api_key": api_key, "api_secret": api_secret }))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "get_token failed");
                RelayError::Http("get_token failed".into())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let preview = body_preview(&body, LOG_PREVIEW_CHARS);
            tracing::warn!(status = status.as_u16(), body = %preview, "get_token upstream HTTP error");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body: preview,
            });
        }

        let raw = resp.text().await.map_err(|e| {
            tracing::warn!(error = %e, "get_token body read failed");
            RelayError::Http("get_token failed".into())
        })?;
        let json: Value = serde_json::from_str(&raw)?;
        parse_token_response(&json)
    }
}
