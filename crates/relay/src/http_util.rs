//! Shared HTTP plumbing for the streaming and aggregate dialog calls.
//!
//! Both calls resolve a bearer header through the [`TokenCache`], post the
//! same JSON body to `{base}/stream` and treat non-2xx answers the same way.

use futures_util::StreamExt as _;
use qingyan_auth::TokenCache;
use qingyan_types::{CredentialSource, RelayError, error::Result};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// Path of the dialog endpoint, relative to the configured base URL.
pub const STREAM_PATH: &str = "/stream";

/// Bytes of a non-2xx streaming body kept for the error.
pub const ERROR_PREVIEW_BYTES: usize = 4096;

/// Maximum characters of an error body written to the log.
pub const LOG_PREVIEW_CHARS: usize = 2000;

const EVENT_STREAM: &str = "text/event-stream";

/// Wire body shared by the streaming and aggregate dialog calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogRequest {
    #[serde(rename = "assistant_id")]
    pub agent_id: String,
    /// Empty for a new conversation.
    pub conversation_id: String,
    pub prompt: String,
}

impl DialogRequest {
    pub fn new(
        agent_id: impl Into<String>,
        conversation_id: Option<&str>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation_id: conversation_id.unwrap_or_default().to_string(),
            prompt: prompt.into(),
        }
    }

    /// Replace a blank prompt with `greeting`.
    #[must_use]
    pub fn or_greeting(mut self, greeting: &str) -> Self {
        if self.prompt.trim().is_empty() {
            self.prompt = greeting.to_string();
        }
        self
    }
}

/// An authorized request, ready to send.
pub(crate) struct Prepared {
    pub builder: RequestBuilder,
    /// Header the request was signed with, needed to invalidate it on 401.
    pub header: String,
}

/// HTTP client plus the collaborators every dialog call needs.
#[derive(Clone)]
pub struct UpstreamHttp {
    http: Client,
    tokens: Arc<TokenCache>,
    source: Arc<dyn CredentialSource>,
}

impl UpstreamHttp {
    #[must_use]
    pub fn new(http: Client, tokens: Arc<TokenCache>, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            http,
            tokens,
            source,
        }
    }

    /// Build the `POST {base}/stream` request for `body`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when no bearer header can be obtained or
    /// the base URL is missing. Nothing is sent in that case.
    pub(crate) async fn prepare(&self, body: &DialogRequest, timeout: Duration) -> Result<Prepared> {
        let header = self
            .tokens
            .auth_header()
            .await
            .ok_or_else(|| RelayError::Config("failed to get auth token".into()))?;
        let creds = self.source.credentials();
        let base = creds.base_url()?;

        let builder = self
            .http
            .post(format!("{base}{STREAM_PATH}"))
            .header(AUTHORIZATION, &header)
            .header(ACCEPT, EVENT_STREAM)
            .timeout(timeout)
            .json(body);
        Ok(Prepared { builder, header })
    }

    /// Book-keeping for a rejected call: a 401 means upstream no longer
    /// accepts the cached credential.
    pub(crate) fn rejected(&self, status: StatusCode, header: &str) {
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(header);
        }
    }
}

/// Read at most `max_bytes` of `resp` for an error message. Read failures
/// end the preview early instead of failing.
pub async fn read_preview(resp: Response, max_bytes: usize) -> String {
    let mut buf = Vec::new();
    let mut body = resp.bytes_stream();
    while buf.len() < max_bytes {
        match body.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(max_bytes);
    String::from_utf8_lossy(&buf).into_owned()
}
