//! One-shot dialog call returning the whole upstream body.

use crate::http_util::{DialogRequest, LOG_PREVIEW_CHARS, UpstreamHttp};
use qingyan_types::{
    RelayError,
    error::{Result, body_preview},
};
use std::time::Duration;

/// Sends a message and buffers the complete answer.
///
/// The answer is the raw SSE text; [`crate::sse::data_payloads`] extracts
/// the payloads from it.
#[derive(Clone)]
pub struct DialogOnceClient {
    upstream: UpstreamHttp,
    timeout: Duration,
}

impl DialogOnceClient {
    #[must_use]
    pub fn new(upstream: UpstreamHttp, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    /// Send `message` as given (a blank message is not replaced).
    ///
    /// # Errors
    ///
    /// - [`RelayError::Config`] when no bearer header can be obtained.
    /// - [`RelayError::Upstream`] on a non-2xx answer, with a truncated body.
    /// - [`RelayError::Http`] on transport failure or timeout.
    pub async fn send(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        message: &str,
    ) -> Result<String> {
        let request = DialogRequest::new(agent_id, conversation_id, message);
        let prepared = self.upstream.prepare(&request, self.timeout).await?;

        let resp = prepared.builder.send().await.map_err(|e| {
            tracing::warn!(agent_id, error = %e, "dialog request failed");
            RelayError::Http(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            self.upstream.rejected(status, &prepared.header);
            let body = resp.text().await.unwrap_or_default();
            let preview = body_preview(&body, LOG_PREVIEW_CHARS);
            tracing::warn!(agent_id, status = status.as_u16(), body = %preview, "dialog upstream HTTP error");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body: preview,
            });
        }

        resp.text().await.map_err(|e| {
            tracing::warn!(agent_id, error = %e, "dialog body read failed");
            RelayError::Http(e.to_string())
        })
    }
}
