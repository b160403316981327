//! Streaming relay: one upstream SSE response, re-emitted as [`RelayEvent`]s.

use crate::{
    http_util::{DialogRequest, ERROR_PREVIEW_BYTES, LOG_PREVIEW_CHARS, Prepared, UpstreamHttp, read_preview},
    pool::RelayPool,
    sse::{LineDecoder, data_payload},
};
use futures_util::StreamExt as _;
use qingyan_types::{
    DONE_SENTINEL, RelayError, RelayEvent, RelaySink,
    error::{Result, body_preview},
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Relays streaming dialog turns on a shared [`RelayPool`].
#[derive(Clone)]
pub struct StreamRelay {
    upstream: UpstreamHttp,
    pool: Arc<RelayPool>,
    greeting: Arc<str>,
    timeout: Duration,
}

impl StreamRelay {
    /// `timeout` bounds a whole turn, body included.
    #[must_use]
    pub fn new(upstream: UpstreamHttp, pool: Arc<RelayPool>, greeting: &str, timeout: Duration) -> Self {
        Self {
            upstream,
            pool,
            greeting: Arc::from(greeting),
            timeout,
        }
    }

    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    /// Start a session and return immediately.
    ///
    /// The bearer header is resolved before anything is spawned. If it (or
    /// the pool) is unavailable, the error is delivered to `sink` before this
    /// returns and the handle is already finished.
    pub async fn relay(&self, request: DialogRequest, mut sink: impl RelaySink) -> RelayHandle {
        if self.pool.is_shut_down() {
            return RelayHandle::rejected(RelayError::Shutdown, &mut sink);
        }
        let request = request.or_greeting(&self.greeting);
        let prepared = match self.upstream.prepare(&request, self.timeout).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(agent_id = %request.agent_id, error = %e, "relay not started");
                return RelayHandle::rejected(e, &mut sink);
            }
        };

        // the token fetch above may have raced a shutdown
        let Some(admission) = self.pool.admit() else {
            tracing::debug!("relay pool shut down while the session was starting");
            return RelayHandle::rejected(RelayError::Shutdown, &mut sink);
        };
        tracing::debug!(
            agent_id = %request.agent_id,
            conversation_id = %request.conversation_id,
            "relay session started"
        );
        let upstream = self.upstream.clone();
        let (join, cancel) =
            admission.spawn(move |cancel| run_session(upstream, prepared, sink, cancel));
        RelayHandle {
            inner: Inner::Running { join, cancel },
        }
    }
}

async fn run_session(
    upstream: UpstreamHttp,
    prepared: Prepared,
    mut sink: impl RelaySink,
    cancel: CancellationToken,
) -> Result<()> {
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!("relay session aborted");
            return Err(RelayError::Cancelled);
        }
        r = pump(&upstream, prepared, &mut sink) => r,
    };

    match outcome {
        Ok(()) => {
            tracing::debug!("relay session complete");
            sink.on_event(RelayEvent::Complete);
            Ok(())
        }
        Err(e) => {
            sink.on_event(RelayEvent::Error(e.clone()));
            Err(e)
        }
    }
}

/// Send the request and forward payloads until end of body or `[DONE]`.
async fn pump(upstream: &UpstreamHttp, prepared: Prepared, sink: &mut impl RelaySink) -> Result<()> {
    let Prepared { builder, header } = prepared;
    let resp = builder.send().await.map_err(|e| {
        tracing::warn!(error = %e, "stream request failed");
        RelayError::Http(e.to_string())
    })?;

    let status = resp.status();
    if !status.is_success() {
        upstream.rejected(status, &header);
        let preview = read_preview(resp, ERROR_PREVIEW_BYTES).await;
        tracing::warn!(
            status = status.as_u16(),
            body = %body_preview(&preview, LOG_PREVIEW_CHARS),
            "stream upstream HTTP error"
        );
        return Err(RelayError::Upstream {
            status: status.as_u16(),
            body: preview,
        });
    }

    let mut body = resp.bytes_stream();
    let mut lines = LineDecoder::default();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::warn!(error = %e, "stream read failed");
            RelayError::Http(e.to_string())
        })?;
        let complete = lines.push(&chunk).inspect_err(|e| {
            tracing::warn!(error = %e, "stream line too long");
        })?;
        for line in complete {
            if forward(&line, sink) {
                // remaining bytes are discarded with the response
                return Ok(());
            }
        }
    }
    if let Some(line) = lines.finish() {
        forward(&line, sink);
    }
    Ok(())
}

/// Deliver a line's payload, if any. Returns `true` on `[DONE]`.
fn forward(line: &str, sink: &mut impl RelaySink) -> bool {
    let Some(payload) = data_payload(line) else {
        return false;
    };
    let done = payload == DONE_SENTINEL;
    sink.on_event(RelayEvent::Data(payload.to_string()));
    done
}

enum Inner {
    Finished(RelayError),
    Running {
        join: JoinHandle<Result<()>>,
        cancel: CancellationToken,
    },
}

/// Handle to a relay session.
///
/// Dropping the handle detaches the session; it keeps running until the
/// upstream finishes or the pool is shut down.
pub struct RelayHandle {
    inner: Inner,
}

impl RelayHandle {
    fn rejected(err: RelayError, sink: &mut impl RelaySink) -> Self {
        sink.on_event(RelayEvent::Error(err.clone()));
        Self {
            inner: Inner::Finished(err),
        }
    }

    /// Cancel the session. No further events are delivered and the
    /// upstream connection is dropped.
    pub fn abort(&self) {
        if let Inner::Running { cancel, .. } = &self.inner {
            cancel.cancel();
        }
    }

    /// A cloneable handle that can abort the session from elsewhere.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        match &self.inner {
            Inner::Running { cancel, .. } => AbortHandle(Some(cancel.clone())),
            Inner::Finished(_) => AbortHandle(None),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Inner::Finished(_) => true,
            Inner::Running { join, .. } => join.is_finished(),
        }
    }

    /// Wait for the session to end.
    ///
    /// # Errors
    ///
    /// Returns the error the session delivered, or [`RelayError::Cancelled`]
    /// if it was aborted.
    pub async fn wait(self) -> Result<()> {
        match self.inner {
            Inner::Finished(err) => Err(err),
            Inner::Running { join, .. } => match join.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(RelayError::Cancelled),
                Err(e) => Err(RelayError::Http(format!("relay worker failed: {e}"))),
            },
        }
    }
}

/// Aborts a session without owning its [`RelayHandle`].
#[derive(Debug, Clone)]
pub struct AbortHandle(Option<CancellationToken>);

impl AbortHandle {
    pub fn abort(&self) {
        if let Some(cancel) = &self.0 {
            cancel.cancel();
        }
    }
}
