//! Opening a conversation and capturing the id upstream assigns to it.
//!
//! A new conversation is started by relaying the greeting with an empty
//! conversation id. The first payload carrying a `conversation_id` (at the
//! top level or under `result`) decides the id; the relay is aborted as soon
//! as the wait ends.

use crate::{http_util::DialogRequest, stream::StreamRelay};
use qingyan_types::{RelayError, RelayEvent, error::Result};
use serde_json::Value;
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Upper bound on a single condition-variable wait.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pull a non-blank conversation id out of one data payload.
///
/// Payloads that are not JSON objects yield `None`.
#[must_use]
pub fn extract_conversation_id(payload: &str) -> Option<String> {
    let json: Value = serde_json::from_str(payload).ok()?;
    let id = match json.get("conversation_id").filter(|v| !v.is_null()) {
        Some(top) => top.as_str(),
        None => json.pointer("/result/conversation_id").and_then(Value::as_str),
    }?;
    (!id.trim().is_empty()).then(|| id.to_string())
}

#[derive(Debug, Default)]
struct SlotState {
    id: Option<String>,
    error: Option<RelayError>,
    ended: bool,
}

/// Single-assignment cell shared between the relay worker and the waiter.
#[derive(Debug, Default)]
struct ConversationSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl ConversationSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe(&self, event: RelayEvent) {
        let mut state = self.lock();
        match event {
            RelayEvent::Data(payload) => {
                if state.id.is_some() {
                    return;
                }
                match extract_conversation_id(&payload) {
                    Some(id) => state.id = Some(id),
                    None => return,
                }
            }
            RelayEvent::Error(e) => {
                state.error = Some(e);
                state.ended = true;
            }
            RelayEvent::Complete => state.ended = true,
        }
        self.changed.notify_all();
    }

    /// Block until an id is captured, the relay ends, or `deadline` passes.
    fn wait_until(&self, deadline: Instant) -> MutexGuard<'_, SlotState> {
        let mut state = self.lock();
        loop {
            if state.id.is_some() || state.ended {
                return state;
            }
            let now = Instant::now();
            if now >= deadline {
                return state;
            }
            let step = (deadline - now).min(POLL_INTERVAL);
            state = match self.changed.wait_timeout(state, step) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Creates conversations through a [`StreamRelay`].
#[derive(Clone)]
pub struct ConversationBootstrapper {
    relay: StreamRelay,
    timeout: Duration,
}

impl ConversationBootstrapper {
    #[must_use]
    pub fn new(relay: StreamRelay, timeout: Duration) -> Self {
        Self { relay, timeout }
    }

    /// Open a conversation with `agent_id`, blocking the calling thread.
    ///
    /// The bootstrap deadline starts once the relay session is running, so
    /// the whole call can take up to the token request timeout longer.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Timeout`] if no id arrived before the deadline.
    /// - The relay's own error if it failed first.
    /// - [`RelayError::Protocol`] (502) if the stream ended without an id.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async context; use
    /// [`ConversationBootstrapper::bootstrap`] there.
    pub fn bootstrap_blocking(&self, agent_id: &str) -> Result<String> {
        let slot = Arc::new(ConversationSlot::default());
        let sink = {
            let slot = Arc::clone(&slot);
            move |event: RelayEvent| slot.observe(event)
        };
        let request = DialogRequest::new(agent_id, None, self.relay.greeting());
        let handle = self
            .relay
            .pool()
            .runtime()
            .block_on(self.relay.relay(request, sink));
        // the deadline covers the conversation id only; the token fetch
        // inside relay() is bounded by its own request timeout
        let deadline = Instant::now() + self.timeout;

        let mut state = slot.wait_until(deadline);
        let id = state.id.take();
        let error = state.error.take();
        let ended = state.ended;
        drop(state);
        handle.abort();

        match (id, error) {
            (Some(id), _) => {
                tracing::debug!(agent_id, conversation_id = %id, "conversation opened");
                Ok(id)
            }
            (None, Some(e)) => Err(e),
            (None, None) if ended => Err(RelayError::Protocol {
                status: 502,
                message: "failed to obtain conversation_id from upstream stream".into(),
            }),
            (None, None) => {
                tracing::warn!(agent_id, timeout = ?self.timeout, "conversation bootstrap timed out");
                Err(RelayError::Timeout(format!(
                    "no conversation_id within {}s",
                    self.timeout.as_secs_f32()
                )))
            }
        }
    }

    /// Async form of [`ConversationBootstrapper::bootstrap_blocking`]; the
    /// wait runs on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`ConversationBootstrapper::bootstrap_blocking`].
    pub async fn bootstrap(&self, agent_id: &str) -> Result<String> {
        let this = self.clone();
        let agent_id = agent_id.to_string();
        tokio::task::spawn_blocking(move || this.bootstrap_blocking(&agent_id))
            .await
            .map_err(|e| RelayError::Http(format!("bootstrap worker failed: {e}")))?
    }
}
