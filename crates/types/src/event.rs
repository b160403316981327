//! Relay session events and the sink that consumes them.

use crate::RelayError;

/// Payload the upstream sends as its final `data:` line.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One event of a relay session.
///
/// A session yields zero or more [`RelayEvent::Data`] followed by at most one
/// terminal event. [`RelayEvent::Complete`] and [`RelayEvent::Error`] are
/// mutually exclusive; an aborted session ends without either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A decoded SSE payload with the `data:` prefix and whitespace stripped.
    Data(String),
    Error(RelayError),
    Complete,
}

/// Consumer of relay events, invoked from a pool worker.
pub trait RelaySink: Send + 'static {
    fn on_event(&mut self, event: RelayEvent);
}

impl<F> RelaySink for F
where
    F: FnMut(RelayEvent) + Send + 'static,
{
    fn on_event(&mut self, event: RelayEvent) {
        self(event);
    }
}

/// Adapts three independent callbacks (data, error, completion) to a
/// [`RelaySink`].
pub struct Callbacks<D, E, C> {
    on_data: D,
    on_error: E,
    on_complete: C,
}

impl<D, E, C> Callbacks<D, E, C>
where
    D: FnMut(String) + Send + 'static,
    E: FnMut(RelayError) + Send + 'static,
    C: FnMut() + Send + 'static,
{
    pub fn new(on_data: D, on_error: E, on_complete: C) -> Self {
        Self {
            on_data,
            on_error,
            on_complete,
        }
    }
}

impl<D, E, C> RelaySink for Callbacks<D, E, C>
where
    D: FnMut(String) + Send + 'static,
    E: FnMut(RelayError) + Send + 'static,
    C: FnMut() + Send + 'static,
{
    fn on_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Data(d) => (self.on_data)(d),
            RelayEvent::Error(e) => (self.on_error)(e),
            RelayEvent::Complete => (self.on_complete)(),
        }
    }
}
