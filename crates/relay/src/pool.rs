//! Worker pool hosting every relay session.

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long shutdown waits for cancelled sessions to unwind.
const UNWIND_WAIT: Duration = Duration::from_millis(500);

/// Sessions run as tasks on a tokio runtime; the pool tracks them so that
/// shutdown can drain, then cancel, whatever is still in flight.
///
/// Idle worker threads are managed by the runtime, so an unused pool holds
/// no threads of its own and never keeps the process alive.
#[derive(Debug)]
pub struct RelayPool {
    runtime: Handle,
    tracker: TaskTracker,
    /// Serializes spawning against closing the tracker.
    gate: Mutex<()>,
    cancel: CancellationToken,
    grace: Duration,
}

impl RelayPool {
    #[must_use]
    pub fn new(runtime: Handle, grace: Duration) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            grace,
        }
    }

    /// Runtime the sessions are spawned on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Returns `true` once [`RelayPool::shutdown`] has started.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Number of sessions still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Reserve the right to spawn one session, or `None` once shutdown has
    /// started. Shutdown waits until the returned [`Admission`] is used or
    /// dropped, so an admitted session is always accounted for.
    pub(crate) fn admit(&self) -> Option<Admission<'_>> {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        (!self.tracker.is_closed()).then_some(Admission { pool: self, _gate: gate })
    }

    /// Stop accepting sessions, give in-flight ones the grace period to
    /// finish, then cancel the rest and wait briefly for them to unwind.
    pub async fn shutdown(&self) {
        {
            let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.tracker.close();
        }
        if timeout(self.grace, self.tracker.wait()).await.is_ok() {
            tracing::debug!("relay pool drained");
            return;
        }
        tracing::warn!(
            active = self.tracker.len(),
            "relay sessions still running after grace period, cancelling"
        );
        self.cancel.cancel();
        if timeout(UNWIND_WAIT, self.tracker.wait()).await.is_err() {
            tracing::warn!(active = self.tracker.len(), "relay sessions did not unwind");
        }
    }
}

/// Permission to spawn one session on a [`RelayPool`].
pub(crate) struct Admission<'a> {
    pool: &'a RelayPool,
    _gate: MutexGuard<'a, ()>,
}

impl Admission<'_> {
    /// Spawn the session. `session` receives a token that fires when the
    /// session is aborted or the pool gives up waiting at shutdown.
    pub(crate) fn spawn<F, Fut>(self, session: F) -> (JoinHandle<Fut::Output>, CancellationToken)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = self.pool.cancel.child_token();
        let join = self
            .pool
            .tracker
            .spawn_on(session(token.clone()), &self.pool.runtime);
        (join, token)
    }
}
