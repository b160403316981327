//! Caller-facing entry point wiring the token cache, pool and relays.

use crate::{
    bootstrap::ConversationBootstrapper,
    dialog::DialogOnceClient,
    http_util::{DialogRequest, UpstreamHttp},
    pool::RelayPool,
    stream::{RelayHandle, StreamRelay},
};
use qingyan_auth::{HttpTokenFetcher, TokenCache};
use qingyan_config::Config;
use qingyan_types::{Callbacks, Credential, CredentialSource, RelayError, RelaySink, error::Result};
use reqwest::Client;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Everything a caller needs to talk to the agent service.
///
/// Cheap to share behind an `Arc`; one instance per process is the intended
/// use, so that the credential and the worker pool are shared.
pub struct AgentClient {
    tokens: Arc<TokenCache>,
    pool: Arc<RelayPool>,
    relay: StreamRelay,
    bootstrapper: ConversationBootstrapper,
    dialog: DialogOnceClient,
}

impl AgentClient {
    /// Build a client whose credentials come from `config` itself.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::with_source`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_source(config, Arc::new(config.clone()))
    }

    /// Build a client on the current tokio runtime. Timeouts and the
    /// greeting come from `config`; credentials are read from `source` at
    /// every token refresh.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when called outside a tokio runtime or
    /// when the HTTP client cannot be built.
    pub fn with_source(config: &Config, source: Arc<dyn CredentialSource>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| RelayError::Config(format!("no tokio runtime: {e}")))?;
        let http = Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(|e| RelayError::Config(format!("http client: {e}")))?;

        let fetcher = HttpTokenFetcher::new(http.clone(), Arc::clone(&source))
            .with_timeout(config.timeouts.request());
        let tokens = Arc::new(TokenCache::new(Arc::new(fetcher)));
        let upstream = UpstreamHttp::new(http, Arc::clone(&tokens), source);
        let pool = Arc::new(RelayPool::new(runtime, config.timeouts.shutdown_grace()));
        let relay = StreamRelay::new(
            upstream.clone(),
            Arc::clone(&pool),
            &config.agent.greeting,
            config.timeouts.stream(),
        );

        Ok(Self {
            bootstrapper: ConversationBootstrapper::new(relay.clone(), config.timeouts.bootstrap()),
            dialog: DialogOnceClient::new(upstream, config.timeouts.request()),
            tokens,
            pool,
            relay,
        })
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    /// A usable credential, fetched if necessary.
    ///
    /// # Errors
    ///
    /// Returns the token exchange error.
    pub async fn credential(&self) -> Result<Arc<Credential>> {
        self.tokens.credential().await
    }

    /// Open a new conversation with `agent_id` and return its id.
    ///
    /// # Errors
    ///
    /// See [`ConversationBootstrapper::bootstrap_blocking`].
    pub async fn create_conversation_id(&self, agent_id: &str) -> Result<String> {
        self.bootstrapper.bootstrap(agent_id).await
    }

    /// Blocking form of [`AgentClient::create_conversation_id`] for callers
    /// on plain threads.
    ///
    /// # Errors
    ///
    /// See [`ConversationBootstrapper::bootstrap_blocking`].
    pub fn create_conversation_id_blocking(&self, agent_id: &str) -> Result<String> {
        self.bootstrapper.bootstrap_blocking(agent_id)
    }

    /// Stream one turn through three callbacks.
    pub async fn stream_dialog_message<D, E, C>(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        prompt: &str,
        on_data: D,
        on_error: E,
        on_complete: C,
    ) -> RelayHandle
    where
        D: FnMut(String) + Send + 'static,
        E: FnMut(RelayError) + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        let request = DialogRequest::new(agent_id, conversation_id, prompt);
        self.relay
            .relay(request, Callbacks::new(on_data, on_error, on_complete))
            .await
    }

    /// Stream one turn into an arbitrary [`RelaySink`].
    pub async fn relay(&self, request: DialogRequest, sink: impl RelaySink) -> RelayHandle {
        self.relay.relay(request, sink).await
    }

    /// Send one message and return the raw aggregate body.
    ///
    /// # Errors
    ///
    /// See [`DialogOnceClient::send`].
    pub async fn send_dialog_once(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        message: &str,
    ) -> Result<String> {
        self.dialog.send(agent_id, conversation_id, message).await
    }

    /// Drain and stop the worker pool. Later sessions fail with
    /// [`RelayError::Shutdown`].
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
