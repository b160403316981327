//! Relay of streamed dialog turns from the upstream agent service.
//!
//! [`AgentClient`] is the entry point. It shares one [`TokenCache`] and one
//! [`RelayPool`] between:
//! - [`StreamRelay`]: SSE payloads re-emitted as events, on the pool.
//! - [`ConversationBootstrapper`]: opens a conversation and waits for its id.
//! - [`DialogOnceClient`]: a single request returning the whole body.
//!
//! [`TokenCache`]: qingyan_auth::TokenCache

pub mod bootstrap;
pub mod client;
pub mod dialog;
pub mod http_util;
pub mod pool;
pub mod sse;
pub mod stream;

pub use bootstrap::{ConversationBootstrapper, extract_conversation_id};
pub use client::AgentClient;
pub use dialog::DialogOnceClient;
pub use http_util::{DialogRequest, UpstreamHttp};
pub use pool::RelayPool;
pub use stream::{AbortHandle, RelayHandle, StreamRelay};
