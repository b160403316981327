//! Core types and traits for the qingyan workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! relay, including the error taxonomy, the upstream credential, the relay
//! event model, and the traits that each layer implements.

pub mod error;
pub mod event;
pub mod token;
pub mod traits;

pub use error::RelayError;
pub use event::{Callbacks, DONE_SENTINEL, RelayEvent, RelaySink};
pub use token::{Credential, TokenState};
pub use traits::{AgentCredentials, CredentialSource, TokenFetcher};
