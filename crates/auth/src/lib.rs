//! Upstream credential acquisition and caching.
//!
//! [`HttpTokenFetcher`] performs the `get_token` exchange; [`TokenCache`]
//! memoizes the resulting credential until it expires or upstream rejects it.

pub mod cache;
pub mod fetcher;

pub use cache::TokenCache;
pub use fetcher::{HttpTokenFetcher, parse_token_response};
