//! Process-wide memoization of the upstream bearer credential.
//!
//! Responsibilities:
//! - Serve the cached credential while it is usable (no network call).
//! - Refresh through the [`TokenFetcher`] on first use, expiry, or after
//!   upstream rejected the credential.
//! - Deduplicate concurrent refreshes: callers racing on an empty slot wait
//!   for one exchange instead of each issuing their own.
use arc_swap::ArcSwapOption;
use qingyan_types::{Credential, TokenFetcher, error::Result};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct TokenCache {
    fetcher: Arc<dyn TokenFetcher>,
    slot: ArcSwapOption<Credential>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self {
            fetcher,
            slot: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    /// The cached credential, usable or not.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.slot.load_full()
    }

    fn usable(&self) -> Option<Arc<Credential>> {
        self.slot.load_full().filter(|c| c.is_usable())
    }

    /// Return a usable credential, refreshing it if necessary.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error when no usable credential is cached and the
    /// exchange fails. The slot is left untouched in that case.
    pub async fn credential(&self) -> Result<Arc<Credential>> {
        if let Some(c) = self.usable() {
            return Ok(c);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(c) = self.usable() {
            return Ok(c);
        }

        match self.fetcher.fetch().await {
            Ok(fresh) => {
                tracing::info!(expires_in = fresh.expires_in_secs, "upstream credential refreshed");
                let fresh = Arc::new(fresh);
                self.slot.store(Some(Arc::clone(&fresh)));
                Ok(fresh)
            }
            Err(e) => {
                tracing::warn!(status = e.status(), error = %e, "failed to get upstream auth token");
                Err(e)
            }
        }
    }

    /// `"Bearer <token>"` for a usable credential, or `None` when one cannot
    /// be obtained. Failures are logged, never propagated.
    pub async fn auth_header(&self) -> Option<String> {
        self.credential().await.ok().map(|c| c.bearer())
    }

    /// Drop the cached credential if it still matches `header`, so the next
    /// call refreshes. A credential swapped in by a concurrent refresh is kept.
    pub fn invalidate(&self, header: &str) {
        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        let current = self.slot.load();
        if (*current).as_ref().is_some_and(|c| c.token == token) {
            let _ = self.slot.compare_and_swap(&current, None);
            tracing::debug!("upstream credential invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qingyan_types::RelayError;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, SystemTime},
    };

    #[derive(Default)]
    struct MockFetcher {
        calls: AtomicUsize,
        scripted: StdMutex<VecDeque<Result<Credential>>>,
        delay: Duration,
    }

    impl MockFetcher {
        fn scripted(results: Vec<Result<Credential>>) -> Arc<Self> {
            Arc::new(Self {
                scripted: StdMutex::new(results.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenFetcher for MockFetcher {
        async fn fetch(&self) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Credential::new(format!("tok-{n}"), 3600)))
        }
    }

    #[tokio::test]
    async fn test_first_call_fetches_then_caches() {
        let fetcher = MockFetcher::scripted(vec![]);
        let cache = TokenCache::new(fetcher.clone());
        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer tok-0"));
        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer tok-0"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_none_and_keeps_slot_empty() {
        let fetcher = MockFetcher::scripted(vec![Err(RelayError::Protocol {
            status: 502,
            message: "bad key".into(),
        })]);
        let cache = TokenCache::new(fetcher.clone());
        assert!(cache.auth_header().await.is_none());
        assert!(cache.current().is_none());

        // next call retries the exchange
        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer tok-1"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed() {
        let stale = Credential::obtained_at(
            "old",
            60,
            SystemTime::now() - Duration::from_secs(600),
        );
        let fetcher = MockFetcher::scripted(vec![Ok(stale)]);
        let cache = TokenCache::new(fetcher.clone());

        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer old"));
        // stored value is already past its lifetime, so the next call refreshes
        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer tok-1"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let fetcher = Arc::new(MockFetcher {
            delay: Duration::from_millis(50),
            ..MockFetcher::default()
        });
        let cache = Arc::new(TokenCache::new(fetcher.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.auth_header().await })
            })
            .collect();
        for t in tasks {
            assert_eq!(t.await.unwrap().as_deref(), Some("Bearer tok-0"));
        }
        assert_eq!(fetcher.calls(), 1);

        cache.auth_header().await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let fetcher = MockFetcher::scripted(vec![]);
        let cache = TokenCache::new(fetcher.clone());
        let header = cache.auth_header().await.unwrap();

        cache.invalidate(&header);
        assert!(cache.current().is_none());
        assert_eq!(cache.auth_header().await.as_deref(), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn test_invalidate_ignores_replaced_credential() {
        let fetcher = MockFetcher::scripted(vec![]);
        let cache = TokenCache::new(fetcher.clone());
        cache.auth_header().await.unwrap();

        cache.invalidate("Bearer some-older-token");
        assert_eq!(cache.current().unwrap().token, "tok-0");
    }
}
