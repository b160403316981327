//! Upstream bearer credential and expiry logic.

use std::time::SystemTime;

/// Seconds before nominal expiry at which a credential is considered stale.
const REFRESH_SKEW_SECS: i64 = 60;

/// A bearer credential obtained from the upstream token endpoint.
///
/// Immutable once built; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// Lifetime reported by upstream. Zero or negative means unknown.
    pub expires_in_secs: i64,
    pub obtained_at: SystemTime,
}

impl Credential {
    /// Create a credential obtained now.
    pub fn new(token: impl Into<String>, expires_in_secs: i64) -> Self {
        Self::obtained_at(token, expires_in_secs, SystemTime::now())
    }

    /// Create a credential with an explicit acquisition time.
    pub fn obtained_at(
        token: impl Into<String>,
        expires_in_secs: i64,
        obtained_at: SystemTime,
    ) -> Self {
        Self {
            token: token.into(),
            expires_in_secs,
            obtained_at,
        }
    }

    /// The `Authorization` header value for this credential.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Evaluate usability at `now`.
    ///
    /// The refresh skew is 60 s, capped at half the lifetime so short-lived
    /// tokens remain usable for part of their life.
    #[must_use]
    pub fn state_at(&self, now: SystemTime) -> TokenState {
        if self.token.trim().is_empty() {
            return TokenState::Invalid;
        }
        if self.expires_in_secs <= 0 {
            return TokenState::Valid;
        }
        let skew = REFRESH_SKEW_SECS.min(self.expires_in_secs / 2);
        let elapsed = now
            .duration_since(self.obtained_at)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        if elapsed.saturating_add(skew) < self.expires_in_secs {
            TokenState::Valid
        } else {
            TokenState::Expired
        }
    }

    #[must_use]
    pub fn state(&self) -> TokenState {
        self.state_at(SystemTime::now())
    }

    /// Return `true` if the credential can be sent upstream right now.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.state() == TokenState::Valid
    }
}

/// Describes the usability state of a [`Credential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    /// Past (or within the skew of) its lifetime; a refresh is required.
    Expired,
    /// Blank token; never usable.
    Invalid,
}
