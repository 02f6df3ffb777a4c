//! CSRF token store with per-token TTL and bounded size

use dashmap::DashMap;

use std::{sync::Arc, time::Duration};

use crate::time::TimeSource;

/// Methods that must carry a valid token when CSRF protection is enabled.
pub(crate) const STATE_CHANGING_METHODS: [hyper::Method; 4] = [
    hyper::Method::POST,
    hyper::Method::PUT,
    hyper::Method::PATCH,
    hyper::Method::DELETE,
];

const DEFAULT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_MAX_TOKENS: usize = 5_000;

/// CSRF verification options.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// How long an issued token stays valid.
    ///
    /// Default: 1 hour
    pub ttl: Duration,

    /// Hard cap on stored tokens; the oldest are evicted past it.
    ///
    /// Default: 5,000
    pub max_tokens: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenState {
    created_at: u64,
    expires_at: u64,
}

/// Issues and verifies single-use-window CSRF tokens.
///
/// A token is valid iff it is present in the store and the current time
/// has not passed its expiry.
pub struct CsrfStore {
    tokens: DashMap<String, TokenState>,
    config: CsrfConfig,
    clock: Arc<dyn TimeSource>,
}

impl CsrfStore {
    pub(crate) fn new(config: CsrfConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            tokens: DashMap::new(),
            config,
            clock,
        }
    }

    /// Mints a 128-bit random token, hex-encoded, and records its expiry.
    pub fn issue(&self) -> String {
        let token = format!("{:032x}", rand::random::<u128>());
        let now = self.clock.now_millis();
        self.tokens.insert(
            token.clone(),
            TokenState {
                created_at: now,
                expires_at: now + self.config.ttl.as_millis() as u64,
            },
        );
        self.enforce_cap();
        token
    }

    /// Returns `true` iff `token` is known and unexpired.
    ///
    /// An expired token is removed by the failing verify, so a retry with
    /// the same token stays invalid without waiting for the sweeper.
    pub fn verify(&self, token: &str) -> bool {
        let now = self.clock.now_millis();
        let expired = match self.tokens.get(token) {
            None => return false,
            Some(state) => now > state.expires_at,
        };
        if expired {
            self.tokens.remove(token);
            return false;
        }
        true
    }

    /// Number of stored tokens.
    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Removes expired tokens and re-applies the size cap; called by the
    /// sweeper.
    pub(crate) fn sweep(&self, now: u64) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, state| now <= state.expires_at);
        self.enforce_cap();
        before - self.tokens.len()
    }

    /// Evicts the oldest tokens until the store fits the cap again.
    fn enforce_cap(&self) {
        let overflow = self.tokens.len().saturating_sub(self.config.max_tokens);
        if overflow == 0 {
            return;
        }
        let mut by_age: Vec<(String, u64)> = self
            .tokens
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);
        for (token, _) in by_age.into_iter().take(overflow) {
            self.tokens.remove(&token);
        }
        tracing::debug!(evicted = overflow, "csrf store over capacity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockTimeSource;

    fn make_store(ttl_secs: u64, max_tokens: usize) -> (CsrfStore, MockTimeSource) {
        let clock = MockTimeSource::new(1_000);
        let config = CsrfConfig {
            ttl: Duration::from_secs(ttl_secs),
            max_tokens,
        };
        (CsrfStore::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn it_verifies_fresh_token() {
        let (store, _) = make_store(3600, 100);

        let token = store.issue();

        assert!(store.verify(&token));
    }

    #[test]
    fn it_rejects_unknown_token() {
        let (store, _) = make_store(3600, 100);

        assert!(!store.verify("deadbeefdeadbeefdeadbeefdeadbeef"));
    }

    #[test]
    fn it_rejects_and_deletes_expired_token() {
        let (store, clock) = make_store(3600, 100);
        let token = store.issue();

        clock.advance_secs(3601);

        assert!(!store.verify(&token));
        assert!(store.is_empty());
    }

    #[test]
    fn it_accepts_token_at_exact_expiry() {
        let (store, clock) = make_store(3600, 100);
        let token = store.issue();

        clock.advance_secs(3600);

        assert!(store.verify(&token));
    }

    #[test]
    fn it_issues_distinct_hex_tokens() {
        let (store, _) = make_store(3600, 100);

        let first = store.issue();
        let second = store.issue();

        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn it_evicts_oldest_past_cap() {
        let (store, clock) = make_store(3600, 3);

        let oldest = store.issue();
        clock.advance_secs(1);
        let kept: Vec<String> = (0..3)
            .map(|_| {
                clock.advance_secs(1);
                store.issue()
            })
            .collect();

        assert_eq!(store.len(), 3);
        assert!(!store.verify(&oldest));
        for token in kept {
            assert!(store.verify(&token));
        }
    }

    #[test]
    fn it_sweeps_expired_tokens() {
        let (store, clock) = make_store(60, 100);
        store.issue();
        store.issue();
        clock.advance_secs(61);
        let fresh = store.issue();

        let removed = store.sweep(clock.now_millis());

        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.verify(&fresh));
    }
}
