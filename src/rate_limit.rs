//! Per-client fixed-window rate limiter with a bounded store

use dashmap::DashMap;

use std::{sync::Arc, time::Duration};

use crate::time::{TimeSource, MILLIS_PER_SEC};

const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_MAX_REQUESTS: u32 = 100;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Rate limiting options.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window duration.
    ///
    /// Default: 60 seconds
    pub window: Duration,

    /// Maximum requests allowed per window per client.
    ///
    /// Default: 100
    pub max: u32,

    /// Hard cap on tracked clients; entries closest to expiry are evicted
    /// past it.
    ///
    /// Default: 10,000
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            max: DEFAULT_MAX_REQUESTS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Internal per-client state for the fixed window algorithm.
#[derive(Debug, Clone, Copy)]
struct Counter {
    /// Number of requests in the current window.
    count: u32,

    /// Timestamp (milliseconds) when the current window closes.
    reset_at: u64,
}

/// The outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The configured per-window cap.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Timestamp (milliseconds) when the current window closes.
    pub reset_at: u64,
}

impl RateDecision {
    /// Seconds until the window closes, rounded up; the `Retry-After`
    /// value for denied requests.
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        self.reset_at
            .saturating_sub(now)
            .div_ceil(MILLIS_PER_SEC)
    }

    /// The window close timestamp in whole seconds, as written to
    /// `X-RateLimit-Reset`.
    #[inline]
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at / MILLIS_PER_SEC
    }
}

/// A fixed-window rate limiter keyed by client address.
///
/// The read-modify-write on a single key happens under that key's map
/// lock, so counter updates are linearizable per client while distinct
/// clients proceed in parallel.
pub struct RateLimiter {
    storage: DashMap<String, Counter>,
    config: RateLimitConfig,
    clock: Arc<dyn TimeSource>,
}

impl RateLimiter {
    pub(crate) fn new(config: RateLimitConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            storage: DashMap::new(),
            config,
            clock,
        }
    }

    /// Counts one request from `client_addr` and decides whether it may
    /// proceed.
    ///
    /// A missing counter starts a fresh window; a counter whose window has
    /// closed is re-initialized; otherwise the counter increments.
    pub fn check(&self, client_addr: &str) -> RateDecision {
        let now = self.clock.now_millis();
        let window = self.config.window.as_millis() as u64;

        let counter = {
            let mut entry = self
                .storage
                .entry(client_addr.to_owned())
                .or_insert(Counter { count: 0, reset_at: now + window });
            if now > entry.reset_at {
                *entry = Counter { count: 0, reset_at: now + window };
            }
            entry.count += 1;
            *entry
        };

        if self.storage.len() > self.config.max_entries {
            self.evict_overflow();
        }

        RateDecision {
            allowed: counter.count <= self.config.max,
            limit: self.config.max,
            remaining: self.config.max.saturating_sub(counter.count),
            reset_at: counter.reset_at,
        }
    }

    /// Reads the current window state for `client_addr` without counting
    /// a request.
    ///
    /// Stages that terminate before the limiter runs still report the
    /// counter headers from this; only [`RateLimiter::check`] charges the
    /// window.
    pub fn peek(&self, client_addr: &str) -> RateDecision {
        let now = self.clock.now_millis();
        let counter = self.storage.get(client_addr).map(|entry| *entry);
        match counter {
            Some(counter) if now <= counter.reset_at => RateDecision {
                allowed: counter.count < self.config.max,
                limit: self.config.max,
                remaining: self.config.max.saturating_sub(counter.count),
                reset_at: counter.reset_at,
            },
            _ => RateDecision {
                allowed: true,
                limit: self.config.max,
                remaining: self.config.max,
                reset_at: now + self.config.window.as_millis() as u64,
            },
        }
    }

    /// Number of tracked clients.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Removes counters whose window has closed and re-applies the size
    /// cap; called by the sweeper.
    pub(crate) fn sweep(&self, now: u64) -> usize {
        let before = self.storage.len();
        self.storage.retain(|_, counter| now <= counter.reset_at);
        self.evict_overflow();
        before - self.storage.len()
    }

    /// Evicts the counters closest to expiry, in a single batch equal to
    /// the overflow. Expiry order approximates access order here because
    /// active clients keep refreshing their windows.
    fn evict_overflow(&self) {
        let overflow = self.storage.len().saturating_sub(self.config.max_entries);
        if overflow == 0 {
            return;
        }
        let mut by_expiry: Vec<(String, u64)> = self
            .storage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().reset_at))
            .collect();
        by_expiry.sort_by_key(|(_, reset_at)| *reset_at);
        for (key, _) in by_expiry.into_iter().take(overflow) {
            self.storage.remove(&key);
        }
        tracing::debug!(evicted = overflow, "rate-limit store over capacity");
    }
}
