//! Response cache with fingerprinting, TTL and bounded size

use bytes::Bytes;
use hyper::{
    http::{HeaderMap, Method, Uri},
    StatusCode,
};

use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};

use crate::{
    http::GatewayResponse,
    time::TimeSource,
};

pub use memory::MemoryStore;

pub mod fingerprint;
pub mod memory;

const DEFAULT_MAX_SIZE: usize = 100;
const DEFAULT_TTL_SECS: u64 = 300;

/// What the admission predicate gets to inspect.
pub struct CacheProbe<'a> {
    /// Request method.
    pub method: &'a Method,
    /// Request URI.
    pub uri: &'a Uri,
    /// Handler response status.
    pub status: StatusCode,
    /// Final response body bytes.
    pub body: &'a [u8],
}

/// An optional policy predicate consulted before a response is cached.
pub type CachePredicate = Arc<dyn Fn(&CacheProbe<'_>) -> bool + Send + Sync>;

/// Response cache options.
#[derive(Clone)]
pub struct CacheConfig {
    /// Whether the cache stages run at all.
    ///
    /// Default: `true`
    pub enabled: bool,

    /// Entry-count bound for the in-memory store; external adapters bring
    /// their own policy.
    ///
    /// Default: 100
    pub max_size: usize,

    /// TTL applied to stored entries.
    ///
    /// Default: 300 seconds
    pub default_ttl: Duration,

    /// Prefix prepended to every store key.
    ///
    /// Default: empty
    pub key_prefix: String,

    /// Request headers whose values participate in the fingerprint, so
    /// distinct header values map to distinct cached variants.
    ///
    /// Default: empty
    pub vary_by: Vec<String>,

    /// Methods eligible for caching.
    ///
    /// Default: `[GET]`
    pub cacheable_methods: Vec<Method>,

    /// Optional admission predicate; `false` vetoes storing.
    pub should_cache: Option<CachePredicate>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            key_prefix: String::new(),
            vary_by: Vec::new(),
            cacheable_methods: vec![Method::GET],
            should_cache: None,
        }
    }
}

/// A cached response variant.
#[derive(Debug)]
pub struct CacheEntry {
    /// Captured response status.
    pub status: StatusCode,
    /// Captured response headers (pre-compression).
    pub headers: HeaderMap,
    /// Captured response body (pre-compression, so each client can
    /// renegotiate its own coding).
    pub body: Bytes,
    /// Creation timestamp, milliseconds.
    pub created_at: u64,
    /// Expiry timestamp, milliseconds; always past `created_at`.
    pub expires_at: u64,
    last_access: AtomicU64,
}

impl CacheEntry {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        created_at: u64,
        ttl: Duration,
    ) -> Self {
        let expires_at = created_at + (ttl.as_millis() as u64).max(1);
        Self {
            status,
            headers,
            body,
            created_at,
            expires_at,
            last_access: AtomicU64::new(created_at),
        }
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    #[inline]
    pub(crate) fn touch(&self, now: u64) {
        self.last_access.store(now, Relaxed);
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Relaxed)
    }
}

/// A point-in-time summary of one cached entry.
#[derive(Debug, Clone)]
pub struct CacheEntrySummary {
    /// The store key (prefix included).
    pub key: String,
    /// Body size in bytes.
    pub size_bytes: usize,
    /// Milliseconds until expiry; zero when already expired.
    pub expires_in_millis: u64,
}

/// A point-in-time view of the store.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Stored entry count.
    pub size: usize,
    /// Configured entry bound.
    pub max: usize,
    /// A bounded sample of stored entries.
    pub entries: Vec<CacheEntrySummary>,
}

/// The storage contract shared by the in-memory store and external
/// adapters. Size accounting and eviction belong to the adapter; the
/// engine only prefixes keys.
pub trait CacheStore: Send + Sync + 'static {
    /// Fetches an unexpired entry and refreshes its access time.
    /// An expired entry is deleted and reported as a miss.
    fn lookup(&self, key: &str, now: u64) -> Option<Arc<CacheEntry>>;

    /// Installs an entry under `key`, replacing any previous one.
    fn store(&self, key: String, entry: CacheEntry);

    /// Drops one entry.
    fn invalidate(&self, key: &str);

    /// Drops every entry whose key starts with `prefix`; returns how many.
    fn invalidate_prefix(&self, prefix: &str) -> usize;

    /// Drops everything.
    fn clear(&self);

    /// Removes expired entries; returns how many. Called by the sweeper.
    fn sweep(&self, now: u64) -> usize;

    /// Stored entry count.
    fn len(&self) -> usize;

    /// Point-in-time statistics.
    fn stats(&self, now: u64) -> CacheStats;
}

/// The cache subsystem: owns a [`CacheStore`], derives fingerprints and
/// applies the admission policy.
///
/// Concurrent misses for one fingerprint are not coalesced: both requests
/// invoke the handler and the last store wins.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    clock: Arc<dyn TimeSource>,
}

impl ResponseCache {
    pub(crate) fn new(
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self { store, config, clock }
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[inline]
    pub(crate) fn is_cacheable_method(&self, method: &Method) -> bool {
        self.config.cacheable_methods.contains(method)
    }

    /// Whether the fingerprint for `method` includes a body digest.
    #[inline]
    pub(crate) fn needs_body_digest(&self, method: &Method) -> bool {
        self.is_cacheable_method(method)
            && *method != Method::GET
            && *method != Method::HEAD
    }

    /// Derives the store key for a request variant.
    pub(crate) fn key(
        &self,
        method: &Method,
        uri: &Uri,
        body: Option<&[u8]>,
        headers: &HeaderMap,
    ) -> String {
        let vary_values: Vec<&str> = self
            .config
            .vary_by
            .iter()
            .map(|name| {
                headers
                    .get(name.as_str())
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
            })
            .collect();
        let fp = fingerprint::compute(method, uri, body, &vary_values);
        format!("{}{}", self.config.key_prefix, fp)
    }

    /// Fetches an unexpired entry.
    pub fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.store.lookup(key, self.clock.now_millis())
    }

    /// Whether `probe` passes the admission rules: cacheable method,
    /// 2xx status, and the optional policy predicate.
    pub(crate) fn admits(&self, probe: &CacheProbe<'_>) -> bool {
        if !self.is_cacheable_method(probe.method) || !probe.status.is_success() {
            return false;
        }
        match &self.config.should_cache {
            Some(predicate) => predicate(probe),
            None => true,
        }
    }

    /// Installs a response under `key` with the configured TTL.
    pub(crate) fn store_response(&self, key: String, response: &GatewayResponse) {
        let entry = CacheEntry::new(
            response.status,
            response.headers.clone(),
            response.body.clone(),
            self.clock.now_millis(),
            self.config.default_ttl,
        );
        self.store.store(key, entry);
    }

    /// Drops one entry.
    pub fn invalidate(&self, key: &str) {
        self.store.invalidate(key);
    }

    /// Drops entries whose key starts with `prefix` (after the configured
    /// key prefix); returns how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let full = format!("{}{}", self.config.key_prefix, prefix);
        self.store.invalidate_prefix(&full)
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Stored entry count.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats(self.clock.now_millis())
    }

    pub(crate) fn sweep(&self, now: u64) -> usize {
        self.store.sweep(now)
    }
}
