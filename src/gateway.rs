//! Gateway configuration and the runtime engine

use hyper::{http::Method, Request};

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    cache::{CacheConfig, CacheStore, MemoryStore, ResponseCache},
    compression::{CompressionConfig, CompressionSnapshot, Compressor},
    csrf::{CsrfConfig, CsrfStore},
    error::{Error, ErrorSink, TracingSink},
    handler::{AuthPredicate, RouteHandler},
    http::{BoxBody, CorsConfig, GatewayResponse},
    rate_limit::{RateLimitConfig, RateLimiter},
    routing::{Resolver, RoutePattern, RouteTable},
    sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL_SECS},
    time::{SystemTimeSource, TimeSource},
};

const DEFAULT_PREFIX: &str = "/api";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024; // 1 MiB
pub(crate) const STATUS_SEGMENT: &str = "__status";

fn default_allowed_methods() -> HashSet<Method> {
    HashSet::from([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
    ])
}

/// The gateway used to configure the pipeline and register routes.
///
/// # Example
/// ```no_run
/// use sluice::{Gateway, handler::RouteHandler};
/// use sluice::http::{GatewayResponse, StatusCode};
///
/// # fn docs() -> Result<(), sluice::error::Error> {
/// let mut gateway = Gateway::new()
///     .with_prefix("/api")
///     .with_rate_limit(100, std::time::Duration::from_secs(60));
///
/// gateway.map_route("/hello", RouteHandler::new().get(|_req| async {
///     Ok(GatewayResponse::text(StatusCode::OK, "Hello, World!"))
/// }));
///
/// let engine = gateway.build()?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    /// Path root the engine claims
    ///
    /// Default: `/api`
    pub(crate) api_prefix: String,

    /// Deadline for the entire pipeline
    ///
    /// Default: 30 seconds
    pub(crate) request_timeout: Duration,

    /// Request body ceiling (in bytes)
    ///
    /// Default: 1 MiB
    pub(crate) max_body_size: usize,

    /// Methods admitted by the method filter
    pub(crate) allowed_methods: HashSet<Method>,

    /// Whether state-changing requests must carry a CSRF token
    ///
    /// Default: `false`
    pub(crate) enable_csrf: bool,

    /// Whether the fixed security header set is written
    ///
    /// Default: `true`
    pub(crate) enable_security_headers: bool,

    /// Whether parsed JSON bodies pass the legacy sanitizer
    ///
    /// Default: `true`
    pub(crate) sanitize_input: bool,

    /// Whether error bodies carry descriptive messages
    ///
    /// Default: `true` in debug builds
    pub(crate) dev_mode: bool,

    /// Whether the diagnostic status endpoint is served
    ///
    /// Default: `true`
    pub(crate) status_endpoint: bool,

    pub(crate) cors: Option<CorsConfig>,
    pub(crate) rate: RateLimitConfig,
    pub(crate) csrf: CsrfConfig,
    pub(crate) cache: CacheConfig,
    pub(crate) compression: CompressionConfig,
    pub(crate) sweep_interval: Duration,

    pub(crate) routes: Vec<(String, RouteHandler)>,
    pub(crate) auth: Option<AuthPredicate>,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
    pub(crate) cache_store: Option<Arc<dyn CacheStore>>,
    pub(crate) clock: Arc<dyn TimeSource>,

    #[cfg(feature = "server")]
    pub(crate) connection: crate::server::Connection,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// Initializes a new [`Gateway`] with the default configuration.
    pub fn new() -> Self {
        Self {
            api_prefix: DEFAULT_PREFIX.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            allowed_methods: default_allowed_methods(),
            enable_csrf: false,
            enable_security_headers: true,
            sanitize_input: true,
            dev_mode: cfg!(debug_assertions),
            status_endpoint: true,
            cors: Some(CorsConfig::default()),
            rate: RateLimitConfig::default(),
            csrf: CsrfConfig::default(),
            cache: CacheConfig::default(),
            compression: CompressionConfig::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            routes: Vec::new(),
            auth: None,
            error_sink: Arc::new(TracingSink),
            cache_store: None,
            clock: Arc::new(SystemTimeSource),
            #[cfg(feature = "server")]
            connection: Default::default(),
        }
    }

    /// Sets the path root the engine claims; requests outside it are
    /// declined back to the surrounding server.
    ///
    /// Default: `/api`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.api_prefix = format!("/{}", prefix.trim_matches('/'));
        self
    }

    /// Sets the deadline for the entire pipeline.
    ///
    /// Default: 30 seconds
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the request body ceiling (in bytes).
    ///
    /// Default: 1 MiB
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Replaces the method allow-list.
    pub fn with_allowed_methods<T>(mut self, methods: T) -> Self
    where
        T: IntoIterator<Item = Method>,
    {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Requires a CSRF token on POST/PUT/PATCH/DELETE requests.
    pub fn with_csrf(mut self) -> Self {
        self.enable_csrf = true;
        self
    }

    /// Requires CSRF tokens and adjusts the token store options.
    pub fn with_csrf_config<F>(mut self, config: F) -> Self
    where
        F: FnOnce(CsrfConfig) -> CsrfConfig,
    {
        self.enable_csrf = true;
        self.csrf = config(self.csrf);
        self
    }

    /// Disables the fixed security header set.
    pub fn without_security_headers(mut self) -> Self {
        self.enable_security_headers = false;
        self
    }

    /// Disables the legacy JSON body sanitizer.
    pub fn without_sanitizer(mut self) -> Self {
        self.sanitize_input = false;
        self
    }

    /// Switches descriptive error messages on or off.
    ///
    /// Default: `true` in debug builds
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Disables the diagnostic status endpoint.
    pub fn without_status_endpoint(mut self) -> Self {
        self.status_endpoint = false;
        self
    }

    /// Configures the CORS stage.
    ///
    /// # Example
    /// ```no_run
    /// use sluice::Gateway;
    ///
    /// let gateway = Gateway::new()
    ///     .with_cors(|cors| cors.with_origins(["https://example.com"]));
    /// ```
    pub fn with_cors<F>(mut self, config: F) -> Self
    where
        F: FnOnce(CorsConfig) -> CorsConfig,
    {
        self.cors = Some(config(self.cors.unwrap_or_default()));
        self
    }

    /// Disables the CORS stage entirely.
    pub fn without_cors(mut self) -> Self {
        self.cors = None;
        self
    }

    /// Sets the per-client request cap and window.
    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate.max = max;
        self.rate.window = window;
        self
    }

    /// Adjusts the full rate-limiter configuration.
    pub fn with_rate_limit_config<F>(mut self, config: F) -> Self
    where
        F: FnOnce(RateLimitConfig) -> RateLimitConfig,
    {
        self.rate = config(self.rate);
        self
    }

    /// Adjusts the response cache configuration.
    pub fn with_cache<F>(mut self, config: F) -> Self
    where
        F: FnOnce(CacheConfig) -> CacheConfig,
    {
        self.cache = config(self.cache);
        self
    }

    /// Disables the response cache.
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    /// Adjusts the compression configuration.
    pub fn with_compression<F>(mut self, config: F) -> Self
    where
        F: FnOnce(CompressionConfig) -> CompressionConfig,
    {
        self.compression = config(self.compression);
        self
    }

    /// Disables response compression.
    pub fn without_compression(mut self) -> Self {
        self.compression.enabled = false;
        self
    }

    /// Sets the sweeper period.
    ///
    /// Default: 60 seconds
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Plugs an authentication predicate in front of handler dispatch;
    /// returning `false` terminates the request with 401.
    pub fn with_auth(mut self, predicate: AuthPredicate) -> Self {
        self.auth = Some(predicate);
        self
    }

    /// Replaces the default tracing-backed error sink.
    pub fn with_error_sink<S: ErrorSink>(mut self, sink: S) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    /// Plugs an external cache storage adapter in place of the bounded
    /// in-memory store. Size accounting and eviction move to the adapter.
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Replaces the system clock; used by tests to drive TTLs manually.
    pub fn with_time_source<T: TimeSource>(mut self, clock: T) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Registers a route under the configured prefix.
    ///
    /// The template is validated when the engine is built.
    pub fn map_route(&mut self, template: impl Into<String>, handler: RouteHandler) -> &mut Self {
        self.routes.push((template.into(), handler));
        self
    }

    /// Builds the runtime [`Engine`], validates the configuration, and
    /// spawns the background sweeper.
    pub fn build(self) -> Result<Engine, Error> {
        if let Some(cors) = &self.cors {
            cors.validate()?;
        }

        let mut table = RouteTable::new();
        for (template, handler) in self.routes {
            table.insert(RoutePattern::parse(&template)?, handler)?;
        }

        let clock = self.clock;
        let limiter = Arc::new(RateLimiter::new(self.rate, clock.clone()));
        let csrf = Arc::new(CsrfStore::new(self.csrf, clock.clone()));
        let store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(self.cache.max_size)));
        let cache = Arc::new(ResponseCache::new(store, self.cache, clock.clone()));
        let compressor = Compressor::new(self.compression)?;

        let sweeper = Sweeper::spawn(
            self.sweep_interval,
            limiter.clone(),
            csrf.clone(),
            cache.clone(),
            clock.clone(),
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                prefix: self.api_prefix,
                request_timeout: self.request_timeout,
                max_body_size: self.max_body_size,
                allowed_methods: self.allowed_methods,
                enable_csrf: self.enable_csrf,
                enable_security_headers: self.enable_security_headers,
                sanitize_input: self.sanitize_input,
                dev_mode: self.dev_mode,
                status_endpoint: self.status_endpoint,
                cors: self.cors,
                resolver: Resolver::new(table),
                limiter,
                csrf,
                cache,
                compressor,
                auth: self.auth,
                error_sink: self.error_sink,
                clock,
                sweeper: Mutex::new(Some(sweeper)),
            }),
        })
    }
}

/// What the engine did with a request.
pub enum Outcome {
    /// The pipeline produced a complete response.
    Handled(GatewayResponse),
    /// The request is outside the prefix or matched no route; control
    /// returns to the surrounding server with the request intact.
    Declined(Request<BoxBody>),
}

impl Outcome {
    /// The produced response, when the request was handled.
    pub fn into_response(self) -> Option<GatewayResponse> {
        match self {
            Outcome::Handled(response) => Some(response),
            Outcome::Declined(_) => None,
        }
    }

    /// `true` when the engine handed the request back.
    pub fn is_declined(&self) -> bool {
        matches!(self, Outcome::Declined(_))
    }
}

pub(crate) struct EngineInner {
    pub(crate) prefix: String,
    pub(crate) request_timeout: Duration,
    pub(crate) max_body_size: usize,
    pub(crate) allowed_methods: HashSet<Method>,
    pub(crate) enable_csrf: bool,
    pub(crate) enable_security_headers: bool,
    pub(crate) sanitize_input: bool,
    pub(crate) dev_mode: bool,
    pub(crate) status_endpoint: bool,
    pub(crate) cors: Option<CorsConfig>,
    pub(crate) resolver: Resolver,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) csrf: Arc<CsrfStore>,
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) compressor: Compressor,
    pub(crate) auth: Option<AuthPredicate>,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
    pub(crate) clock: Arc<dyn TimeSource>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// The runtime engine: the pipeline controller plus its owned subsystems.
///
/// Cheap to clone; all clones share the same stores.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// The path root this engine claims.
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// The response cache, for explicit invalidation.
    #[inline]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// The CSRF token store.
    #[inline]
    pub fn csrf(&self) -> &CsrfStore {
        &self.inner.csrf
    }

    /// The rate limiter.
    #[inline]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Process-lifetime compression counters.
    #[inline]
    pub fn compression_stats(&self) -> CompressionSnapshot {
        self.inner.compressor.stats()
    }

    /// Atomically replaces the pattern table; the refresh signal from the
    /// external filesystem scanner lands here.
    pub fn refresh_routes(&self, table: RouteTable) {
        tracing::debug!(routes = table.len(), "installing new route table");
        self.inner.resolver.install(table);
    }

    /// The diagnostic payload served by the status endpoint.
    pub fn status_snapshot(&self) -> serde_json::Value {
        let cache_stats = self.inner.cache.stats();
        let compression = self.inner.compressor.stats();
        serde_json::json!({
            "routes": self.inner.resolver.templates(),
            "cache": {
                "size": cache_stats.size,
                "max": cache_stats.max,
                "entries": cache_stats.entries.iter().map(|entry| serde_json::json!({
                    "key": entry.key,
                    "size_bytes": entry.size_bytes,
                    "expires_in_ms": entry.expires_in_millis,
                })).collect::<Vec<_>>(),
            },
            "rate_limiter": { "size": self.inner.limiter.len() },
            "csrf": { "size": self.inner.csrf.len() },
            "compression": {
                "total": compression.total,
                "compressed": compression.compressed,
                "skipped": compression.skipped,
                "bytes_in": compression.bytes_in,
                "bytes_out": compression.bytes_out,
                "ratio": compression.ratio,
            },
        })
    }

    /// Stops the sweeper; in-flight requests are unaffected.
    pub async fn shutdown(&self) {
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}
