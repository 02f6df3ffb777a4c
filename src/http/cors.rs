//! CORS stage configuration
//!
//! The pipeline writes `Access-Control-*` headers for every request under
//! the prefix and answers preflight `OPTIONS` probes with 204 before any
//! stateful stage runs. Configuration covers the origin rule (`*`, a
//! single origin, or an allow-list), the advertised methods and request
//! headers, credentials, and the preflight `max-age`.

use hyper::{
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, VARY,
    },
    http::{HeaderMap, HeaderValue},
    Method,
};

use std::time::Duration;

use crate::error::Error;

/// How long browsers may cache a preflight answer when no `max_age` is
/// configured.
const DEFAULT_PREFLIGHT_CACHE: Duration = Duration::from_secs(3600);

/// Which origins the gateway admits.
#[derive(Debug, Clone, Default)]
enum OriginRule {
    /// Every origin; answered with a literal `*`.
    #[default]
    Any,
    /// An explicit allow-list; a matching request origin is echoed back,
    /// anything else gets no allow-origin header at all.
    Listed(Vec<String>),
}

/// Represents the CORS stage configuration options
///
/// # Example
/// ```no_run
/// use sluice::http::CorsConfig;
///
/// let config = CorsConfig::default()
///     .with_origins(["http://example.com", "https://example.net"])
///     .with_credentials(true);
/// ```
#[derive(Debug, Clone)]
pub struct CorsConfig {
    origin: OriginRule,
    methods: Option<Vec<Method>>,
    request_headers: Option<Vec<String>>,
    expose_headers: Vec<String>,
    credentials: bool,
    max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: OriginRule::Any,
            methods: None,
            request_headers: None,
            expose_headers: Vec::new(),
            credentials: false,
            max_age: DEFAULT_PREFLIGHT_CACHE,
        }
    }
}

impl CorsConfig {
    /// Admits a single origin.
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        self.with_origins([origin.into()])
    }

    /// Admits an explicit origin allow-list. The default admits any
    /// origin with a literal `*`.
    pub fn with_origins<T, S>(mut self, origins: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origin = OriginRule::Listed(origins.into_iter().map(Into::into).collect());
        self
    }

    /// Advertises an explicit method list on preflight answers instead of
    /// the default `*`.
    pub fn with_methods<T>(mut self, methods: T) -> Self
    where
        T: IntoIterator<Item = Method>,
    {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Advertises an explicit request-header list on preflight answers
    /// instead of the default `*`.
    pub fn with_request_headers<T, S>(mut self, headers: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    /// Names response headers scripts may read across origins.
    pub fn with_expose_headers<T, S>(mut self, headers: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Allows credentialed cross-origin requests. Requires an explicit
    /// origin allow-list; the combination with `*` is rejected when the
    /// engine is built.
    ///
    /// Default: `false`
    pub fn with_credentials(mut self, allow: bool) -> Self {
        self.credentials = allow;
        self
    }

    /// Sets how long browsers may cache a preflight answer.
    ///
    /// Default: 1 hour
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Writes this stage's response headers.
    ///
    /// Every request gets the allow-origin answer (and credentials/expose
    /// headers where configured); a preflight additionally gets the
    /// advertised methods, request headers and `max-age`.
    pub(crate) fn apply(
        &self,
        request_origin: Option<&HeaderValue>,
        preflight: bool,
        staged: &mut HeaderMap,
    ) {
        match &self.origin {
            OriginRule::Any => {
                // A credentialed wildcard never gets this far; see
                // `validate`.
                if !self.credentials {
                    staged.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
                }
            }
            OriginRule::Listed(allowed) => {
                // The answer depends on the caller, so caches must key on
                // the Origin header.
                staged.append(VARY, HeaderValue::from_static("origin"));
                if let Some(origin) = request_origin.filter(|o| origin_listed(allowed, o)) {
                    staged.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                }
            }
        }

        if self.credentials {
            staged.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.expose_headers.join(", ")) {
                staged.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
            }
        }

        if !preflight {
            return;
        }

        let methods = match &self.methods {
            Some(methods) => methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_owned(),
        };
        if let Ok(value) = HeaderValue::from_str(&methods) {
            staged.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }

        let headers = match &self.request_headers {
            Some(headers) => headers.join(", "),
            None => "*".to_owned(),
        };
        if let Ok(value) = HeaderValue::from_str(&headers) {
            staged.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.max_age.as_secs().to_string()) {
            staged.insert(ACCESS_CONTROL_MAX_AGE, value);
        }
    }

    /// Rejects the credentialed wildcard: browsers ignore
    /// `Access-Control-Allow-Origin: *` on credentialed responses, so the
    /// combination can only be a misconfiguration.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.credentials && matches!(self.origin, OriginRule::Any) {
            return Err(Error::config(
                "credentialed CORS requires an explicit origin allow-list",
            ));
        }
        Ok(())
    }
}

fn origin_listed(allowed: &[String], origin: &HeaderValue) -> bool {
    origin
        .to_str()
        .map(|origin| allowed.iter().any(|entry| entry == origin))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(config: &CorsConfig, origin: Option<&str>, preflight: bool) -> HeaderMap {
        let origin = origin.map(|o| HeaderValue::from_str(o).unwrap());
        let mut staged = HeaderMap::new();
        config.apply(origin.as_ref(), preflight, &mut staged);
        staged
    }

    #[test]
    fn it_answers_wildcard_by_default() {
        let staged = apply(&CorsConfig::default(), Some("https://example.com"), false);

        assert_eq!(staged.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert!(!staged.contains_key(VARY));
        assert!(!staged.contains_key(ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[test]
    fn it_echoes_listed_origin_and_varies() {
        let config = CorsConfig::default().with_origins(["https://example.com"]);

        let staged = apply(&config, Some("https://example.com"), false);

        assert_eq!(
            staged.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
        assert_eq!(staged.get(VARY).unwrap(), "origin");
    }

    #[test]
    fn it_withholds_allow_origin_from_unlisted_callers() {
        let config = CorsConfig::default().with_origins(["https://example.com"]);

        let staged = apply(&config, Some("https://evil.example"), false);

        assert!(!staged.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
        assert_eq!(staged.get(VARY).unwrap(), "origin");
    }

    #[test]
    fn it_admits_a_single_origin() {
        let config = CorsConfig::default().with_origin("https://example.com");

        let staged = apply(&config, Some("https://example.com"), false);

        assert_eq!(
            staged.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn it_writes_preflight_answer() {
        let config = CorsConfig::default()
            .with_methods([Method::GET, Method::POST])
            .with_request_headers(["content-type"])
            .with_max_age(Duration::from_secs(10));

        let staged = apply(&config, Some("https://example.com"), true);

        let methods = staged.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap().to_str().unwrap();
        assert!(methods.contains("GET") && methods.contains("POST"));
        assert_eq!(staged.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "content-type");
        assert_eq!(staged.get(ACCESS_CONTROL_MAX_AGE).unwrap(), "10");
    }

    #[test]
    fn it_defaults_preflight_answer_to_wildcards() {
        let staged = apply(&CorsConfig::default(), None, true);

        assert_eq!(staged.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "*");
        assert_eq!(staged.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "*");
        assert_eq!(staged.get(ACCESS_CONTROL_MAX_AGE).unwrap(), "3600");
    }

    #[test]
    fn it_marks_credentialed_responses() {
        let config = CorsConfig::default()
            .with_origins(["https://example.com"])
            .with_credentials(true);

        let staged = apply(&config, Some("https://example.com"), false);

        assert_eq!(staged.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert_eq!(
            staged.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn it_exposes_configured_headers() {
        let config = CorsConfig::default().with_expose_headers(["x-request-id", "x-cache"]);

        let staged = apply(&config, None, false);

        assert_eq!(
            staged.get(ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(),
            "x-request-id, x-cache"
        );
    }

    #[test]
    fn it_rejects_credentialed_wildcard() {
        let config = CorsConfig::default().with_credentials(true);

        assert!(config.validate().is_err());
    }

    #[test]
    fn it_accepts_credentialed_allow_list() {
        let config = CorsConfig::default()
            .with_origins(["https://example.com"])
            .with_credentials(true);

        assert!(config.validate().is_ok());
    }
}
