//! Negotiated response compression
//!
//! Compresses eligible response bodies with the first configured algorithm
//! the client accepts. Entries come out of the cache pre-compression, so
//! every client negotiates its own coding.

use hyper::header::{CONTENT_ENCODING, CONTENT_TYPE, VARY};
use hyper::http::HeaderValue;
use regex::Regex;

#[cfg(feature = "compression-brotli")]
use async_compression::tokio::write::BrotliEncoder;
#[cfg(feature = "compression-gzip")]
use async_compression::tokio::write::{GzipEncoder, ZlibEncoder};
#[cfg(any(feature = "compression-brotli", feature = "compression-gzip"))]
use async_compression::Level;
#[cfg(any(feature = "compression-brotli", feature = "compression-gzip"))]
use tokio::io::AsyncWriteExt;

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::{
    error::Error,
    headers::{AcceptEncoding, Encoding, X_COMPRESSION_RATIO, X_ORIGINAL_SIZE},
    http::GatewayResponse,
};

const DEFAULT_THRESHOLD: usize = 1024;

const DEFAULT_COMPRESSIBLE_TYPES: [&str; 8] = [
    "application/json",
    "application/javascript",
    "application/xml",
    "image/svg+xml",
    "text/css",
    "text/html",
    "text/javascript",
    "text/plain",
];

/// Response compression options.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Whether the compressor stage runs at all.
    ///
    /// Default: `true`
    pub enabled: bool,

    /// Bodies below this many bytes are never compressed.
    ///
    /// Default: 1024
    pub threshold: usize,

    /// Codec quality level; `None` uses each codec's default.
    pub level: Option<i32>,

    /// Algorithm preference order; the first one the client accepts wins.
    ///
    /// Default: `[br, gzip, deflate]` (as enabled by features)
    pub algorithms: Vec<Encoding>,

    /// Content types eligible for compression.
    pub compressible_types: Vec<String>,

    /// Request targets matching any of these regexes are never compressed.
    pub exclude_patterns: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_THRESHOLD,
            level: None,
            algorithms: vec![
                #[cfg(feature = "compression-brotli")]
                Encoding::Brotli,
                #[cfg(feature = "compression-gzip")]
                Encoding::Gzip,
                #[cfg(feature = "compression-gzip")]
                Encoding::Deflate,
            ],
            compressible_types: DEFAULT_COMPRESSIBLE_TYPES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Process-lifetime compression counters.
#[derive(Debug, Default)]
pub(crate) struct CompressionStats {
    total: AtomicU64,
    compressed: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// A point-in-time view of the compression counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSnapshot {
    /// Responses that passed through the stage.
    pub total: u64,
    /// Responses actually compressed.
    pub compressed: u64,
    /// Responses passed through unmodified.
    pub skipped: u64,
    /// Body bytes entering the compressor.
    pub bytes_in: u64,
    /// Body bytes leaving the compressor.
    pub bytes_out: u64,
    /// `bytes_out / bytes_in` over all compressed responses.
    pub ratio: f64,
}

/// The compressor stage: negotiation, gating and encoding.
pub struct Compressor {
    config: CompressionConfig,
    exclude: Vec<Regex>,
    stats: CompressionStats,
}

impl Compressor {
    /// Compiles the configured exclude patterns; a malformed pattern is a
    /// build-time configuration error.
    pub(crate) fn new(config: CompressionConfig) -> Result<Self, Error> {
        let exclude = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    Error::config(format!("invalid compression exclude pattern `{pattern}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            exclude,
            stats: CompressionStats::default(),
        })
    }

    /// Compresses `response` in place when the gates pass and the client
    /// accepts one of the configured algorithms.
    pub(crate) async fn compress(
        &self,
        response: &mut GatewayResponse,
        accept_encoding: Option<&HeaderValue>,
        target: &str,
    ) -> Result<(), Error> {
        self.stats.total.fetch_add(1, Relaxed);

        if !self.is_eligible(response, target) {
            return Ok(());
        }
        let accepted = match accept_encoding {
            Some(header) => AcceptEncoding::parse(header),
            None => return Ok(()),
        };
        let Some(encoding) = self.negotiate(&accepted) else {
            return Ok(());
        };

        let original_size = response.body.len();
        let compressed = self.encode(encoding, &response.body).await?;
        let ratio = compressed.len() as f64 / original_size as f64;

        self.stats.compressed.fetch_add(1, Relaxed);
        self.stats.bytes_in.fetch_add(original_size as u64, Relaxed);
        self.stats.bytes_out.fetch_add(compressed.len() as u64, Relaxed);

        response.body = compressed.into();
        response.headers.insert(CONTENT_ENCODING, encoding.into());
        response.headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        if let Ok(value) = HeaderValue::from_str(&original_size.to_string()) {
            response.headers.insert(X_ORIGINAL_SIZE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("{ratio:.2}")) {
            response.headers.insert(X_COMPRESSION_RATIO, value);
        }
        response.set_content_length();
        Ok(())
    }

    /// A snapshot of the process-lifetime counters.
    pub fn stats(&self) -> CompressionSnapshot {
        let total = self.stats.total.load(Relaxed);
        let compressed = self.stats.compressed.load(Relaxed);
        let bytes_in = self.stats.bytes_in.load(Relaxed);
        let bytes_out = self.stats.bytes_out.load(Relaxed);
        CompressionSnapshot {
            total,
            compressed,
            skipped: total - compressed,
            bytes_in,
            bytes_out,
            ratio: if bytes_in == 0 {
                1.0
            } else {
                bytes_out as f64 / bytes_in as f64
            },
        }
    }

    fn is_eligible(&self, response: &GatewayResponse, target: &str) -> bool {
        if !self.config.enabled
            || response.body.len() < self.config.threshold
            // A handler-set coding (including `identity`) opts the
            // response out entirely.
            || response.headers.contains_key(CONTENT_ENCODING)
        {
            return false;
        }
        if !self.is_compressible_type(response) {
            return false;
        }
        !self.exclude.iter().any(|pattern| pattern.is_match(target))
    }

    fn is_compressible_type(&self, response: &GatewayResponse) -> bool {
        let Some(content_type) = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok())
        else {
            return false;
        };
        let essence = content_type.essence_str();
        self.config
            .compressible_types
            .iter()
            .any(|allowed| allowed == essence)
    }

    fn negotiate(&self, accepted: &AcceptEncoding) -> Option<Encoding> {
        self.config
            .algorithms
            .iter()
            .copied()
            .find(|algorithm| accepted.accepts(*algorithm))
    }

    #[cfg(any(feature = "compression-brotli", feature = "compression-gzip"))]
    fn level(&self) -> Level {
        match self.config.level {
            Some(level) => Level::Precise(level),
            None => Level::Default,
        }
    }

    async fn encode(&self, encoding: Encoding, body: &[u8]) -> Result<Vec<u8>, Error> {
        match encoding {
            #[cfg(feature = "compression-brotli")]
            Encoding::Brotli => {
                let mut encoder = BrotliEncoder::with_quality(Vec::new(), self.level());
                encoder.write_all(body).await?;
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
            #[cfg(feature = "compression-gzip")]
            Encoding::Gzip => {
                let mut encoder = GzipEncoder::with_quality(Vec::new(), self.level());
                encoder.write_all(body).await?;
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
            #[cfg(feature = "compression-gzip")]
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::with_quality(Vec::new(), self.level());
                encoder.write_all(body).await?;
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
            _ => Ok(body.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn json_response(size: usize) -> GatewayResponse {
        let value = serde_json::json!({ "data": "x".repeat(size) });
        GatewayResponse::json(StatusCode::OK, &value)
    }

    fn compressor(config: CompressionConfig) -> Compressor {
        Compressor::new(config).unwrap()
    }

    #[tokio::test]
    #[cfg(feature = "compression-gzip")]
    async fn it_compresses_with_negotiated_algorithm() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(2048);
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        assert_eq!(response.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers.get(VARY).unwrap(), "accept-encoding");
        assert!(response.body.len() < 2048);
        assert!(response.headers.contains_key(X_ORIGINAL_SIZE));
        assert!(response.headers.contains_key(X_COMPRESSION_RATIO));
    }

    #[tokio::test]
    #[cfg(feature = "compression-brotli")]
    async fn it_prefers_configured_order() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(2048);
        let accept = HeaderValue::from_static("gzip, br");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        // brotli leads the default preference list
        assert_eq!(response.headers.get(CONTENT_ENCODING).unwrap(), "br");
    }

    #[tokio::test]
    async fn it_skips_small_bodies() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(100);
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        assert!(!response.headers.contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn it_skips_unlisted_content_types() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(2048);
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        assert!(!response.headers.contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn it_respects_handler_set_content_encoding() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(2048);
        response.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        assert_eq!(response.headers.get(CONTENT_ENCODING).unwrap(), "identity");
        assert!(!response.headers.contains_key(VARY));
    }

    #[tokio::test]
    async fn it_skips_excluded_targets() {
        let compressor = compressor(CompressionConfig {
            exclude_patterns: vec!["^/api/stream".into()],
            ..Default::default()
        });
        let mut response = json_response(2048);
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/stream/42").await.unwrap();

        assert!(!response.headers.contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn it_skips_without_accept_encoding() {
        let compressor = compressor(CompressionConfig::default());
        let mut response = json_response(2048);

        compressor.compress(&mut response, None, "/api/data").await.unwrap();

        assert!(!response.headers.contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    #[cfg(feature = "compression-gzip")]
    async fn it_round_trips_gzip() {
        use async_compression::tokio::write::GzipDecoder;

        let compressor = compressor(CompressionConfig::default());
        let original = json_response(2048);
        let mut response = original.clone();
        let accept = HeaderValue::from_static("gzip");

        compressor.compress(&mut response, Some(&accept), "/api/data").await.unwrap();

        let mut decoder = GzipDecoder::new(Vec::new());
        decoder.write_all(&response.body).await.unwrap();
        decoder.shutdown().await.unwrap();

        assert_eq!(decoder.into_inner(), original.body.to_vec());
    }

    #[tokio::test]
    #[cfg(feature = "compression-gzip")]
    async fn it_counts_statistics() {
        let compressor = compressor(CompressionConfig::default());
        let accept = HeaderValue::from_static("gzip");

        let mut big = json_response(2048);
        compressor.compress(&mut big, Some(&accept), "/a").await.unwrap();
        let mut small = json_response(10);
        compressor.compress(&mut small, Some(&accept), "/b").await.unwrap();

        let stats = compressor.stats();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.compressed, 1);
        assert_eq!(stats.skipped, 1);
        assert!(stats.bytes_out < stats.bytes_in);
        assert!(stats.ratio < 1.0);
    }

    #[test]
    fn it_rejects_malformed_exclude_pattern() {
        let result = Compressor::new(CompressionConfig {
            exclude_patterns: vec!["([".into()],
            ..Default::default()
        });

        assert!(result.is_err());
    }
}
