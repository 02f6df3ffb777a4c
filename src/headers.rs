//! HTTP header tools and gateway-specific header names

use hyper::http::HeaderName;

pub use encoding::{AcceptEncoding, Encoding};

pub mod encoding;

/// Marks whether a response was served from the cache (`HIT`/`MISS`).
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Carries the cache fingerprint of a served entry.
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

/// The configured per-window request cap.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Unix timestamp (seconds) when the current window closes.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Request header carrying the CSRF token for state-changing methods.
pub const X_CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");

/// Body size before compression, in bytes.
pub const X_ORIGINAL_SIZE: HeaderName = HeaderName::from_static("x-original-size");

/// Compressed-to-original size ratio, two decimals.
pub const X_COMPRESSION_RATIO: HeaderName = HeaderName::from_static("x-compression-ratio");
