//! Cache fingerprint derivation

use hyper::http::{Method, Uri};
use sha1::{Digest, Sha1};

use std::fmt::Write;

/// Hex chars kept from the digest; collision risk at this length is a
/// birthday bound over the store size, which the cache accepts.
const FINGERPRINT_LEN: usize = 16;

/// Derives the fixed-length fingerprint identifying one cacheable request
/// variant.
///
/// The digest covers the method, the request target, the canonicalized
/// query, a digest of the body when one is provided, and the configured
/// vary-by header values.
pub(crate) fn compute(
    method: &Method,
    uri: &Uri,
    body: Option<&[u8]>,
    vary_values: &[&str],
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(uri.path().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_query(uri.query().unwrap_or_default()).as_bytes());
    hasher.update(b"\n");
    if let Some(body) = body {
        hasher.update(hex_digest(body).as_bytes());
    }
    for value in vary_values {
        hasher.update(b"\n");
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    to_hex(&digest, FINGERPRINT_LEN)
}

/// Re-serializes the query with its pairs sorted by key so equivalent
/// targets share one fingerprint.
fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query).unwrap_or_default();
    pairs.sort();
    serde_urlencoded::to_string(&pairs).unwrap_or_default()
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    to_hex(&digest, digest.len() * 2)
}

fn to_hex(bytes: &[u8], max_chars: usize) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(max_chars);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn it_produces_fixed_length_hex() {
        let fp = compute(&Method::GET, &uri("/api/data"), None, &[]);

        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn it_is_deterministic() {
        let a = compute(&Method::GET, &uri("/api/data?x=1"), None, &[]);
        let b = compute(&Method::GET, &uri("/api/data?x=1"), None, &[]);

        assert_eq!(a, b);
    }

    #[test]
    fn it_canonicalizes_query_order() {
        let a = compute(&Method::GET, &uri("/api/data?a=1&b=2"), None, &[]);
        let b = compute(&Method::GET, &uri("/api/data?b=2&a=1"), None, &[]);

        assert_eq!(a, b);
    }

    #[test]
    fn it_separates_methods_and_paths() {
        let get = compute(&Method::GET, &uri("/api/data"), None, &[]);
        let post = compute(&Method::POST, &uri("/api/data"), None, &[]);
        let other = compute(&Method::GET, &uri("/api/other"), None, &[]);

        assert_ne!(get, post);
        assert_ne!(get, other);
    }

    #[test]
    fn it_separates_bodies() {
        let a = compute(&Method::POST, &uri("/api/data"), Some(b"a"), &[]);
        let b = compute(&Method::POST, &uri("/api/data"), Some(b"b"), &[]);
        let none = compute(&Method::POST, &uri("/api/data"), None, &[]);

        assert_ne!(a, b);
        assert_ne!(a, none);
    }

    #[test]
    fn it_separates_vary_values() {
        let alice = compute(&Method::GET, &uri("/api/data"), None, &["A"]);
        let bob = compute(&Method::GET, &uri("/api/data"), None, &["B"]);

        assert_ne!(alice, bob);
    }
}
