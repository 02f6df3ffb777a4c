//! Content-coding negotiation primitives

use hyper::http::HeaderValue;

use std::{
    fmt,
    str::FromStr
};

/// A content coding the compressor can negotiate.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Encoding {
    Any,
    Identity,
    #[cfg(feature = "compression-brotli")]
    Brotli,
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-gzip")]
    Deflate,
}

impl Encoding {
    /// Returns `true` if the encoding is `*` (star)
    #[inline]
    pub(crate) fn is_any(&self) -> bool {
        self == &Encoding::Any
    }
}

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tokens compare case-insensitively per RFC 9110.
        match s.to_ascii_lowercase().as_str() {
            "*" => Ok(Encoding::Any),
            "identity" => Ok(Encoding::Identity),
            #[cfg(feature = "compression-brotli")]
            "br" => Ok(Encoding::Brotli),
            #[cfg(feature = "compression-gzip")]
            "gzip" => Ok(Encoding::Gzip),
            #[cfg(feature = "compression-gzip")]
            "deflate" => Ok(Encoding::Deflate),
            _ => Err(UnknownEncoding),
        }
    }
}

impl fmt::Display for Encoding {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Encoding::Any => "*",
            Encoding::Identity => "identity",
            #[cfg(feature = "compression-brotli")]
            Encoding::Brotli => "br",
            #[cfg(feature = "compression-gzip")]
            Encoding::Gzip => "gzip",
            #[cfg(feature = "compression-gzip")]
            Encoding::Deflate => "deflate",
        })
    }
}

impl From<Encoding> for HeaderValue {
    #[inline]
    fn from(encoding: Encoding) -> HeaderValue {
        HeaderValue::from_str(&encoding.to_string())
            .unwrap_or(HeaderValue::from_static("identity"))
    }
}

/// Marker error for unrecognized content-coding tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEncoding;

/// The set of codings a client advertised in `Accept-Encoding`.
///
/// Quality values are parsed past but not honored; the configured
/// algorithm preference list decides the pick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcceptEncoding {
    accepted: Vec<Encoding>,
}

impl AcceptEncoding {
    /// Parses an `Accept-Encoding` header value. Unknown tokens are skipped.
    pub fn parse(header: &HeaderValue) -> Self {
        let Ok(value) = header.to_str() else {
            return Self::default();
        };
        let accepted = value
            .split(',')
            .filter_map(|part| {
                let token = part.split(';').next().unwrap_or_default().trim();
                Encoding::from_str(token).ok()
            })
            .collect();
        Self { accepted }
    }

    /// Returns `true` if the client accepts `encoding`, either literally
    /// or through a `*` wildcard.
    #[inline]
    pub fn accepts(&self, encoding: Encoding) -> bool {
        self.accepted
            .iter()
            .any(|e| *e == encoding || e.is_any())
    }

    /// Returns `true` if no known coding was advertised.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_from_str() {
        let encodings = [
            ("*", Encoding::Any),
            ("identity", Encoding::Identity),
            #[cfg(feature = "compression-brotli")]
            ("br", Encoding::Brotli),
            #[cfg(feature = "compression-gzip")]
            ("gzip", Encoding::Gzip),
            #[cfg(feature = "compression-gzip")]
            ("deflate", Encoding::Deflate),
        ];

        for (encoding_str, encoding) in encodings {
            assert_eq!(Encoding::from_str(encoding_str).unwrap(), encoding);
        }
    }

    #[test]
    #[cfg(feature = "compression-gzip")]
    fn it_parses_case_insensitively() {
        assert_eq!(Encoding::from_str("GZip").unwrap(), Encoding::Gzip);
    }

    #[test]
    fn it_returns_error_for_unknown_token() {
        assert!(Encoding::from_str("abc").is_err());
    }

    #[test]
    #[cfg(feature = "compression-gzip")]
    fn it_parses_accept_encoding_with_qualities() {
        let header = HeaderValue::from_static("gzip;q=0.8, deflate;q=0.5, unknown");
        let accept = AcceptEncoding::parse(&header);

        assert!(accept.accepts(Encoding::Gzip));
        assert!(accept.accepts(Encoding::Deflate));
    }

    #[test]
    #[cfg(feature = "compression-brotli")]
    fn it_accepts_through_wildcard() {
        let header = HeaderValue::from_static("*");
        let accept = AcceptEncoding::parse(&header);

        assert!(accept.accepts(Encoding::Brotli));
    }

    #[test]
    #[cfg(feature = "compression-brotli")]
    fn it_rejects_unlisted_encoding() {
        let header = HeaderValue::from_static("identity");
        let accept = AcceptEncoding::parse(&header);

        assert!(!accept.accepts(Encoding::Brotli));
    }

    #[test]
    fn it_handles_empty_header() {
        let header = HeaderValue::from_static("");
        let accept = AcceptEncoding::parse(&header);

        assert!(accept.is_empty());
    }
}
