//! Error handling tools
//!
//! Every pipeline stage reports failures through [`Error`], which carries a
//! stable [`ErrorKind`]. The kind maps to an HTTP status and to the
//! `{"error":"<kind>"}` body written to clients; the optional message is only
//! exposed in development mode.

use hyper::{Method, StatusCode};
use std::{error::Error as StdError, fmt, net::IpAddr};

/// Stable failure categories surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request deadline elapsed before a response was produced.
    RequestTimeout,
    /// The request method is not in the configured allow-list.
    MethodNotAllowed,
    /// The client exceeded its request window.
    RateLimited,
    /// A state-changing request carried a missing, unknown or expired token.
    CsrfInvalid,
    /// The request body exceeded the configured ceiling.
    BodyTooLarge,
    /// Reserved; not emitted by the pipeline.
    UnsupportedMediaType,
    /// No route pattern matched; the engine declines the request.
    RouteNotFound,
    /// The route handler returned an error or panicked.
    HandlerFailure,
    /// The gateway configuration is unusable; raised at build time only.
    ConfigInvalid,
}

impl ErrorKind {
    /// The wire name of this kind, as written into error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CsrfInvalid => "csrf_invalid",
            ErrorKind::BodyTooLarge => "body_too_large",
            ErrorKind::UnsupportedMediaType => "unsupported_media_type",
            ErrorKind::RouteNotFound => "route_not_found",
            ErrorKind::HandlerFailure => "handler_failure",
            ErrorKind::ConfigInvalid => "config_invalid",
        }
    }

    /// The HTTP status this kind maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::CsrfInvalid => StatusCode::FORBIDDEN,
            ErrorKind::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::RouteNotFound => StatusCode::NOT_FOUND,
            ErrorKind::HandlerFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ConfigInvalid => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic gateway error
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates an error of the given `kind` with a descriptive message.
    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: Some(message.into()) }
    }

    /// Creates a bare error of the given `kind`.
    #[inline]
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self { kind, message: None }
    }

    /// Shortcut for a [`ErrorKind::ConfigInvalid`] error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// Shortcut for a [`ErrorKind::HandlerFailure`] error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerFailure, message)
    }

    /// The failure category.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The descriptive message, when one was attached.
    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The HTTP status this error maps to.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => self.kind.fmt(f),
        }
    }
}

impl StdError for Error {}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::handler(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::handler(err.to_string())
    }
}

impl From<hyper::http::Error> for Error {
    #[inline]
    fn from(err: hyper::http::Error) -> Self {
        Self::handler(err.to_string())
    }
}

/// A structured failure record handed to the configured [`ErrorSink`].
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// The failure category.
    pub kind: ErrorKind,
    /// Request method.
    pub method: Method,
    /// Request target (path and query).
    pub target: String,
    /// The client the request came from.
    pub client_addr: IpAddr,
    /// Human-readable detail; never written to production responses.
    pub message: String,
}

/// Receives structured failure events; delivery is external to the engine.
///
/// The default sink logs through `tracing`. Applications can plug their own
/// sink to forward events to an error-reporting service.
pub trait ErrorSink: Send + Sync + 'static {
    /// Consumes one failure event.
    fn report(&self, event: ErrorEvent);
}

/// The default [`ErrorSink`] backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, event: ErrorEvent) {
        tracing::error!(
            kind = event.kind.as_str(),
            method = %event.method,
            target = %event.target,
            client = %event.client_addr,
            "{}", event.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_kinds_to_statuses() {
        assert_eq!(ErrorKind::RequestTimeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(ErrorKind::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ErrorKind::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::CsrfInvalid.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::BodyTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorKind::UnsupportedMediaType.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(ErrorKind::HandlerFailure.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn it_keeps_wire_names_stable() {
        assert_eq!(ErrorKind::RequestTimeout.as_str(), "request_timeout");
        assert_eq!(ErrorKind::RateLimited.as_str(), "rate_limited");
        assert_eq!(ErrorKind::CsrfInvalid.as_str(), "csrf_invalid");
        assert_eq!(ErrorKind::BodyTooLarge.as_str(), "body_too_large");
        assert_eq!(ErrorKind::HandlerFailure.as_str(), "handler_failure");
    }

    #[test]
    fn it_formats_error_with_message() {
        let err = Error::new(ErrorKind::HandlerFailure, "boom");

        assert_eq!(err.to_string(), "handler_failure: boom");
        assert_eq!(err.message(), Some("boom"));
    }

    #[test]
    fn it_converts_io_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();

        assert_eq!(err.kind(), ErrorKind::HandlerFailure);
    }
}
