//! The response value the pipeline assembles and hands back

use bytes::Bytes;
use hyper::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    http::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};

use crate::error::{Error, ErrorKind};

/// A complete response captured as a value: status, headers and body bytes.
///
/// Handlers and pipeline stages build and mutate this value; nothing is
/// written to the wire until the surrounding server serializes it.
#[derive(Debug, Clone, Default)]
pub struct GatewayResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Bytes,
}

impl GatewayResponse {
    /// Creates an empty response with the given `status`.
    pub fn new(status: StatusCode) -> Self {
        Self { status, ..Default::default() }
    }

    /// Creates a JSON response; the body is the serialized `value`.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        let mut response = Self::new(status);
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = Bytes::from(body);
        response
    }

    /// Creates a plain-text response.
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response.body = Bytes::from(text.into());
        response
    }

    /// Creates the standard error body for a failed stage.
    ///
    /// Production mode writes `{"error":"<kind>"}` only; development mode
    /// adds the descriptive message.
    pub fn from_error(err: &Error, dev_mode: bool) -> Self {
        let kind = err.kind();
        let body = match err.message() {
            Some(message) if dev_mode => serde_json::json!({
                "error": kind.as_str(),
                "message": message,
            }),
            _ => serde_json::json!({ "error": kind.as_str() }),
        };
        Self::json(kind.status(), &body)
    }

    /// Creates the standard error body for a bare error kind.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::json(kind.status(), &serde_json::json!({ "error": kind.as_str() }))
    }

    /// Adds a header, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Folds `staged` headers in without overriding values a later stage
    /// or the handler already set. `Vary` values accumulate instead.
    pub(crate) fn merge_staged(&mut self, staged: HeaderMap) {
        // Repeated values of one staged header arrive with the name elided.
        let mut current: Option<HeaderName> = None;
        for (name, value) in staged {
            if let Some(name) = name {
                current = Some(name);
            }
            let Some(name) = current.clone() else { continue };
            if name == hyper::header::VARY {
                self.headers.append(name, value);
                continue;
            }
            if let hyper::http::header::Entry::Vacant(entry) = self.headers.entry(name) {
                entry.insert(value);
            }
        }
    }

    /// Refreshes `Content-Length` to match the current body.
    pub(crate) fn set_content_length(&mut self) {
        if let Ok(value) = HeaderValue::from_str(&self.body.len().to_string()) {
            self.headers.insert(CONTENT_LENGTH, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderName;

    #[test]
    fn it_builds_json_response() {
        let response = GatewayResponse::json(StatusCode::OK, &serde_json::json!({ "ok": true }));

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(&response.body[..], br#"{"ok":true}"#);
    }

    #[test]
    fn it_hides_message_in_production() {
        let err = Error::new(ErrorKind::HandlerFailure, "db connection refused");

        let response = GatewayResponse::from_error(&err, false);

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&response.body[..], br#"{"error":"handler_failure"}"#);
    }

    #[test]
    fn it_includes_message_in_dev_mode() {
        let err = Error::new(ErrorKind::HandlerFailure, "db connection refused");

        let response = GatewayResponse::from_error(&err, true);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();

        assert_eq!(body["error"], "handler_failure");
        assert_eq!(body["message"], "db connection refused");
    }

    #[test]
    fn it_merges_staged_headers_without_overriding() {
        let name = HeaderName::from_static("x-test");
        let mut response = GatewayResponse::new(StatusCode::OK)
            .with_header(name.clone(), HeaderValue::from_static("handler"));

        let mut staged = HeaderMap::new();
        staged.insert(name.clone(), HeaderValue::from_static("staged"));
        staged.insert(HeaderName::from_static("x-extra"), HeaderValue::from_static("kept"));
        response.merge_staged(staged);

        assert_eq!(response.headers.get(&name).unwrap(), "handler");
        assert_eq!(response.headers.get("x-extra").unwrap(), "kept");
    }

    #[test]
    fn it_sets_content_length() {
        let mut response = GatewayResponse::text(StatusCode::OK, "hello");
        response.set_content_length();

        assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), "5");
    }
}
