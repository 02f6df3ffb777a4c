//! Route handler contract
//!
//! A route is a record of optional per-method handler functions. Handlers
//! receive a [`HandlerRequest`] view and return a response value; the
//! pipeline owns all response mutation. The legacy single-function shape
//! (request plus response writer) is adapted into the same value at the
//! dispatch boundary.

use bytes::Bytes;
use cookie::Cookie;
use futures_util::future::BoxFuture;
use hyper::http::{HeaderMap, Method, Uri};
use serde_json::Value;

use std::{
    collections::HashMap,
    future::Future,
    net::IpAddr,
    sync::{Arc, Mutex},
};

use crate::{
    csrf::CsrfStore,
    error::Error,
    http::GatewayResponse,
};

/// What a handler returns: a complete response value or an error the
/// pipeline maps to `handler_failure`.
pub type HandlerResult = Result<GatewayResponse, Error>;

/// A boxed per-method handler function.
pub type HandlerFn = Arc<
    dyn Fn(HandlerRequest) -> BoxFuture<'static, HandlerResult>
    + Send
    + Sync
>;

/// A pluggable authentication predicate; runs before handler dispatch.
/// Returning `false` terminates the request with 401.
///
/// The request reference is only live during the synchronous part of the
/// call, so the predicate inspects headers and populates
/// [`HandlerRequest::user`] up front and clones whatever the async part
/// (token lookups, session reads) needs.
pub type AuthPredicate = Arc<
    dyn Fn(&mut HandlerRequest) -> BoxFuture<'static, bool>
    + Send
    + Sync
>;

/// The request body as handlers see it.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// No body bytes were sent.
    #[default]
    Empty,
    /// Raw body bytes (non-JSON content types, or unparseable JSON).
    Raw(Bytes),
    /// Parsed (and, when enabled, sanitized) JSON body.
    Json(Value),
}

impl Payload {
    /// The parsed JSON body, when there is one.
    #[inline]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The raw body bytes, when the body was kept unparsed.
    #[inline]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// The request view handed to route handlers.
pub struct HandlerRequest {
    /// Request method.
    pub method: Method,
    /// Full request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Parameters bound by the matched route pattern.
    pub params: HashMap<String, String>,
    /// The request body.
    pub body: Payload,
    /// The client the request came from.
    pub client_addr: IpAddr,
    /// Slot populated by the authentication predicate.
    pub user: Option<Value>,
    cookies: Vec<Cookie<'static>>,
    csrf: Arc<CsrfStore>,
}

impl HandlerRequest {
    pub(crate) fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        params: HashMap<String, String>,
        body: Payload,
        client_addr: IpAddr,
        csrf: Arc<CsrfStore>,
    ) -> Self {
        let cookies = headers
            .get(hyper::header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                Cookie::split_parse(value.to_owned())
                    .filter_map(Result::ok)
                    .map(Cookie::into_owned)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            method,
            uri,
            headers,
            params,
            body,
            client_addr,
            user: None,
            cookies,
            csrf,
        }
    }

    /// A route parameter bound by the matched pattern.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Cookies parsed from the `Cookie` header.
    #[inline]
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    /// The value of a named cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.value())
    }

    /// Mints a CSRF token for this client; see [`CsrfStore::issue`].
    #[inline]
    pub fn issue_csrf_token(&self) -> String {
        self.csrf.issue()
    }
}

/// A record of optional handler-per-method functions for one route.
///
/// # Example
/// ```no_run
/// use sluice::handler::RouteHandler;
/// use sluice::http::{GatewayResponse, StatusCode};
///
/// let route = RouteHandler::new()
///     .get(|_req| async {
///         Ok(GatewayResponse::text(StatusCode::OK, "hello"))
///     });
/// ```
#[derive(Clone, Default)]
pub struct RouteHandler {
    get: Option<HandlerFn>,
    post: Option<HandlerFn>,
    put: Option<HandlerFn>,
    patch: Option<HandlerFn>,
    delete: Option<HandlerFn>,
    head: Option<HandlerFn>,
    options: Option<HandlerFn>,
    fallback: Option<HandlerFn>,
}

macro_rules! define_method_setters({$($method:ident)*} => {
    impl RouteHandler {
        $(
        #[doc = concat!("Sets the handler invoked for HTTP ", stringify!($method), " requests.")]
        pub fn $method<F, Fut>(mut self, handler: F) -> Self
        where
            F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerResult> + Send + 'static,
        {
            self.$method = Some(box_handler(handler));
            self
        }
        )*
    }
});

define_method_setters! {
    get
    post
    put
    patch
    delete
    head
    options
}

impl RouteHandler {
    /// Creates an empty route record; unmatched methods answer 405.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a legacy single-function handler that assembles its response
    /// through a [`ResponseWriter`]. The wrapped function serves every
    /// method the per-method fields leave unset.
    ///
    /// # Example
    /// ```no_run
    /// use sluice::handler::RouteHandler;
    ///
    /// let route = RouteHandler::legacy(|_req, res| async move {
    ///     res.status(200).json(&serde_json::json!({ "ok": true }));
    ///     Ok(())
    /// });
    /// ```
    pub fn legacy<F, Fut>(handler: F) -> Self
    where
        F: Fn(HandlerRequest, ResponseWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let fallback: HandlerFn = Arc::new(move |req| {
            let handler = handler.clone();
            Box::pin(async move {
                let writer = ResponseWriter::new();
                handler(req, writer.clone()).await?;
                Ok(writer.capture())
            })
        });
        Self { fallback: Some(fallback), ..Default::default() }
    }

    /// The handler serving `method`, if any.
    ///
    /// HEAD falls back to the GET handler (the pipeline strips the body);
    /// any method falls back to the legacy handler when one is set.
    pub(crate) fn for_method(&self, method: &Method) -> Option<HandlerFn> {
        let slot = match method.as_str() {
            "GET" => &self.get,
            "POST" => &self.post,
            "PUT" => &self.put,
            "PATCH" => &self.patch,
            "DELETE" => &self.delete,
            "HEAD" if self.head.is_some() => &self.head,
            "HEAD" => &self.get,
            "OPTIONS" => &self.options,
            _ => &None,
        };
        slot.as_ref().or(self.fallback.as_ref()).cloned()
    }
}

#[inline]
fn box_handler<F, Fut>(handler: F) -> HandlerFn
where
    F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |req| Box::pin(handler(req)))
}

/// The response builder handed to legacy handlers.
///
/// Captures status, headers and body into the same response value the
/// primary handler shape returns.
#[derive(Clone, Default)]
pub struct ResponseWriter {
    inner: Arc<Mutex<GatewayResponse>>,
}

impl ResponseWriter {
    fn new() -> Self {
        let response = GatewayResponse::new(hyper::StatusCode::OK);
        Self { inner: Arc::new(Mutex::new(response)) }
    }

    /// Sets the response status; invalid codes are ignored.
    pub fn status(&self, code: u16) -> &Self {
        if let Ok(status) = hyper::StatusCode::from_u16(code) {
            if let Ok(mut response) = self.inner.lock() {
                response.status = status;
            }
        }
        self
    }

    /// Sets a response header; invalid names or values are ignored.
    pub fn header(&self, name: &str, value: &str) -> &Self {
        let name = name.parse::<hyper::http::HeaderName>();
        let value = value.parse::<hyper::http::HeaderValue>();
        if let (Ok(name), Ok(value)) = (name, value) {
            if let Ok(mut response) = self.inner.lock() {
                response.headers.insert(name, value);
            }
        }
        self
    }

    /// Writes a JSON body.
    pub fn json(&self, value: &Value) {
        if let Ok(mut response) = self.inner.lock() {
            let status = response.status;
            let headers = std::mem::take(&mut response.headers);
            *response = GatewayResponse::json(status, value);
            response.merge_staged(headers);
        }
    }

    /// Writes a plain-text body.
    pub fn send(&self, text: impl Into<String>) {
        if let Ok(mut response) = self.inner.lock() {
            let status = response.status;
            let headers = std::mem::take(&mut response.headers);
            *response = GatewayResponse::text(status, text);
            response.merge_staged(headers);
        }
    }

    fn capture(self) -> GatewayResponse {
        self.inner
            .lock()
            .map(|response| response.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csrf::{CsrfConfig, CsrfStore};
    use crate::time::SystemTimeSource;
    use hyper::StatusCode;

    fn make_request(method: Method) -> HandlerRequest {
        let csrf = Arc::new(CsrfStore::new(CsrfConfig::default(), Arc::new(SystemTimeSource)));
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::COOKIE, "session=abc; theme=dark".parse().unwrap());
        HandlerRequest::new(
            method,
            "/api/users/42".parse().unwrap(),
            headers,
            HashMap::from([("id".into(), "42".into())]),
            Payload::Empty,
            IpAddr::from([127, 0, 0, 1]),
            csrf,
        )
    }

    #[tokio::test]
    async fn it_dispatches_by_method() {
        let route = RouteHandler::new()
            .get(|_req| async { Ok(GatewayResponse::text(StatusCode::OK, "get")) })
            .post(|_req| async { Ok(GatewayResponse::text(StatusCode::CREATED, "post")) });

        let handler = route.for_method(&Method::POST).unwrap();
        let response = handler(make_request(Method::POST)).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert!(route.for_method(&Method::DELETE).is_none());
    }

    #[tokio::test]
    async fn it_falls_back_to_get_for_head() {
        let route = RouteHandler::new()
            .get(|_req| async { Ok(GatewayResponse::text(StatusCode::OK, "get")) });

        assert!(route.for_method(&Method::HEAD).is_some());
    }

    #[tokio::test]
    async fn it_adapts_legacy_handlers() {
        let route = RouteHandler::legacy(|_req, res| async move {
            res.status(201).header("x-legacy", "yes");
            res.json(&serde_json::json!({ "made": true }));
            Ok(())
        });

        let handler = route.for_method(&Method::PUT).unwrap();
        let response = handler(make_request(Method::PUT)).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.get("x-legacy").unwrap(), "yes");
        assert_eq!(&response.body[..], br#"{"made":true}"#);
    }

    #[test]
    fn it_parses_cookies() {
        let request = make_request(Method::GET);

        assert_eq!(request.cookie("session"), Some("abc"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.cookie("missing"), None);
    }

    #[test]
    fn it_exposes_route_params() {
        let request = make_request(Method::GET);

        assert_eq!(request.param("id"), Some("42"));
    }

    #[test]
    fn it_issues_csrf_tokens() {
        let request = make_request(Method::GET);

        let token = request.issue_csrf_token();

        assert_eq!(token.len(), 32);
    }
}
