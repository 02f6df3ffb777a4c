//! Per-request context threaded through the pipeline

use bytes::Bytes;
use hyper::{
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    Request,
};
use tokio::time::Instant;

use std::net::IpAddr;

use crate::{
    error::Error,
    http::body::{BoxBody, HttpBody},
};

enum BodySlot {
    /// Unread request body stream.
    Stream(BoxBody),
    /// Body collected into memory, available for repeated inspection.
    Buffered(Bytes),
}

/// Carries one request through the pipeline.
///
/// Created once per request and destroyed when the final stage returns or
/// the deadline expires. Only the currently executing stage mutates it.
pub struct RequestContext {
    parts: Parts,
    body: BodySlot,
    client_addr: IpAddr,
    max_body_size: usize,
    deadline: Instant,
    /// Headers stages write before the final response exists.
    pub(crate) staged: HeaderMap,
}

impl RequestContext {
    /// Splits `request` into a pipeline context.
    pub(crate) fn new(
        request: Request<BoxBody>,
        client_addr: IpAddr,
        max_body_size: usize,
        deadline: Instant,
    ) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            parts,
            body: BodySlot::Stream(body),
            client_addr,
            max_body_size,
            deadline,
            staged: HeaderMap::new(),
        }
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    #[inline]
    pub fn query(&self) -> &str {
        self.parts.uri.query().unwrap_or_default()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    #[inline]
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.parts.headers.get(name)
    }

    #[inline]
    pub fn client_addr(&self) -> IpAddr {
        self.client_addr
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Target path and query, for logging and error events.
    pub fn target(&self) -> String {
        self.parts
            .uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| self.parts.uri.path().to_string())
    }

    /// Stages a response header for the final response.
    #[inline]
    pub fn stage_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.staged.insert(name, value);
    }

    /// Collects the request body, enforcing the configured byte ceiling.
    ///
    /// The collected bytes are memoized so the fingerprint step and the
    /// body-reader stage share one read.
    pub(crate) async fn read_body(&mut self) -> Result<Bytes, Error> {
        if let BodySlot::Buffered(bytes) = &self.body {
            return Ok(bytes.clone());
        }
        let slot = std::mem::replace(&mut self.body, BodySlot::Buffered(Bytes::new()));
        let BodySlot::Stream(stream) = slot else { unreachable!() };
        let bytes = HttpBody::read_limited(stream, self.max_body_size).await?;
        self.body = BodySlot::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Reassembles the original request so a declined call can hand it back
    /// to the surrounding server.
    pub(crate) fn into_request(self) -> Request<BoxBody> {
        let body = match self.body {
            BodySlot::Stream(stream) => stream,
            BodySlot::Buffered(bytes) => HttpBody::full(bytes),
        };
        Request::from_parts(self.parts, body)
    }
}
