//! The fixed request pipeline
//!
//! Drives a request through the stage sequence: path guard, deadline,
//! security headers, CORS, method filter, rate limiting, CSRF, route
//! resolution, cache lookup, body reading, handler dispatch, cache store
//! and compression. The order is part of the contract: security and CORS
//! run before any state is touched, rate limiting runs before CSRF so
//! abusive clients cannot exhaust token state, and resolution runs after
//! rate limiting so unmatched paths still count toward the limit.

use futures_util::FutureExt;
use hyper::{
    header::{ACCEPT_ENCODING, CONTENT_TYPE, ORIGIN, RETRY_AFTER},
    http::{HeaderValue, Method},
    Request, StatusCode,
};
use tokio::time::Instant;

use std::net::IpAddr;

use crate::{
    cache::CacheProbe,
    csrf::STATE_CHANGING_METHODS,
    error::{Error, ErrorEvent, ErrorKind},
    gateway::{Engine, Outcome, STATUS_SEGMENT},
    handler::{HandlerRequest, Payload},
    headers::{X_CACHE, X_CACHE_KEY, X_CSRF_TOKEN, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET},
    http::{
        sanitize::sanitize_value,
        security, BoxBody, GatewayResponse, RequestContext,
    },
    rate_limit::RateDecision,
};

const CACHE_HIT: HeaderValue = HeaderValue::from_static("HIT");
const CACHE_MISS: HeaderValue = HeaderValue::from_static("MISS");

/// What a guarded stage decided.
enum Flow {
    /// A complete response; later stages already ran.
    Respond(GatewayResponse),
    /// No route matched; hand the request back.
    Decline,
}

impl Engine {
    /// Drives `request` through the pipeline.
    ///
    /// Returns [`Outcome::Declined`] when the request target is outside the
    /// configured prefix or no route pattern matches; the surrounding
    /// server then continues its own dispatch.
    pub async fn handle(&self, request: Request<BoxBody>, client_addr: IpAddr) -> Outcome {
        // Stage 1: path guard.
        if local_path(&self.inner.prefix, request.uri().path()).is_none() {
            return Outcome::Declined(request);
        }

        // Stage 2: arm the deadline. It governs every stage from the rate
        // limiter through the compressor.
        let deadline = Instant::now() + self.inner.request_timeout;
        let mut ctx = RequestContext::new(request, client_addr, self.inner.max_body_size, deadline);

        // Stage 3: security headers.
        if self.inner.enable_security_headers {
            security::write_headers(&mut ctx.staged);
        }

        // Stage 4: CORS, with the preflight short-circuit.
        if let Some(cors) = &self.inner.cors {
            let origin = ctx.header(&ORIGIN).cloned();
            let preflight = ctx.method() == Method::OPTIONS;
            cors.apply(origin.as_ref(), preflight, &mut ctx.staged);
            if preflight {
                // Responses terminating before stage 6 still report the
                // counter state; only the limiter stage charges the window.
                let decision = self.inner.limiter.peek(&ctx.client_addr().to_string());
                self.stage_rate_headers(&mut ctx, &decision);
                let mut response = GatewayResponse::new(StatusCode::NO_CONTENT);
                response.merge_staged(std::mem::take(&mut ctx.staged));
                return Outcome::Handled(response);
            }
        }

        // Stage 5: method filter.
        if !self.inner.allowed_methods.contains(ctx.method()) {
            let decision = self.inner.limiter.peek(&ctx.client_addr().to_string());
            self.stage_rate_headers(&mut ctx, &decision);
            return Outcome::Handled(self.fail(&mut ctx, Error::from_kind(ErrorKind::MethodNotAllowed)));
        }

        // Diagnostic endpoint; kept ahead of the rate limiter so it stays
        // reachable under load shedding.
        let status_path = format!("/{STATUS_SEGMENT}");
        if self.inner.status_endpoint
            && ctx.method() == Method::GET
            && local_path(&self.inner.prefix, ctx.path()) == Some(status_path.as_str())
        {
            let decision = self.inner.limiter.peek(&ctx.client_addr().to_string());
            self.stage_rate_headers(&mut ctx, &decision);
            let mut response = GatewayResponse::json(StatusCode::OK, &self.status_snapshot());
            response.merge_staged(std::mem::take(&mut ctx.staged));
            return Outcome::Handled(response);
        }

        // Stages 6-13 run under the deadline.
        match tokio::time::timeout_at(deadline, Box::pin(self.run_guarded(&mut ctx))).await {
            Ok(Flow::Respond(response)) => Outcome::Handled(response),
            Ok(Flow::Decline) => Outcome::Declined(ctx.into_request()),
            Err(_elapsed) => {
                let err = Error::new(ErrorKind::RequestTimeout, "request deadline elapsed");
                self.report(&ctx, &err);
                let mut response = GatewayResponse::from_error(&err, self.inner.dev_mode);
                response.merge_staged(std::mem::take(&mut ctx.staged));
                Outcome::Handled(response)
            }
        }
    }

    /// Stages 6 through 13.
    async fn run_guarded(&self, ctx: &mut RequestContext) -> Flow {
        let inner = &self.inner;

        // Stage 6: rate limiting.
        let decision = inner.limiter.check(&ctx.client_addr().to_string());
        self.stage_rate_headers(ctx, &decision);
        if !decision.allowed {
            let retry_after = decision.retry_after_secs(inner.clock.now_millis());
            // The limiter writes its own body so clients see the retry hint.
            let mut response = GatewayResponse::json(
                StatusCode::TOO_MANY_REQUESTS,
                &serde_json::json!({
                    "error": ErrorKind::RateLimited.as_str(),
                    "retry_after": retry_after,
                }),
            );
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers.insert(RETRY_AFTER, value);
            }
            response.merge_staged(std::mem::take(&mut ctx.staged));
            return Flow::Respond(response);
        }

        // Stage 7: CSRF verification for state-changing methods.
        if inner.enable_csrf && STATE_CHANGING_METHODS.contains(ctx.method()) {
            let valid = ctx
                .header(&X_CSRF_TOKEN)
                .and_then(|value| value.to_str().ok())
                .map(|token| inner.csrf.verify(token))
                .unwrap_or(false);
            if !valid {
                return Flow::Respond(self.fail(ctx, Error::from_kind(ErrorKind::CsrfInvalid)));
            }
        }

        // Stage 8: route resolution.
        let Some(local) = local_path(&inner.prefix, ctx.path()).map(str::to_owned) else {
            return Flow::Decline;
        };
        let Some(route) = inner.resolver.resolve(&local) else {
            return Flow::Decline;
        };

        // Stage 9: cache lookup.
        let mut cache_key = None;
        if inner.cache.is_enabled() && inner.cache.is_cacheable_method(ctx.method()) {
            let digest_body = if inner.cache.needs_body_digest(ctx.method()) {
                match ctx.read_body().await {
                    Ok(bytes) => Some(bytes),
                    Err(err) => return Flow::Respond(self.fail(ctx, err)),
                }
            } else {
                None
            };
            let key = inner.cache.key(
                ctx.method(),
                ctx.uri(),
                digest_body.as_deref(),
                ctx.headers(),
            );
            if let Some(entry) = inner.cache.lookup(&key) {
                let mut response = GatewayResponse {
                    status: entry.status,
                    headers: entry.headers.clone(),
                    body: entry.body.clone(),
                };
                response.headers.insert(X_CACHE, CACHE_HIT);
                if let Ok(value) = HeaderValue::from_str(&key) {
                    response.headers.insert(X_CACHE_KEY, value);
                }
                return Flow::Respond(self.finish(ctx, response).await);
            }
            ctx.stage_header(X_CACHE, CACHE_MISS);
            cache_key = Some(key);
        }

        // Stage 10: body reading and parsing.
        let payload = match self.read_payload(ctx).await {
            Ok(payload) => payload,
            Err(err) => return Flow::Respond(self.fail(ctx, err)),
        };

        // Stage 11: handler dispatch, behind the auth predicate.
        let mut handler_request = HandlerRequest::new(
            ctx.method().clone(),
            ctx.uri().clone(),
            ctx.headers().clone(),
            route.params,
            payload,
            ctx.client_addr(),
            inner.csrf.clone(),
        );
        if let Some(auth) = &inner.auth {
            if !auth(&mut handler_request).await {
                let mut response = GatewayResponse::json(
                    StatusCode::UNAUTHORIZED,
                    &serde_json::json!({ "error": "unauthorized" }),
                );
                response.merge_staged(std::mem::take(&mut ctx.staged));
                return Flow::Respond(response);
            }
        }

        let Some(handler) = route.handler.for_method(ctx.method()) else {
            return Flow::Respond(self.fail(ctx, Error::from_kind(ErrorKind::MethodNotAllowed)));
        };

        let response = match std::panic::AssertUnwindSafe(handler(handler_request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                let message = err.message().unwrap_or("handler returned an error").to_owned();
                let err = Error::new(ErrorKind::HandlerFailure, message);
                self.report(ctx, &err);
                return Flow::Respond(self.fail(ctx, err));
            }
            Err(panic) => {
                let err = Error::new(ErrorKind::HandlerFailure, panic_message(panic));
                self.report(ctx, &err);
                return Flow::Respond(self.fail(ctx, err));
            }
        };

        // Stage 12: cache store.
        if let Some(key) = cache_key {
            let probe = CacheProbe {
                method: ctx.method(),
                uri: ctx.uri(),
                status: response.status,
                body: &response.body,
            };
            if inner.cache.admits(&probe) {
                inner.cache.store_response(key, &response);
            }
        }

        // Stage 13: compression, then the final header merge.
        Flow::Respond(self.finish(ctx, response).await)
    }

    /// Reads and parses the request body for handler consumption.
    async fn read_payload(&self, ctx: &mut RequestContext) -> Result<Payload, Error> {
        if ctx.method() == Method::GET || ctx.method() == Method::HEAD {
            return Ok(Payload::Empty);
        }
        let bytes = ctx.read_body().await?;
        if bytes.is_empty() {
            return Ok(Payload::Empty);
        }

        let is_json = ctx
            .header(&CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .is_some_and(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str());
        if !is_json {
            return Ok(Payload::Raw(bytes));
        }

        // A body that fails to parse stays raw; dev-time handlers decide
        // what to do with it.
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(mut value) => {
                if self.inner.sanitize_input {
                    sanitize_value(&mut value);
                }
                Ok(Payload::Json(value))
            }
            Err(_) => Ok(Payload::Raw(bytes)),
        }
    }

    /// Compresses the response, folds staged headers in and strips HEAD
    /// bodies.
    async fn finish(&self, ctx: &mut RequestContext, mut response: GatewayResponse) -> GatewayResponse {
        let accept_encoding = ctx.header(&ACCEPT_ENCODING).cloned();
        let target = ctx.target();
        if let Err(err) = self
            .inner
            .compressor
            .compress(&mut response, accept_encoding.as_ref(), &target)
            .await
        {
            tracing::warn!(error = %err, "compression failed; serving identity response");
        }
        response.merge_staged(std::mem::take(&mut ctx.staged));
        if ctx.method() == Method::HEAD {
            response.set_content_length();
            response.body = bytes::Bytes::new();
        }
        response
    }

    /// Stages the `X-RateLimit-*` headers for the final response.
    fn stage_rate_headers(&self, ctx: &mut RequestContext, decision: &RateDecision) {
        stage_number(ctx, X_RATELIMIT_LIMIT, decision.limit as u64);
        stage_number(ctx, X_RATELIMIT_REMAINING, decision.remaining as u64);
        stage_number(ctx, X_RATELIMIT_RESET, decision.reset_at_secs());
    }

    /// Builds the standard error response, staged headers included.
    fn fail(&self, ctx: &mut RequestContext, err: Error) -> GatewayResponse {
        let mut response = GatewayResponse::from_error(&err, self.inner.dev_mode);
        response.merge_staged(std::mem::take(&mut ctx.staged));
        response
    }

    /// Emits a structured event to the configured error sink.
    fn report(&self, ctx: &RequestContext, err: &Error) {
        self.inner.error_sink.report(ErrorEvent {
            kind: err.kind(),
            method: ctx.method().clone(),
            target: ctx.target(),
            client_addr: ctx.client_addr(),
            message: err.message().unwrap_or_else(|| err.kind().as_str()).to_owned(),
        });
    }
}

/// The request path with the gateway prefix removed, when the prefix
/// claims it.
fn local_path<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    match path.strip_prefix(prefix) {
        Some("") => Some("/"),
        Some(rest) if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

fn stage_number(ctx: &mut RequestContext, name: hyper::http::HeaderName, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        ctx.stage_header(name, value);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_strips_prefix_from_claimed_paths() {
        assert_eq!(local_path("/api", "/api/users"), Some("/users"));
        assert_eq!(local_path("/api", "/api"), Some("/"));
        assert_eq!(local_path("/", "/anything"), Some("/anything"));
    }

    #[test]
    fn it_rejects_paths_outside_prefix() {
        assert_eq!(local_path("/api", "/health"), None);
        assert_eq!(local_path("/api", "/apiary"), None);
        assert_eq!(local_path("/api", "/"), None);
    }
}
