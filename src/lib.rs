//! # Sluice
//!
//! > Development-time API gateway middleware for Rust, built on
//! > [Tokio](https://tokio.rs/) and [hyper](https://hyper.rs/), that fronts
//! > file-based route handlers with a fixed request pipeline.
//!
//! ## Features
//! * Fixed middleware pipeline: security headers, CORS, method filtering,
//!   timeouts, rate limiting, CSRF, routing, caching, compression
//! * Per-IP fixed-window rate limiting with a bounded store
//! * Pattern routes (`/users/:id`) compiled from templates or handler
//!   file paths
//! * Fingerprinted response cache with TTL, LRU bounds and vary-by headers
//! * Negotiated brotli/gzip/deflate response compression
//! * Embeddable engine or a standalone dev server
//!
//! ## Example
//! ```no_run
//! use sluice::{Gateway, handler::RouteHandler};
//! use sluice::http::{GatewayResponse, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut gateway = Gateway::new().bind("127.0.0.1:8787");
//!
//!     gateway.map_route("/hello/:name", RouteHandler::new().get(|req| async move {
//!         let name = req.param("name").unwrap_or("world").to_owned();
//!         Ok(GatewayResponse::text(StatusCode::OK, format!("Hello, {name}!")))
//!     }));
//!
//!     gateway.run().await
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cache;
pub mod compression;
pub mod csrf;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod headers;
pub mod http;
pub mod rate_limit;
pub mod routing;
pub mod time;

#[cfg(feature = "server")]
pub mod server;

pub(crate) mod pipeline;
pub(crate) mod sweeper;

pub use crate::{
    error::{Error, ErrorKind},
    gateway::{Engine, Gateway, Outcome},
    http::{GatewayResponse, HttpBody},
};
