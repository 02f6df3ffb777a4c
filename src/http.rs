//! Base HTTP tools

// Re-exporting HTTP primitives from hyper/http
pub use hyper::{
    http::{HeaderMap, HeaderName, HeaderValue, Method, Uri},
    Request, StatusCode,
};

pub use body::{BoxBody, BoxError, HttpBody};
pub use cors::CorsConfig;
pub use request::RequestContext;
pub use response::GatewayResponse;

pub mod body;
pub mod cors;
pub mod request;
pub mod response;
pub mod security;
pub(crate) mod sanitize;
