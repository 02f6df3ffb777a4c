//! Request/response body helpers with an enforced byte ceiling

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited};

use crate::error::{Error, ErrorKind};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Constructors for the boxed body shape the engine consumes.
pub struct HttpBody;

impl HttpBody {
    /// Creates an empty body.
    #[inline]
    pub fn empty() -> BoxBody {
        Empty::new().map_err(|never| match never {}).boxed()
    }

    /// Creates a body from in-memory bytes.
    #[inline]
    pub fn full(bytes: impl Into<Bytes>) -> BoxBody {
        Full::new(bytes.into()).map_err(|never| match never {}).boxed()
    }

    /// Collects at most `limit` bytes from `body`.
    ///
    /// A body of exactly `limit` bytes is accepted; one byte more fails
    /// with [`ErrorKind::BodyTooLarge`].
    pub async fn read_limited(body: BoxBody, limit: usize) -> Result<Bytes, Error> {
        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                Err(Error::new(ErrorKind::BodyTooLarge, "request body exceeds the configured limit"))
            }
            Err(err) => Err(Error::handler(err.to_string())),
        }
    }
}
