//! Standalone development server
//!
//! During development the gateway can front its routes without an outer
//! server: a plain HTTP/1 accept loop where declined requests answer 404.
//! Embedders skip this module and call [`Engine::handle`] directly.

use hyper::{
    body::Incoming,
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use http_body_util::{BodyExt, Full};
use tokio::{
    io,
    net::{TcpListener, TcpStream},
    signal,
    sync::watch,
};

use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use crate::{
    error::ErrorKind,
    gateway::{Engine, Gateway, Outcome},
    http::{BoxBody, GatewayResponse},
};

const DEFAULT_PORT: u16 = 8787;

/// Wraps the socket the dev server binds to.
pub struct Connection {
    socket: SocketAddr,
}

impl Default for Connection {
    fn default() -> Self {
        Self { socket: ([127, 0, 0, 1], DEFAULT_PORT).into() }
    }
}

impl From<&str> for Connection {
    fn from(s: &str) -> Self {
        match s.parse::<SocketAddr>() {
            Ok(socket) => Self { socket },
            Err(_) => Self::default(),
        }
    }
}

impl<I: Into<IpAddr>> From<(I, u16)> for Connection {
    fn from(value: (I, u16)) -> Self {
        Self { socket: SocketAddr::from(value) }
    }
}

impl Gateway {
    /// Binds the dev server to the specified socket address.
    ///
    /// # Example
    /// ```no_run
    /// use sluice::Gateway;
    ///
    /// let gateway = Gateway::new().bind("127.0.0.1:8787");
    /// ```
    pub fn bind<S: Into<Connection>>(mut self, socket: S) -> Self {
        self.connection = socket.into();
        self
    }

    /// Builds the engine and serves it until ctrl-c.
    pub async fn run(self) -> io::Result<()> {
        let socket = self.connection.socket;
        let engine = self.build().map_err(io::Error::other)?;
        let listener = TcpListener::bind(socket).await?;
        tracing::info!("listening on: http://{socket}");

        let (shutdown_tx, shutdown_rx) = watch::channel::<()>(());
        let shutdown_tx = Arc::new(shutdown_tx);
        Self::shutdown_signal(shutdown_rx);

        loop {
            let (stream, peer) = tokio::select! {
                Ok(connection) = listener.accept() => connection,
                _ = shutdown_tx.closed() => break,
            };
            tokio::spawn(Box::pin(serve_connection(stream, peer, engine.clone())));
        }

        drop(listener);
        engine.shutdown().await;
        Ok(())
    }

    fn shutdown_signal(shutdown_rx: watch::Receiver<()>) {
        tokio::spawn(async move {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("unable to listen for shutdown signal: {err}");
            }
            tracing::debug!("shutdown signal received, not accepting new requests");
            drop(shutdown_rx);
        });
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, engine: Engine) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request: Request<Incoming>| {
        let engine = engine.clone();
        async move {
            let request = request.map(|body| {
                body.map_err(|err| Box::new(err) as crate::http::BoxError).boxed()
            });
            Ok::<_, Infallible>(dispatch(engine, request, peer.ip()).await)
        }
    });

    let connection = http1::Builder::new().serve_connection(io, service);
    if let Err(err) = connection.await {
        tracing::debug!("error serving connection: {err:?}");
    }
}

/// Runs a request through the engine; a declined request answers 404 here
/// because the dev server is the outermost layer.
async fn dispatch(
    engine: Engine,
    request: Request<BoxBody>,
    client_addr: IpAddr,
) -> Response<Full<bytes::Bytes>> {
    let response = match Box::pin(engine.handle(request, client_addr)).await {
        Outcome::Handled(response) => response,
        Outcome::Declined(_) => GatewayResponse::from_kind(ErrorKind::RouteNotFound),
    };
    into_hyper(response)
}

fn into_hyper(response: GatewayResponse) -> Response<Full<bytes::Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_creates_connection_with_default_socket() {
        let connection = Connection::default();

        assert_eq!(connection.socket, SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)));
    }

    #[test]
    fn it_creates_connection_with_specified_socket() {
        let connection: Connection = "127.0.0.1:5000".into();

        assert_eq!(connection.socket, SocketAddr::from(([127, 0, 0, 1], 5000)));
    }

    #[test]
    fn it_creates_default_connection_from_invalid_str() {
        let connection: Connection = "".into();

        assert_eq!(connection.socket, SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)));
    }

    #[test]
    fn it_creates_connection_from_tuple() {
        let connection: Connection = ([127, 0, 0, 1], 5001).into();

        assert_eq!(connection.socket, SocketAddr::from(([127, 0, 0, 1], 5001)));
    }

    #[test]
    fn it_converts_gateway_response_to_hyper() {
        let response = GatewayResponse::text(hyper::StatusCode::CREATED, "made");

        let converted = into_hyper(response);

        assert_eq!(converted.status(), hyper::StatusCode::CREATED);
        assert_eq!(converted.headers().get("content-type").unwrap(), "text/plain; charset=utf-8");
    }
}

