//! Minimal HTTP health server.
//!
//! Serves `GET /health` until it is closed. It is the resource the binary
//! hands to a [`CloseGroup`](crate::graceful::CloseGroup): `run` is the
//! foreground task and `close` the teardown task.

use crate::graceful::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument};

/// Errors from the health server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("{active} connection(s) still open when the close deadline passed")]
    DrainTimeout { active: usize },
}

/// HTTP server answering health checks.
pub struct HealthServer {
    /// Bound address.
    local_addr: SocketAddr,
    /// Taken by the first `run`.
    listener: Mutex<Option<TcpListener>>,
    /// Cancelled by `close`.
    stop: CancellationToken,
    /// In-flight connections.
    connections: TaskTracker,
}

impl HealthServer {
    /// Bind the listening socket.
    pub async fn bind(address: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        info!(address = %local_addr, "health server bound");

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            stop: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `ctx` is done or the server is closed.
    #[instrument(skip_all, fields(address = %self.local_addr))]
    pub async fn run(self: Arc<Self>, ctx: Context) -> anyhow::Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ServerError::AlreadyRunning)?;

        info!("health server started");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!(client = %addr, "accepted connection");
                            self.connections.spawn(serve_connection(stream, self.stop.clone()));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = self.stop.cancelled() => {
                    info!("health server closed");
                    break;
                }

                _ = ctx.done() => {
                    info!("health server stopping on shutdown");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting, finish in-flight requests, and wait for open
    /// connections until `ctx` is done. Idempotent.
    pub async fn close(self: Arc<Self>, ctx: Context) -> anyhow::Result<()> {
        self.stop.cancel();
        self.connections.close();

        tokio::select! {
            biased;

            _ = self.connections.wait() => {
                info!(address = %self.local_addr, "health server connections drained");
                Ok(())
            }
            _ = ctx.done() => Err(ServerError::DrainTimeout {
                active: self.connections.len(),
            }
            .into()),
        }
    }
}

async fn serve_connection(stream: TcpStream, stop: CancellationToken) {
    let io = TokioIo::new(stream);
    let conn = http1::Builder::new().serve_connection(io, service_fn(handle_request));
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(error = %e, "health connection error");
            }
        }
        _ = stop.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(error = %e, "health connection error during shutdown");
            }
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(path = %req.uri().path(), method = %req.method(), "health request");

    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n"));
    }

    match req.uri().path() {
        "/health" | "/healthz" => Ok(text(StatusCode::OK, "OK\n")),
        _ => Ok(text(StatusCode::NOT_FOUND, "Not found\n")),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn started() -> (Arc<HealthServer>, Context, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let server = Arc::new(HealthServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let ctx = Context::background();
        let handle = tokio::spawn(Arc::clone(&server).run(ctx.clone()));
        (server, ctx, handle)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _ctx, handle) = started().await;

        let response = get(
            server.local_addr(),
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK\n"));

        let response = get(
            server.local_addr(),
            "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"));

        let response = get(
            server.local_addr(),
            "POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"));

        Arc::clone(&server).close(Context::background()).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_context_done() {
        let (_server, ctx, handle) = started().await;

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run should return")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let (server, ctx, handle) = started().await;

        // The first run owns the listener.
        tokio::task::yield_now().await;
        let second = Arc::clone(&server).run(ctx.clone()).await;
        assert!(second.is_err());

        ctx.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (server, _ctx, handle) = started().await;

        Arc::clone(&server).close(Context::background()).await.unwrap();
        Arc::clone(&server).close(Context::background()).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
