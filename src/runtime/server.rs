//! HTTP front end driving the worker pool.

use crate::engine::Engine;
use crate::error::StrandError;
use crate::http::{ChannelResponse, Request};
use crate::pool::WorkerPool;
use crate::runtime::StrandConfig;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

struct ServerState {
    config: StrandConfig,
    pool: Arc<WorkerPool>,
}

/// HTTP server handing every request to a [`WorkerPool`].
pub struct StrandServer {
    config: StrandConfig,
    pool: Arc<WorkerPool>,
}

impl StrandServer {
    /// Validate `config` and start the worker pool for `engine`.
    ///
    /// Blocks until every worker is idle.
    pub fn new(config: StrandConfig, engine: Arc<dyn Engine>) -> Result<Self, StrandError> {
        config.validate()?;
        let pool = WorkerPool::initialize(config.pool.clone(), engine)?;
        Ok(Self::with_pool(config, Arc::new(pool)))
    }

    /// Serve an already initialized pool.
    pub fn with_pool(config: StrandConfig, pool: Arc<WorkerPool>) -> Self {
        Self { config, pool }
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn config(&self) -> &StrandConfig {
        &self.config
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), StrandError>
    where
        F: Future<Output = ()>,
    {
        let addr: SocketAddr = self
            .config
            .bind_addr()
            .parse()
            .map_err(|e| StrandError::Config(format!("invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves, then drain open
    /// connections and shut the pool down.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), StrandError>
    where
        F: Future<Output = ()>,
    {
        info!("Strand server listening on {}", listener.local_addr()?);

        let state = Arc::new(ServerState {
            config: self.config.clone(),
            pool: self.pool.clone(),
        });
        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("Failed to accept connection: {}", err);
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let state = state.clone();
                    let service = service_fn(move |req| {
                        let state = state.clone();
                        async move { handle_request(req, state, remote_addr).await }
                    });

                    let conn = graceful.watch(http1::Builder::new().serve_connection(io, service));
                    tokio::task::spawn(async move {
                        if let Err(err) = conn.await {
                            error!("Error serving connection: {:?}", err);
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        let timeout = self.config.shutdown_timeout_duration();
        match tokio::time::timeout(timeout, graceful.shutdown()).await {
            Ok(()) => debug!("All connections closed"),
            Err(_) => warn!(
                "Connections still open after {:?}, shutting down anyway",
                timeout
            ),
        }

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .map_err(|e| StrandError::Io(std::io::Error::other(e)))??;
        info!("Strand server stopped");
        Ok(())
    }
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: hyper::Request<Incoming>,
    state: Arc<ServerState>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if let Some(status_path) = &state.config.status_path {
        if req.method() == Method::GET && req.uri().path() == status_path {
            return Ok(json_response(&state.pool.stats()));
        }
    }

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, state.config.max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(
                "Request body from {} exceeds {} bytes",
                remote_addr, state.config.max_body_size
            );
            return Ok(text_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
            ));
        }
        Err(err) => {
            warn!("Failed to read request body from {}: {}", remote_addr, err);
            return Ok(text_response(StatusCode::BAD_REQUEST, "Bad request body"));
        }
    };

    let mut request = Request::new(parts.method, parts.uri)
        .version(parts.version)
        .remote_addr(remote_addr.to_string())
        .body(body);
    request.headers = parts.headers;

    let (sink, response) = ChannelResponse::new(state.config.max_response_size);
    let pool = state.pool.clone();
    let dispatched =
        tokio::task::spawn_blocking(move || pool.dispatch(request, Box::new(sink))).await;

    match dispatched {
        Ok(Ok(outcome)) => {
            debug!(
                "Worker {} answered {} ({} bytes)",
                outcome.worker, outcome.status, outcome.bytes_written
            );
            match response.await {
                Ok(response) => Ok(response),
                Err(_) => {
                    error!("Worker {} dropped the response", outcome.worker);
                    Ok(text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error",
                    ))
                }
            }
        }
        Ok(Err(err @ (StrandError::ShuttingDown | StrandError::NoWorkers))) => {
            warn!("Rejecting request: {}", err);
            Ok(text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
            ))
        }
        Ok(Err(err)) => {
            error!("Dispatch failed: {}", err);
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ))
        }
        Err(err) => {
            error!("Dispatch task failed: {}", err);
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ))
        }
    }
}

fn text_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => {
            error!("Failed to serialize status: {}", err);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
