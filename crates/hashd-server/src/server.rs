//! HTTP server implementation.
//!
//! The server accepts connections until the [`ShutdownCoordinator`] reports
//! a shutdown request, lets open connections finish their in-flight
//! requests (bounded by the request timeout), and then drains the engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use hashd_core::{EngineConfig, HashEngine};
//! use hashd_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = HashEngine::new(EngineConfig::default());
//!     let server = Server::new(ServerConfig::default(), engine);
//!
//!     let report = server.run().await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body as _, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use hashd_core::{DrainReport, HashEngine, HashError, ShutdownCoordinator};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::routes::{self, HttpResponse};
use crate::shutdown::{spawn_signal_listener, ConnectionTracker};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// The hashd HTTP server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    engine: HashEngine,
    coordinator: ShutdownCoordinator,
}

impl Server {
    /// Creates a server around an engine with a fresh coordinator.
    #[must_use]
    pub fn new(config: ServerConfig, engine: HashEngine) -> Self {
        Self {
            config,
            engine,
            coordinator: ShutdownCoordinator::new(),
        }
    }

    /// Replaces the shutdown coordinator, so callers can trigger shutdown.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the engine handle.
    #[must_use]
    pub fn engine(&self) -> &HashEngine {
        &self.engine
    }

    /// Returns the shutdown coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse or cannot be bound.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                reason: e.to_string(),
            })?;

        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Binds, installs signal handlers and serves until shutdown completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn run(self) -> ServerResult<DrainReport> {
        let listener = self.bind().await?;
        spawn_signal_listener(self.coordinator.clone());
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shutdown completes.
    ///
    /// Returns the drain report once every accepted submission has settled
    /// or the drain timed out.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(self, listener: TcpListener) -> ServerResult<DrainReport> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "hashd listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();
        let mut shutdown = server.coordinator.recv();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => server.accept(stream, remote_addr, &tracker),
                        Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                    }
                }

                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        let request_timeout = server.config.request_timeout();
        tracing::info!(
            active = tracker.active_connections(),
            "waiting up to {:?} for open connections",
            request_timeout
        );
        tokio::select! {
            () = tracker.wait_idle() => tracing::debug!("all connections closed"),
            () = tokio::time::sleep(request_timeout) => tracing::warn!(
                active = tracker.active_connections(),
                "connections still open after {:?}, draining anyway",
                request_timeout
            ),
        }

        let report = server
            .coordinator
            .drain(&server.engine, server.config.drain())
            .await;
        Ok(report)
    }

    fn accept(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        tracker: &ConnectionTracker,
    ) {
        if tracker.active_connections() >= self.config.max_connections() {
            tracing::warn!(
                %remote_addr,
                max = self.config.max_connections(),
                "connection limit reached, closing connection"
            );
            return;
        }

        let token = tracker.acquire();
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = server.handle_connection(stream).await {
                tracing::debug!(%remote_addr, error = %e, "connection error");
            }
            drop(token);
        });
    }

    /// Serves one connection; on shutdown, finishes the in-flight request
    /// and closes instead of waiting for the next one.
    async fn handle_connection(self: &Arc<Self>, stream: TcpStream) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let server = Arc::clone(self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let mut shutdown = self.coordinator.recv();
        let mut closing = false;

        loop {
            tokio::select! {
                result = conn.as_mut() => return result,
                () = &mut shutdown, if !closing => {
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> HttpResponse {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        tracing::debug!(%method, %path, "request");

        let route = match routes::resolve(&method, &path) {
            Ok(route) => route,
            Err(e) => return routes::route_error(e, &method, &path),
        };

        let declared = req.body().size_hint().lower();
        let body = if route.needs_body() {
            if declared > MAX_BODY_BYTES as u64 {
                return self.payload_too_large(&path);
            }
            match tokio::time::timeout(self.config.request_timeout(), collect_body(req)).await {
                Ok(Ok(body)) => body,
                Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    return self.payload_too_large(&path);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to read request body");
                    return routes::error_envelope(
                        StatusCode::BAD_REQUEST,
                        "BODY_READ_ERROR",
                        &format!("failed to read request body: {e}"),
                    );
                }
                Err(_) => {
                    tracing::warn!(%path, "request body collection timed out");
                    return routes::error_envelope(
                        StatusCode::REQUEST_TIMEOUT,
                        "REQUEST_TIMEOUT",
                        "request body collection timed out",
                    );
                }
            }
        } else {
            Bytes::new()
        };

        let response = routes::dispatch(&self.engine, &self.coordinator, route, &body);
        tracing::debug!(%method, %path, status = response.status().as_u16(), "response");
        response
    }

    fn payload_too_large(&self, path: &str) -> HttpResponse {
        tracing::warn!(%path, limit = MAX_BODY_BYTES, "request body too large");
        let error = self.engine.reject_submission(HashError::PayloadTooLarge {
            limit: MAX_BODY_BYTES,
        });
        routes::engine_error(&error)
    }
}

/// Collects the request body, refusing anything over [`MAX_BODY_BYTES`].
async fn collect_body(
    req: Request<Incoming>,
) -> Result<Bytes, Box<dyn std::error::Error + Send + Sync>> {
    let collected = Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await?;
    Ok(collected.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hashd_core::{DrainConfig, DrainOutcome, EngineConfig};

    fn test_server(delay: Duration) -> Server {
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .request_timeout(Duration::from_secs(1))
            .drain(DrainConfig::new(
                Duration::from_millis(10),
                Duration::from_secs(5),
            ))
            .build();
        Server::new(config, HashEngine::new(EngineConfig::new().with_hash_delay(delay)))
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = ServerConfig::builder().http_addr("nowhere").build();
        let server = Server::new(config, HashEngine::new(EngineConfig::default()));
        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown_with_nothing_outstanding() {
        let server = test_server(Duration::from_millis(20));
        let coordinator = server.coordinator().clone();
        let listener = server.bind().await.unwrap();

        let handle = tokio::spawn(server.serve(listener));
        coordinator.request_shutdown();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should finish")
            .expect("serve task should not panic")
            .expect("serve should succeed");
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.progress.accepted, 0);
    }

    #[tokio::test]
    async fn test_serve_drains_accepted_work() {
        let server = test_server(Duration::from_millis(50));
        let engine = server.engine().clone();
        let coordinator = server.coordinator().clone();
        let listener = server.bind().await.unwrap();

        let handle = tokio::spawn(server.serve(listener));
        engine.submit("angryMonkey").unwrap();
        engine.submit("calmMonkey").unwrap();
        coordinator.request_shutdown();

        let report = handle.await.unwrap().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.progress.committed, 2);
        assert!(engine.fetch(2).is_ok());
    }
}
