//! Submission HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, routing::any};
use mailout_common::{Signal, incoming, internal};
use mailout_delivery::{RateLimiter, Submission};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tower_http::timeout::TimeoutLayer;

use crate::{
    HttpConfig,
    error::ServerError,
    handler::{AppState, not_found, submit},
};

/// Build the router serving the single submission endpoint.
///
/// Every other path answers with a JSON 404.
pub fn router(
    config: &HttpConfig,
    limiter: Arc<RateLimiter>,
    queue: mpsc::Sender<Submission>,
) -> Router {
    let state = AppState::new(limiter, queue, config.max_body_bytes);

    Router::new()
        .route(&config.endpoint, any(submit))
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
}

/// Listener for form submissions.
pub struct MailoutServer {
    listener: TcpListener,
    router: Router,
}

impl MailoutServer {
    /// Bind the listener and prepare the router.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: &HttpConfig,
        limiter: Arc<RateLimiter>,
        queue: mpsc::Sender<Submission>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ServerError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        internal!(
            level = INFO,
            address = %config.listen_address,
            endpoint = %config.endpoint,
            "Submission server bound successfully"
        );

        Ok(Self {
            listener,
            router: router(config, limiter, queue),
        })
    }

    /// Address actually bound, useful when listening on port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a shutdown signal is received.
    ///
    /// Dropping the server releases its handle on the submission queue, so
    /// the session worker sees the queue close once in-flight requests finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ServerError> {
        internal!(level = INFO, "Submission server starting");

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            incoming!(level = INFO, "Submission server received shutdown signal");
        })
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

        internal!(level = INFO, "Submission server stopped");
        Ok(())
    }
}
