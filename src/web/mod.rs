//! Web server module.

mod handlers;

use crate::config::TrackerConfig;
use crate::session::TrackingSession;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: TrackerConfig,
    pub session: Arc<TrackingSession>,
}

/// Observer API for GeoTrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: TrackerConfig, session: Arc<TrackingSession>) -> Self {
        Self {
            state: AppState { config, session },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Status
            .route("/api/status", get(handlers::handle_get_status))
            .route("/api/status/reset", post(handlers::handle_reset_status))
            .route("/api/destinations", get(handlers::handle_get_destinations))
            .route("/api/latency", get(handlers::handle_get_latency))
            // Session control
            .route("/api/session", get(handlers::handle_get_session))
            .route("/api/session/start", post(handlers::handle_start_session))
            .route("/api/session/stop", post(handlers::handle_stop_session))
            // Diagnostics
            .route("/api/test", post(handlers::handle_test_destinations))
            .route("/api/diagnostic", post(handlers::handle_send_diagnostic))
            .route("/health", get(handlers::handle_health))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Observer API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
