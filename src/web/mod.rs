//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::service::TracerouteService;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: TracerouteService,
}

/// Web server for the traceroute API.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, service: TracerouteService) -> Self {
        Self {
            config,
            state: AppState { service },
        }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = routes(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handlers::handle_health))
        // Schedules
        .route("/api/schedules", get(handlers::handle_get_schedules))
        .route("/api/schedules", post(handlers::handle_save_schedule))
        .route("/api/schedules/delete", post(handlers::handle_delete_schedule))
        .route("/api/schedules/{id}", delete(handlers::handle_delete_schedule_by_id))
        // Runs
        .route("/api/run-scheduled", post(handlers::handle_run_scheduled))
        .route("/api/actions/run-traceroute", post(handlers::handle_run_action))
        .route("/api/traceroute", post(handlers::handle_traceroute))
        // Enrichment and ingest
        .route("/api/geolocation", post(handlers::handle_geolocate))
        .route("/api/ingest-logs", post(handlers::handle_ingest_logs))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}
