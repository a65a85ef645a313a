//! Visual Traceroute - traceroute simulation and scheduling service
//!
//! Serves an HTTP API for interactive traceroutes, geolocation and recurring
//! traceroute schedules whose hop data is shipped to a log ingest endpoint.

mod config;
mod ingest;
mod scheduler;
mod service;
mod store;
mod trace;
mod web;

#[cfg(test)]
mod test_support;

use config::ServerConfig;
use ingest::{HttpLogSink, LogSink, TracingLogSink};
use scheduler::{Orchestrator, Sweeper};
use service::TracerouteService;
use store::{MemoryStateStore, ScheduleStore, SqliteStateStore, StateStore};
use trace::{DohClient, GeoLocator, Resolver, Simulator};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` directives, with this crate at INFO by default.
fn log_filter() -> Result<EnvFilter, ParseError> {
    Ok(EnvFilter::from_default_env().add_directive("visual_traceroute=info".parse()?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(log_filter()?)
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Visual Traceroute on port {}...", cfg.http_port);
    tracing::info!("Using state database at {} (key {})", cfg.db_path, cfg.state_key);

    // Initialize state store
    let state: Arc<dyn StateStore> = if cfg.db_path.is_empty() {
        tracing::warn!("No database path configured, schedules will not survive a restart");
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(SqliteStateStore::new(&cfg.db_path)?)
    };
    let schedules = ScheduleStore::new(state, cfg.state_key.clone());
    tracing::info!("State store initialized successfully");

    let client = reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()?;

    let resolver = Resolver::new(
        Arc::new(DohClient::new(client.clone(), cfg.dns_url.clone())),
        cfg.synthetic_fallback,
    );
    let geo = GeoLocator::http(
        client.clone(),
        &cfg.ip2location_url,
        &cfg.ip_api_url,
        &cfg.ipwhois_url,
    );
    let simulator = Simulator::new(resolver, geo)
        .with_geo_concurrency(cfg.geo_concurrency)
        .with_geo_delay(cfg.geo_request_delay);

    let sink: Arc<dyn LogSink> = match &cfg.log_ingest_url {
        Some(url) => {
            tracing::info!("Shipping traceroute logs to {}", url);
            Arc::new(HttpLogSink::new(
                client.clone(),
                url.clone(),
                cfg.log_ingest_token.clone(),
            ))
        }
        None => {
            tracing::info!("No log ingest URL configured, writing traceroute logs locally");
            Arc::new(TracingLogSink)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(schedules, simulator, sink));

    // Start background sweeps
    let sweeper = Sweeper::new(orchestrator.clone(), cfg.sweep_interval);
    sweeper.start().await;

    // Start web server
    let server = Server::new(cfg, TracerouteService::new(orchestrator));
    let served = server.start().await;

    sweeper.stop().await;
    served
}
