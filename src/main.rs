//! GeoTrail - redundant location delivery
//!
//! Sends each location fix to several receivers at once and reports how many
//! of them are reachable.

mod config;
mod delivery;
mod model;
mod session;
mod transport;
mod web;

use config::TrackerConfig;
use delivery::Dispatcher;
use session::{SimulatedProducer, TrackingSession};
use transport::{NetTransport, RouteCheck};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("geotrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = TrackerConfig::load();
    tracing::info!("Starting GeoTrail on port {}...", cfg.http_port);

    let registry = cfg.registry()?;
    for destination in registry.iter() {
        tracing::info!("Destination {}", destination);
    }

    // Delivery pipeline
    let transport = Arc::new(NetTransport::new(cfg.transport_config())?);
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        transport,
        Arc::new(RouteCheck::default()),
        cfg.retry_policy(),
    ));

    tokio::spawn(delivery::log_connectivity_changes(dispatcher.publisher().subscribe()));

    let (lat, lon) = cfg.origin;
    let session = Arc::new(TrackingSession::new(
        dispatcher,
        Arc::new(SimulatedProducer::new(lat, lon)),
        Arc::new(cfg.permissions()),
        cfg.session_config(),
    ));

    if cfg.autostart {
        if let Err(e) = session.start_tracking().await {
            tracing::warn!("Tracking not started: {}", e);
        }
    }

    // Serve until interrupted
    let server = Server::new(cfg, session.clone());
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    if session.is_active().await {
        let snapshot = session.stop_tracking().await;
        tracing::info!("Shut down after {} rounds", snapshot.rounds_dispatched);
    }

    Ok(())
}
