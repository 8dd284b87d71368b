//! hivectl - ZigBee to HTTP gateway

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_core::GatewayConfig;
use service::{GatewayService, OfflineRadio};

mod routes;
mod service;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hivectl=info,gateway_core=info,rules_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir =
        PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
    let listen = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

    let config = GatewayConfig {
        name: std::env::var("GW_NAME").unwrap_or_else(|_| "hivectl".to_string()),
        uuid: std::env::var("GW_UUID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
        ..GatewayConfig::default()
    };

    // Attach point for a radio transport. Until one is wired, the gateway
    // serves its REST surface and keeps the mesh side idle.
    let driver = Box::new(OfflineRadio);

    let (api_tx, api_rx) = mpsc::channel(32);
    let (_radio_tx, radio_rx) = mpsc::channel(64);

    let state = routes::AppState {
        api_tx,
        name: config.name.clone(),
        uuid: config.uuid.clone(),
    };

    let mut service = GatewayService::new(config, driver, data_dir);
    service.load().await;

    tokio::spawn(service.run(api_rx, radio_rx));

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .expect("failed to bind listen address");
    tracing::info!("REST API listening on {listen}");

    axum::serve(listener, app).await.expect("server error");
}
