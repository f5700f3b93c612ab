pub mod api;

use crate::services::{ChartService, PriceStore};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub chart: Arc<ChartService>,
    pub store: PriceStore,
    pub started_at: Instant,
}

/// Start the axum server
pub async fn serve(
    chart: Arc<ChartService>,
    store: PriceStore,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app_state = AppState {
        chart,
        store,
        started_at: Instant::now(),
    };

    // Single-user tool on localhost; CORS stays permissive
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    tracing::info!("Registering routes:");
    tracing::info!("  POST /api/data");
    tracing::info!("  POST /api/custom_interval");
    tracing::info!("  GET  /api/intervals");
    tracing::info!("  GET  /health");

    let app = Router::new()
        .route("/api/data", post(api::data_handler))
        .route("/api/custom_interval", post(api::custom_interval_handler))
        .route("/api/intervals", get(api::intervals_handler))
        .route("/health", get(api::health_handler))
        .layer(cors)
        .with_state(app_state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
