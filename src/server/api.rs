use crate::error::AppError;
use crate::models::catalog::{interval_buttons, IntervalButton};
use crate::models::ChartDataset;
use crate::server::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
pub struct SymbolRequest {
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomIntervalRequest {
    pub symbol: String,
    pub value: u32,
    pub unit: String,
}

#[derive(Debug, Serialize)]
struct DataResponse {
    symbol: String,
    datasets: HashMap<String, ChartDataset>,
}

#[derive(Debug, Serialize)]
struct CustomIntervalResponse {
    dataset: ChartDataset,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response()
}

fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

/// POST /api/data - chart-ready datasets for every catalog interval
pub async fn data_handler(
    State(state): State<AppState>,
    Json(request): Json<SymbolRequest>,
) -> Response {
    let symbol = match normalize_symbol(&request.symbol) {
        Some(symbol) => symbol,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing symbol"),
    };

    info!(%symbol, "chart data requested");
    let datasets = state.chart.fetch_all(&symbol).await;

    let has_data = datasets.values().any(|d| !d.is_empty());
    if !has_data {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No data found for '{}'", symbol),
        );
    }

    debug!(%symbol, datasets = datasets.len(), "chart data ready");
    Json(DataResponse { symbol, datasets }).into_response()
}

/// POST /api/custom_interval - a single dataset at an arbitrary (value, unit)
pub async fn custom_interval_handler(
    State(state): State<AppState>,
    Json(request): Json<CustomIntervalRequest>,
) -> Response {
    let symbol = match normalize_symbol(&request.symbol) {
        Some(symbol) => symbol,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing symbol"),
    };
    let unit = request.unit.trim().to_lowercase();

    info!(%symbol, value = request.value, %unit, "custom interval requested");

    match state.chart.fetch_custom(&symbol, request.value, &unit).await {
        Ok(dataset) => {
            if dataset.is_empty() {
                return error_response(
                    StatusCode::NOT_FOUND,
                    format!("No data for '{}' at {} {}", symbol, request.value, unit),
                );
            }
            Json(CustomIntervalResponse { dataset }).into_response()
        }
        Err(AppError::InvalidInput(message)) => {
            error_response(StatusCode::BAD_REQUEST, message)
        }
        Err(e) => {
            error!(%symbol, error = %e, "custom interval request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/intervals - ordered {key, label} list for the UI buttons
pub async fn intervals_handler() -> Json<Vec<IntervalButton>> {
    Json(interval_buttons())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    cached_bars: i64,
    cached_symbols: i64,
}

/// GET /health - liveness plus cache statistics
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime_secs = state.started_at.elapsed().as_secs();

    match state.store.stats().await {
        Ok(stats) => Json(HealthResponse {
            status: "ok",
            uptime_secs,
            cached_bars: stats.total_bars,
            cached_symbols: stats.unique_symbols,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "health check could not read cache stats");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
