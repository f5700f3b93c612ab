use crate::constants::FETCH_TIMEOUT;
use crate::models::catalog::validate_catalog;
use crate::server;
use crate::services::{ChartService, PriceStore, YahooClient};
use crate::utils::get_database_path;
use std::sync::Arc;

pub async fn run(port: u16) {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    println!("🚀 Starting finchart server on port {}", port);

    // The static catalog is the source of truth for every interval's
    // derivation path; refuse to start if it is inconsistent
    if let Err(e) = validate_catalog() {
        eprintln!("❌ Invalid interval catalog: {}", e);
        std::process::exit(1);
    }

    let database_path = get_database_path();
    println!("💾 Cache database: {}", database_path.display());

    let store = match PriceStore::open(database_path).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Failed to open cache database: {}", e);
            std::process::exit(1);
        }
    };

    let provider = match YahooClient::new(FETCH_TIMEOUT) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("❌ Failed to build upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let chart = Arc::new(ChartService::new(store.clone(), provider, FETCH_TIMEOUT));

    if let Err(e) = server::serve(chart, store, port).await {
        eprintln!("❌ Server error: {}", e);
        std::process::exit(1);
    }
}
