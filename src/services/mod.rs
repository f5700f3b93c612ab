pub mod chart_service;
pub mod freshness;
pub mod provider;
pub mod resample;
pub mod store;
pub mod yahoo;

pub use chart_service::ChartService;
pub use provider::{MarketDataProvider, ProviderError};
pub use store::PriceStore;
pub use yahoo::YahooClient;
