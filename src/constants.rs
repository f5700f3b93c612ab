//! Runtime constants for the fetch-and-cache core and the chart API.

use std::time::Duration;

/// Default HTTP port for the chart server
pub const DEFAULT_PORT: u16 = 8765;

/// How many canonical-interval partitions are fetched concurrently
/// during a `fetch_all` batch
pub const FETCH_WORKERS: usize = 10;

/// Cached intraday data is refetched once it is older than this
pub const INTRADAY_FRESHNESS: Duration = Duration::from_secs(15 * 60);

/// Cached daily-or-coarser data is refetched once it is older than this
pub const COARSE_FRESHNESS: Duration = Duration::from_secs(12 * 3600);

/// Hard timeout for a single upstream fetch. A timed-out fetch is treated
/// like any other provider failure; nothing partial is persisted.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Volume histogram color for an up candle (close >= open), with alpha
pub const VOLUME_UP_COLOR: &str = "#26a69a80";

/// Volume histogram color for a down candle, with alpha
pub const VOLUME_DOWN_COLOR: &str = "#ef535080";
