//! Freshness policy: decides when a cached canonical series is stale.
//!
//! Intraday series go stale after 15 minutes, daily and coarser after
//! 12 hours. The next scheduled refetch window doubles as the retry
//! mechanism for failed fetches, so there is no backoff logic here.

use crate::constants::{COARSE_FRESHNESS, INTRADAY_FRESHNESS};
use crate::models::CanonicalInterval;
use chrono::{DateTime, Utc};

/// Should we refetch this (symbol, interval) pair from upstream?
pub fn is_due(
    last_fetched: Option<DateTime<Utc>>,
    interval: CanonicalInterval,
    now: DateTime<Utc>,
) -> bool {
    let last = match last_fetched {
        Some(last) => last,
        None => return true,
    };

    let window = if interval.is_intraday() {
        INTRADAY_FRESHNESS
    } else {
        COARSE_FRESHNESS
    };

    // A clock that moved backwards reads as "fresh just now"
    let age = (now - last).to_std().unwrap_or_default();
    age > window
}
