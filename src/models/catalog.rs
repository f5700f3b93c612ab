use crate::error::{AppError, Result};
use crate::models::{BucketRule, BucketUnit, CanonicalInterval, Lookback};
use serde::Serialize;
use std::collections::BTreeMap;

/// One user-facing interval: how to source and derive it.
///
/// To add a new interval, add an entry to [`CATALOG`] below.
#[derive(Debug, Clone, Copy)]
pub struct IntervalDescriptor {
    /// Key used by the API and the chart UI (e.g. "10m", "4h", "6mo")
    pub key: &'static str,
    /// Display label shown on the UI button
    pub label: &'static str,
    /// Upstream interval the data is sourced from
    pub canonical: CanonicalInterval,
    /// Max lookback period requested from upstream
    pub lookback: Lookback,
    /// If set, resample from the canonical series to this rule after loading
    pub resample: Option<BucketRule>,
    /// Whether the chart uses unix timestamps (true) or date strings (false)
    pub intraday: bool,
}

/// Static interval catalog. Several keys share a canonical interval
/// (e.g. "5m" and "10m" both source from upstream 5m); the orchestrator
/// fetches each canonical interval once and derives all dependents from it.
pub static CATALOG: &[IntervalDescriptor] = &[
    IntervalDescriptor {
        key: "1m",
        label: "1m",
        canonical: CanonicalInterval::Minute1,
        lookback: Lookback::Days(7),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "2m",
        label: "2m",
        canonical: CanonicalInterval::Minute2,
        lookback: Lookback::Days(60),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "3m",
        label: "3m",
        canonical: CanonicalInterval::Minute1,
        lookback: Lookback::Days(7),
        resample: Some(BucketRule::minutes(3)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "5m",
        label: "5m",
        canonical: CanonicalInterval::Minute5,
        lookback: Lookback::Days(60),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "10m",
        label: "10m",
        canonical: CanonicalInterval::Minute5,
        lookback: Lookback::Days(60),
        resample: Some(BucketRule::minutes(10)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "15m",
        label: "15m",
        canonical: CanonicalInterval::Minute15,
        lookback: Lookback::Days(60),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "30m",
        label: "30m",
        canonical: CanonicalInterval::Minute30,
        lookback: Lookback::Days(60),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "45m",
        label: "45m",
        canonical: CanonicalInterval::Minute15,
        lookback: Lookback::Days(60),
        resample: Some(BucketRule::minutes(45)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "1h",
        label: "1H",
        canonical: CanonicalInterval::Hour1,
        lookback: Lookback::Days(730),
        resample: None,
        intraday: true,
    },
    IntervalDescriptor {
        key: "2h",
        label: "2H",
        canonical: CanonicalInterval::Hour1,
        lookback: Lookback::Days(730),
        resample: Some(BucketRule::hours(2)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "3h",
        label: "3H",
        canonical: CanonicalInterval::Hour1,
        lookback: Lookback::Days(730),
        resample: Some(BucketRule::hours(3)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "4h",
        label: "4H",
        canonical: CanonicalInterval::Hour1,
        lookback: Lookback::Days(730),
        resample: Some(BucketRule::hours(4)),
        intraday: true,
    },
    IntervalDescriptor {
        key: "1d",
        label: "1D",
        canonical: CanonicalInterval::Day1,
        lookback: Lookback::Max,
        resample: None,
        intraday: false,
    },
    IntervalDescriptor {
        key: "1wk",
        label: "1W",
        canonical: CanonicalInterval::Week1,
        lookback: Lookback::Max,
        resample: None,
        intraday: false,
    },
    IntervalDescriptor {
        key: "1mo",
        label: "1M",
        canonical: CanonicalInterval::Month1,
        lookback: Lookback::Max,
        resample: None,
        intraday: false,
    },
    IntervalDescriptor {
        key: "3mo",
        label: "3M",
        canonical: CanonicalInterval::Month3,
        lookback: Lookback::Max,
        resample: None,
        intraday: false,
    },
    IntervalDescriptor {
        key: "6mo",
        label: "6M",
        canonical: CanonicalInterval::Month1,
        lookback: Lookback::Max,
        resample: Some(BucketRule::months(6)),
        intraday: false,
    },
    IntervalDescriptor {
        key: "12mo",
        label: "12M",
        canonical: CanonicalInterval::Month1,
        lookback: Lookback::Max,
        resample: Some(BucketRule::months(12)),
        intraday: false,
    },
];

/// Interval button entry for the chart UI
#[derive(Debug, Clone, Serialize)]
pub struct IntervalButton {
    pub key: &'static str,
    pub label: &'static str,
}

/// Ordered {key, label} list for building UI buttons
pub fn interval_buttons() -> Vec<IntervalButton> {
    CATALOG
        .iter()
        .map(|d| IntervalButton {
            key: d.key,
            label: d.label,
        })
        .collect()
}

/// Partition the catalog by canonical interval. Each partition is fetched
/// from upstream at most once per request batch; every descriptor in it is
/// derived from that single cached series.
pub fn partition_by_canonical() -> BTreeMap<CanonicalInterval, Vec<&'static IntervalDescriptor>> {
    let mut partitions: BTreeMap<CanonicalInterval, Vec<&'static IntervalDescriptor>> =
        BTreeMap::new();
    for descriptor in CATALOG {
        partitions.entry(descriptor.canonical).or_default().push(descriptor);
    }
    partitions
}

/// Validate the static catalog at startup, before serving any request.
pub fn validate_catalog() -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for descriptor in CATALOG {
        if !seen.insert(descriptor.key) {
            return Err(AppError::Config(format!(
                "duplicate interval key '{}' in catalog",
                descriptor.key
            )));
        }
        if descriptor.intraday != descriptor.canonical.is_intraday() {
            return Err(AppError::Config(format!(
                "interval '{}' intraday flag disagrees with canonical interval {}",
                descriptor.key, descriptor.canonical
            )));
        }
        if let Some(rule) = descriptor.resample {
            if rule.value == 0 {
                return Err(AppError::Config(format!(
                    "interval '{}' has a zero-width resample rule",
                    descriptor.key
                )));
            }
            if rule.unit.is_intraday() != descriptor.intraday {
                return Err(AppError::Config(format!(
                    "interval '{}' resample unit disagrees with its intraday flag",
                    descriptor.key
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid() {
        validate_catalog().unwrap();
    }

    #[test]
    fn test_partition_count() {
        // 18 user-facing keys collapse to 10 distinct canonical intervals
        assert_eq!(CATALOG.len(), 18);
        let partitions = partition_by_canonical();
        assert_eq!(partitions.len(), 10);

        // "5m" and "10m" share the upstream 5m series
        let minute5 = &partitions[&CanonicalInterval::Minute5];
        let keys: Vec<&str> = minute5.iter().map(|d| d.key).collect();
        assert!(keys.contains(&"5m"));
        assert!(keys.contains(&"10m"));

        // 1h backs four user-facing intervals
        assert_eq!(partitions[&CanonicalInterval::Hour1].len(), 4);
    }

    #[test]
    fn test_interval_buttons_preserve_order() {
        let buttons = interval_buttons();
        assert_eq!(buttons.len(), CATALOG.len());
        assert_eq!(buttons[0].key, "1m");
        assert_eq!(buttons.last().unwrap().key, "12mo");
    }
}
