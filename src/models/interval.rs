use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical upstream interval: the granularity actually requested from the
/// market-data provider. User-facing intervals are derived from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalInterval {
    /// 1-minute candles
    Minute1,
    /// 2-minute candles
    Minute2,
    /// 5-minute candles
    Minute5,
    /// 15-minute candles
    Minute15,
    /// 30-minute candles
    Minute30,
    /// 1-hour candles
    Hour1,
    /// Daily candles
    Day1,
    /// Weekly candles
    Week1,
    /// Monthly candles
    Month1,
    /// Quarterly candles
    Month3,
}

impl CanonicalInterval {
    /// Interval string understood by the upstream provider
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalInterval::Minute1 => "1m",
            CanonicalInterval::Minute2 => "2m",
            CanonicalInterval::Minute5 => "5m",
            CanonicalInterval::Minute15 => "15m",
            CanonicalInterval::Minute30 => "30m",
            CanonicalInterval::Hour1 => "1h",
            CanonicalInterval::Day1 => "1d",
            CanonicalInterval::Week1 => "1wk",
            CanonicalInterval::Month1 => "1mo",
            CanonicalInterval::Month3 => "3mo",
        }
    }

    /// Intraday intervals carry a minute or hour suffix; daily and coarser do not.
    /// The freshness policy keys off this classification.
    pub fn is_intraday(&self) -> bool {
        let s = self.as_str();
        s.ends_with('m') && !s.ends_with("mo") || s.ends_with('h')
    }

    /// Bar width in minutes for intraday intervals
    pub fn minutes(&self) -> Option<u32> {
        match self {
            CanonicalInterval::Minute1 => Some(1),
            CanonicalInterval::Minute2 => Some(2),
            CanonicalInterval::Minute5 => Some(5),
            CanonicalInterval::Minute15 => Some(15),
            CanonicalInterval::Minute30 => Some(30),
            CanonicalInterval::Hour1 => Some(60),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookback period requested from upstream for a canonical interval.
///
/// `Max` means "as much history as the provider will give us" and always
/// dominates any fixed window when partitions merge their requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lookback {
    /// Fixed window of trailing days
    Days(u32),
    /// Full available history
    Max,
}

impl Lookback {
    /// Range string understood by the upstream provider
    pub fn to_range_string(self) -> String {
        match self {
            Lookback::Days(d) => format!("{}d", d),
            Lookback::Max => "max".to_string(),
        }
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_range_string())
    }
}

/// Time unit for resample buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl BucketUnit {
    /// Whether buckets of this unit produce intraday timestamps
    pub fn is_intraday(&self) -> bool {
        matches!(self, BucketUnit::Minutes | BucketUnit::Hours)
    }
}

/// Fixed-width, calendar-aligned resample rule (e.g. 10 minutes, 6 months)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketRule {
    pub value: u32,
    pub unit: BucketUnit,
}

impl BucketRule {
    pub const fn new(value: u32, unit: BucketUnit) -> Self {
        Self { value, unit }
    }

    pub const fn minutes(value: u32) -> Self {
        Self::new(value, BucketUnit::Minutes)
    }

    pub const fn hours(value: u32) -> Self {
        Self::new(value, BucketUnit::Hours)
    }

    pub const fn months(value: u32) -> Self {
        Self::new(value, BucketUnit::Months)
    }
}

impl fmt::Display for BucketRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            BucketUnit::Minutes => "min",
            BucketUnit::Hours => "h",
            BucketUnit::Days => "d",
            BucketUnit::Weeks => "wk",
            BucketUnit::Months => "mo",
        };
        write!(f, "{}{}", self.value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intraday_classification() {
        assert!(CanonicalInterval::Minute1.is_intraday());
        assert!(CanonicalInterval::Minute30.is_intraday());
        assert!(CanonicalInterval::Hour1.is_intraday());
        assert!(!CanonicalInterval::Day1.is_intraday());
        assert!(!CanonicalInterval::Week1.is_intraday());
        // "1mo" ends in 'm'+'o', must not be mistaken for minutes
        assert!(!CanonicalInterval::Month1.is_intraday());
        assert!(!CanonicalInterval::Month3.is_intraday());
    }

    #[test]
    fn test_lookback_ordering() {
        assert!(Lookback::Max > Lookback::Days(730));
        assert!(Lookback::Days(60) > Lookback::Days(7));
        assert_eq!(Lookback::Days(60).to_range_string(), "60d");
        assert_eq!(Lookback::Max.to_range_string(), "max");
    }
}
