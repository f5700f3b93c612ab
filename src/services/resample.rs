//! Resampler: aggregates a canonical series into coarser, calendar-aligned
//! fixed-width buckets.
//!
//! Aggregation per bucket: open = first, high = max, low = min,
//! close = last, volume = sum. Buckets only exist where input bars fall,
//! so gaps in the source never produce placeholder output.

use crate::models::{BucketRule, BucketUnit, OhlcvBar};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Monday of the week containing the unix epoch; multi-week buckets are
/// anchored here so their boundaries are stable across requests.
fn epoch_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(1969, 12, 29).unwrap()
}

/// Resample a series into `rule`-sized buckets
pub fn resample(bars: &[OhlcvBar], rule: BucketRule) -> Vec<OhlcvBar> {
    if bars.is_empty() || rule.value == 0 {
        return Vec::new();
    }

    debug!(bars = bars.len(), rule = %rule, "resampling series");

    let mut buckets: HashMap<DateTime<Utc>, Vec<&OhlcvBar>> = HashMap::new();
    for bar in bars {
        let start = bucket_start(bar.time, rule);
        buckets.entry(start).or_default().push(bar);
    }

    let mut result: Vec<OhlcvBar> = buckets
        .into_iter()
        .map(|(bucket_time, members)| aggregate(members, bucket_time))
        .collect();

    result.sort_by_key(|bar| bar.time);

    debug!(buckets = result.len(), "resample complete");
    result
}

/// Calendar-aligned start of the bucket containing `time`
fn bucket_start(time: DateTime<Utc>, rule: BucketRule) -> DateTime<Utc> {
    let n = rule.value as i64;
    match rule.unit {
        BucketUnit::Minutes => {
            // Aligned to multiples of the width from UTC midnight, so a
            // 45-minute bucket spans hour boundaries the same way every day
            let minutes_since_midnight = (time.hour() * 60 + time.minute()) as i64;
            let start = (minutes_since_midnight / n) * n;
            Utc.with_ymd_and_hms(
                time.year(),
                time.month(),
                time.day(),
                (start / 60) as u32,
                (start % 60) as u32,
                0,
            )
            .unwrap()
        }
        BucketUnit::Hours => {
            let start_hour = (time.hour() as i64 / n) * n;
            Utc.with_ymd_and_hms(time.year(), time.month(), time.day(), start_hour as u32, 0, 0)
                .unwrap()
        }
        BucketUnit::Days => {
            let days_since_epoch = (time.date_naive() - NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).num_days();
            let start = days_since_epoch.div_euclid(n) * n;
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + Duration::days(start);
            Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        }
        BucketUnit::Weeks => {
            // ISO weeks start on Monday; multi-week groups anchor to the
            // epoch Monday
            let days_from_monday = time.weekday().num_days_from_monday() as i64;
            let monday = time.date_naive() - Duration::days(days_from_monday);
            let weeks_since_anchor = (monday - epoch_monday()).num_days() / 7;
            let start_week = weeks_since_anchor.div_euclid(n) * n;
            let date = epoch_monday() + Duration::weeks(start_week);
            Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        }
        BucketUnit::Months => {
            // Anchored to January, so 6-month buckets always start Jan/Jul
            let month_index = time.year() as i64 * 12 + (time.month0() as i64);
            let start = month_index.div_euclid(n) * n;
            let year = start.div_euclid(12) as i32;
            let month = start.rem_euclid(12) as u32 + 1;
            Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
        }
    }
}

/// Aggregate the bars of one bucket
fn aggregate(mut members: Vec<&OhlcvBar>, bucket_time: DateTime<Utc>) -> OhlcvBar {
    members.sort_by_key(|bar| bar.time);

    let first = members[0];
    let last = members[members.len() - 1];

    let high = members.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = members.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let volume = members.iter().map(|b| b.volume).sum();

    OhlcvBar {
        time: bucket_time,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    }
}
