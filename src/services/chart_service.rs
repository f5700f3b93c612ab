use crate::constants::FETCH_WORKERS;
use crate::error::{AppError, Result};
use crate::models::catalog::partition_by_canonical;
use crate::models::{
    BucketRule, BucketUnit, CanonicalInterval, ChartDataset, IntervalDescriptor, Lookback, OhlcvBar,
};
use crate::services::freshness;
use crate::services::provider::MarketDataProvider;
use crate::services::resample::resample;
use crate::services::store::PriceStore;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Candidate canonical sources for custom minute intervals, finest first.
/// The resolver picks the coarsest one that evenly divides the request to
/// minimize rows fetched from upstream.
const MINUTE_SOURCES: &[(CanonicalInterval, Lookback)] = &[
    (CanonicalInterval::Minute1, Lookback::Days(7)),
    (CanonicalInterval::Minute5, Lookback::Days(60)),
    (CanonicalInterval::Minute15, Lookback::Days(60)),
    (CanonicalInterval::Minute30, Lookback::Days(60)),
    (CanonicalInterval::Hour1, Lookback::Days(730)),
];

/// The interval fetch-and-cache core.
///
/// Serves every user-facing interval for a symbol with at most one upstream
/// fetch per canonical interval per request batch: the catalog is partitioned
/// by canonical interval, each partition is fetched/cached once, and all
/// dependent intervals are derived from the single cached series.
pub struct ChartService {
    store: PriceStore,
    provider: Arc<dyn MarketDataProvider>,
    fetch_timeout: Duration,
}

impl ChartService {
    pub fn new(store: PriceStore, provider: Arc<dyn MarketDataProvider>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            provider,
            fetch_timeout,
        }
    }

    /// Fetch chart-ready datasets for every catalog interval of `symbol`.
    ///
    /// Partitions run concurrently in groups of [`FETCH_WORKERS`]; a failed
    /// partition degrades to empty datasets for its keys without affecting
    /// the rest of the batch.
    pub async fn fetch_all(self: &Arc<Self>, symbol: &str) -> HashMap<String, ChartDataset> {
        let partitions: Vec<(CanonicalInterval, Vec<&'static IntervalDescriptor>)> =
            partition_by_canonical().into_iter().collect();

        debug!(
            symbol,
            partitions = partitions.len(),
            "fetching all intervals"
        );

        let mut datasets = HashMap::new();

        for group in partitions.chunks(FETCH_WORKERS) {
            let mut tasks = Vec::with_capacity(group.len());

            for (interval, dependents) in group {
                let service = Arc::clone(self);
                let symbol = symbol.to_string();
                let interval = *interval;
                let dependents = dependents.clone();

                tasks.push(tokio::spawn(async move {
                    service.process_partition(&symbol, interval, &dependents).await
                }));
            }

            for (task, (interval, dependents)) in join_all(tasks).await.into_iter().zip(group) {
                match task {
                    Ok(results) => datasets.extend(results),
                    Err(e) => {
                        warn!(interval = %interval, error = %e, "partition task failed");
                        for descriptor in dependents {
                            datasets.insert(
                                descriptor.key.to_string(),
                                ChartDataset::empty(descriptor.intraday),
                            );
                        }
                    }
                }
            }
        }

        datasets
    }

    /// One partition: fetch/cache the canonical series once, then derive
    /// every dependent user-facing interval from it.
    async fn process_partition(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        dependents: &[&'static IntervalDescriptor],
    ) -> Vec<(String, ChartDataset)> {
        // The single upstream fetch has to satisfy every dependent's
        // history needs, so the longest lookback wins
        let lookback = dependents
            .iter()
            .map(|d| d.lookback)
            .max()
            .unwrap_or(Lookback::Max);

        let series = self.ensure_fresh(symbol, interval, lookback).await;

        dependents
            .iter()
            .map(|descriptor| {
                (
                    descriptor.key.to_string(),
                    derive_dataset(descriptor, &series),
                )
            })
            .collect()
    }

    /// Fetch a custom (value, unit) interval, picking the most
    /// space-efficient canonical source and always resampling.
    pub async fn fetch_custom(
        &self,
        symbol: &str,
        value: u32,
        unit: &str,
    ) -> Result<ChartDataset> {
        if value < 1 {
            return Err(AppError::InvalidInput(
                "Interval value must be >= 1".to_string(),
            ));
        }

        let unit = parse_custom_unit(unit)?;
        let (interval, lookback) = choose_custom_source(value, unit);

        debug!(
            symbol,
            value,
            unit = ?unit,
            source = %interval,
            "resolving custom interval"
        );

        let series = self.ensure_fresh(symbol, interval, lookback).await;
        let rule = BucketRule::new(value, unit);
        let resampled = resample(&series, rule);

        // Zero buckets is a valid outcome, not an error
        Ok(ChartDataset::from_bars(&resampled, unit.is_intraday()))
    }

    /// Shared due-check / fetch / save / load path.
    ///
    /// Upstream and store failures are recovered locally: the request
    /// proceeds on whatever is cached (or the freshly fetched in-memory
    /// bars when only the cache write failed).
    async fn ensure_fresh(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        lookback: Lookback,
    ) -> Vec<OhlcvBar> {
        let last_fetched = match self.store.last_fetched(symbol, interval).await {
            Ok(last) => last,
            Err(e) => {
                warn!(symbol, interval = %interval, error = %e, "freshness lookup failed");
                None
            }
        };

        let mut unsaved_fetch: Option<Vec<OhlcvBar>> = None;

        if freshness::is_due(last_fetched, interval, Utc::now()) {
            match timeout(
                self.fetch_timeout,
                self.provider.fetch(symbol, interval, lookback),
            )
            .await
            {
                Err(_) => {
                    warn!(symbol, interval = %interval, "upstream fetch timed out; serving cached data");
                }
                Ok(Err(e)) => {
                    warn!(symbol, interval = %interval, error = %e, "upstream fetch failed; serving cached data");
                }
                Ok(Ok(bars)) if bars.is_empty() => {
                    debug!(symbol, interval = %interval, "upstream returned no rows");
                    if let Err(e) = self.store.touch(symbol, interval).await {
                        warn!(symbol, interval = %interval, error = %e, "freshness update failed");
                    }
                }
                Ok(Ok(bars)) => {
                    debug!(symbol, interval = %interval, bars = bars.len(), "persisting fetched bars");
                    if let Err(e) = self.store.save(symbol, interval, &bars).await {
                        // A lost cache write only costs a refetch later; the
                        // current request still gets the in-memory bars
                        warn!(symbol, interval = %interval, error = %e, "cache write failed; serving fetched bars");
                        unsaved_fetch = Some(bars);
                    }
                }
            }
        }

        if let Some(bars) = unsaved_fetch {
            return bars;
        }

        match self.store.load(symbol, interval).await {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol, interval = %interval, error = %e, "cache read failed");
                Vec::new()
            }
        }
    }
}

/// Derive one user-facing interval from its partition's canonical series
fn derive_dataset(descriptor: &IntervalDescriptor, series: &[OhlcvBar]) -> ChartDataset {
    match descriptor.resample {
        Some(rule) => {
            let resampled = resample(series, rule);
            ChartDataset::from_bars(&resampled, descriptor.intraday)
        }
        None => ChartDataset::from_bars(series, descriptor.intraday),
    }
}

fn parse_custom_unit(unit: &str) -> Result<BucketUnit> {
    match unit {
        "min" | "minutes" => Ok(BucketUnit::Minutes),
        "hours" => Ok(BucketUnit::Hours),
        "days" => Ok(BucketUnit::Days),
        "weeks" => Ok(BucketUnit::Weeks),
        "months" => Ok(BucketUnit::Months),
        other => Err(AppError::InvalidInput(format!(
            "Invalid unit '{}'. Must be one of: min, hours, days, weeks, months",
            other
        ))),
    }
}

/// Choose the canonical source interval for a custom request.
///
/// For minutes: the coarsest candidate that evenly divides the requested
/// width, falling back to 1m when nothing divides it (e.g. 7 minutes).
fn choose_custom_source(value: u32, unit: BucketUnit) -> (CanonicalInterval, Lookback) {
    match unit {
        BucketUnit::Minutes => {
            let mut chosen = MINUTE_SOURCES[0];
            for &(interval, lookback) in MINUTE_SOURCES {
                let width = interval.minutes().unwrap_or(1);
                if value >= width && value % width == 0 {
                    chosen = (interval, lookback);
                }
            }
            chosen
        }
        BucketUnit::Hours => (CanonicalInterval::Hour1, Lookback::Days(730)),
        BucketUnit::Days | BucketUnit::Weeks => (CanonicalInterval::Day1, Lookback::Max),
        BucketUnit::Months => (CanonicalInterval::Month1, Lookback::Max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CATALOG;
    use crate::services::provider::ProviderError;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted provider: serves fixed bars per canonical interval and
    /// records every fetch it receives.
    struct ScriptedProvider {
        data: HashMap<CanonicalInterval, Vec<OhlcvBar>>,
        failing: HashSet<CanonicalInterval>,
        delay: Option<Duration>,
        calls: Mutex<Vec<(String, CanonicalInterval, Lookback)>>,
    }

    impl ScriptedProvider {
        fn new(data: HashMap<CanonicalInterval, Vec<OhlcvBar>>) -> Self {
            Self {
                data,
                failing: HashSet::new(),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self::new(HashMap::new())
        }

        fn with_failure(mut self, interval: CanonicalInterval) -> Self {
            self.failing.insert(interval);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls_for(&self, interval: CanonicalInterval) -> Vec<(String, CanonicalInterval, Lookback)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, i, _)| *i == interval)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        async fn fetch(
            &self,
            symbol: &str,
            interval: CanonicalInterval,
            lookback: Lookback,
        ) -> std::result::Result<Vec<OhlcvBar>, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), interval, lookback));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(&interval) {
                return Err(ProviderError::Rejected("scripted failure".to_string()));
            }
            Ok(self.data.get(&interval).cloned().unwrap_or_default())
        }
    }

    fn minute_bars(count: usize) -> Vec<OhlcvBar> {
        let start = Utc.with_ymd_and_hms(2025, 11, 7, 14, 30, 0).unwrap();
        (0..count)
            .map(|i| {
                let t = start + ChronoDuration::minutes(i as i64);
                OhlcvBar::new(t, 100.0 + i as f64, 101.0 + i as f64, 99.0 + i as f64, 100.5 + i as f64, 1000.0)
            })
            .collect()
    }

    fn five_minute_bars(count: usize) -> Vec<OhlcvBar> {
        let start = Utc.with_ymd_and_hms(2025, 11, 7, 14, 30, 0).unwrap();
        (0..count)
            .map(|i| {
                let t = start + ChronoDuration::minutes(5 * i as i64);
                OhlcvBar::new(t, 1.0, 2.0, 0.5, 1.5, 100.0)
            })
            .collect()
    }

    fn daily_bars(count: usize) -> Vec<OhlcvBar> {
        let start = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let t = start + ChronoDuration::days(i as i64);
                OhlcvBar::new(t, 100.0, 105.0, 95.0, 102.0, 1_000_000.0)
            })
            .collect()
    }

    async fn service_with(provider: ScriptedProvider) -> (Arc<ChartService>, Arc<ScriptedProvider>) {
        let store = PriceStore::open_in_memory().await.unwrap();
        let provider = Arc::new(provider);
        let service = Arc::new(ChartService::new(
            store,
            provider.clone(),
            Duration::from_secs(5),
        ));
        (service, provider)
    }

    fn full_data() -> HashMap<CanonicalInterval, Vec<OhlcvBar>> {
        partition_by_canonical()
            .into_keys()
            .map(|interval| {
                let bars = if interval.is_intraday() {
                    minute_bars(30)
                } else {
                    daily_bars(30)
                };
                (interval, bars)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_fetch_per_canonical_interval() {
        let (service, provider) = service_with(ScriptedProvider::new(full_data())).await;

        let datasets = service.fetch_all("AAPL").await;

        // 18 user-facing keys, 10 distinct canonical intervals, 10 fetches
        assert_eq!(datasets.len(), CATALOG.len());
        assert_eq!(provider.call_count(), partition_by_canonical().len());
    }

    #[tokio::test]
    async fn test_second_batch_within_freshness_window_refetches_nothing() {
        let (service, provider) = service_with(ScriptedProvider::new(full_data())).await;

        service.fetch_all("AAPL").await;
        let first_batch_calls = provider.call_count();
        service.fetch_all("AAPL").await;

        assert_eq!(provider.call_count(), first_batch_calls);
    }

    #[tokio::test]
    async fn test_empty_upstream_yields_empty_datasets_not_errors() {
        let (service, provider) = service_with(ScriptedProvider::empty()).await;

        let datasets = service.fetch_all("NODATA").await;

        assert_eq!(datasets.len(), CATALOG.len());
        assert!(datasets.values().all(|d| d.is_empty()));

        // The empty fetch still counts for freshness: no refetch storm
        service.fetch_all("NODATA").await;
        assert_eq!(provider.call_count(), partition_by_canonical().len());
    }

    #[tokio::test]
    async fn test_partition_failure_does_not_affect_others() {
        let provider = ScriptedProvider::new(full_data()).with_failure(CanonicalInterval::Minute1);
        let (service, _provider) = service_with(provider).await;

        let datasets = service.fetch_all("AAPL").await;

        // 1m and 3m both source from the failed Minute1 partition
        assert!(datasets["1m"].is_empty());
        assert!(datasets["3m"].is_empty());
        assert!(!datasets["1d"].is_empty());
        assert!(!datasets["5m"].is_empty());
    }

    #[tokio::test]
    async fn test_partition_fetch_uses_longest_lookback() {
        let (service, provider) = service_with(ScriptedProvider::new(full_data())).await;

        service.fetch_all("AAPL").await;

        // 1mo, 6mo, 12mo all depend on the Month1 partition; its one fetch
        // must cover the widest requirement
        let calls = provider.calls_for(CanonicalInterval::Month1);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, Lookback::Max);
    }

    #[tokio::test]
    async fn test_daily_scenario_no_prior_cache() {
        let mut data = HashMap::new();
        data.insert(CanonicalInterval::Day1, daily_bars(5));
        let (service, provider) = service_with(ScriptedProvider::new(data)).await;

        let datasets = service.fetch_all("AAPL").await;

        let daily = &datasets["1d"];
        assert!(!daily.intraday);
        assert_eq!(daily.candles.len(), 5);
        assert!(matches!(
            daily.candles[0].time,
            crate::models::ChartTime::Date(_)
        ));
        assert_eq!(provider.calls_for(CanonicalInterval::Day1).len(), 1);
    }

    #[tokio::test]
    async fn test_derived_interval_resamples_shared_series() {
        let mut data = HashMap::new();
        // 5m canonical series backing both "5m" and "10m"
        data.insert(CanonicalInterval::Minute5, five_minute_bars(4));
        let (service, _provider) = service_with(ScriptedProvider::new(data)).await;

        let datasets = service.fetch_all("AAPL").await;

        assert_eq!(datasets["5m"].candles.len(), 4);
        assert_eq!(datasets["10m"].candles.len(), 2);
        assert_eq!(datasets["10m"].volume[0].value, 200.0);
    }

    #[test]
    fn test_custom_source_prefers_coarsest_even_divisor() {
        // 10 minutes: 5m is the coarsest candidate dividing evenly
        assert_eq!(
            choose_custom_source(10, BucketUnit::Minutes).0,
            CanonicalInterval::Minute5
        );
        // 60 minutes: the hourly source divides evenly
        assert_eq!(
            choose_custom_source(60, BucketUnit::Minutes).0,
            CanonicalInterval::Hour1
        );
        // 7 minutes: nothing divides it, fall back to 1m
        assert_eq!(
            choose_custom_source(7, BucketUnit::Minutes).0,
            CanonicalInterval::Minute1
        );
        // 45 minutes: 15m divides, 30m does not
        assert_eq!(
            choose_custom_source(45, BucketUnit::Minutes).0,
            CanonicalInterval::Minute15
        );
    }

    #[tokio::test]
    async fn test_custom_interval_fetches_chosen_source_and_resamples() {
        let mut data = HashMap::new();
        data.insert(CanonicalInterval::Minute5, five_minute_bars(4));
        let (service, provider) = service_with(ScriptedProvider::new(data)).await;

        let dataset = service.fetch_custom("AAPL", 10, "min").await.unwrap();

        assert_eq!(provider.calls_for(CanonicalInterval::Minute5).len(), 1);
        assert_eq!(dataset.candles.len(), 2);
        assert!(dataset.intraday);
    }

    #[tokio::test]
    async fn test_custom_interval_rejects_bad_arguments() {
        let (service, _provider) = service_with(ScriptedProvider::empty()).await;

        let err = service.fetch_custom("AAPL", 0, "min").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err = service.fetch_custom("AAPL", 5, "fortnights").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_custom_interval_empty_result_is_not_an_error() {
        let (service, _provider) = service_with(ScriptedProvider::empty()).await;

        let dataset = service.fetch_custom("NODATA", 10, "min").await.unwrap();
        assert!(dataset.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_fetch_persists_nothing_and_stays_due() {
        let mut data = HashMap::new();
        data.insert(CanonicalInterval::Minute5, five_minute_bars(4));
        let provider = Arc::new(
            ScriptedProvider::new(data).with_delay(Duration::from_millis(250)),
        );
        let store = PriceStore::open_in_memory().await.unwrap();
        let service = Arc::new(ChartService::new(
            store,
            provider.clone(),
            Duration::from_millis(10),
        ));

        let dataset = service.fetch_custom("AAPL", 10, "min").await.unwrap();

        // The slow fetch was cut off: nothing served, nothing persisted
        assert!(dataset.is_empty());
        assert_eq!(provider.calls_for(CanonicalInterval::Minute5).len(), 1);
        assert!(service
            .store
            .last_fetched("AAPL", CanonicalInterval::Minute5)
            .await
            .unwrap()
            .is_none());

        // With no fetch record the pair is still due, so the next
        // request tries upstream again
        service.fetch_custom("AAPL", 10, "min").await.unwrap();
        assert_eq!(provider.calls_for(CanonicalInterval::Minute5).len(), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_serves_previously_cached_series() {
        let provider = ScriptedProvider::empty().with_failure(CanonicalInterval::Minute5);
        let (service, provider) = service_with(provider).await;

        service
            .store
            .save("AAPL", CanonicalInterval::Minute5, &five_minute_bars(4))
            .await
            .unwrap();
        // Age the fetch record past the intraday window so the next
        // request goes upstream (and fails) instead of short-circuiting
        service
            .store
            .set_last_fetched(
                "AAPL",
                CanonicalInterval::Minute5,
                Utc::now() - ChronoDuration::hours(1),
            )
            .await
            .unwrap();

        let dataset = service.fetch_custom("AAPL", 10, "min").await.unwrap();

        assert_eq!(provider.calls_for(CanonicalInterval::Minute5).len(), 1);
        assert_eq!(dataset.candles.len(), 2);
        assert_eq!(dataset.volume[0].value, 200.0);
    }

    #[tokio::test]
    async fn test_failed_cache_write_still_serves_fetched_bars() {
        let mut data = HashMap::new();
        data.insert(CanonicalInterval::Minute5, five_minute_bars(4));
        let (service, provider) = service_with(ScriptedProvider::new(data)).await;

        // Kill the cache before the request: every store call now errors,
        // so the freshly fetched bars are the only possible source
        service.store.close().await;

        let dataset = service.fetch_custom("AAPL", 10, "min").await.unwrap();

        assert_eq!(provider.calls_for(CanonicalInterval::Minute5).len(), 1);
        assert_eq!(dataset.candles.len(), 2);
        assert!(dataset.intraday);
    }

    #[tokio::test]
    async fn test_custom_months_source_is_monthly() {
        let mut data = HashMap::new();
        data.insert(CanonicalInterval::Month1, daily_bars(3));
        let (service, provider) = service_with(ScriptedProvider::new(data)).await;

        service.fetch_custom("AAPL", 2, "months").await.unwrap();

        let calls = provider.calls_for(CanonicalInterval::Month1);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, Lookback::Max);
    }
}
