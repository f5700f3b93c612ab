use crate::error::{AppError, Result};
use crate::models::{CanonicalInterval, OhlcvBar};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// SQLite-backed cache for canonical OHLCV series and fetch metadata.
///
/// Keys are (symbol, canonical interval, timestamp); ingestion is an
/// idempotent upsert, so overlapping refetches are safe. WAL mode lets
/// readers proceed while a writer upserts.
#[derive(Debug, Clone)]
pub struct PriceStore {
    pool: SqlitePool,
}

impl PriceStore {
    /// Open (or create) the cache database at the given path
    pub async fn open(database_path: PathBuf) -> Result<Self> {
        info!("Opening cache database at {:?}", database_path);

        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePool::connect_with(connect_options).await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::new().in_memory(true);
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_data (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, interval, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fetch_metadata (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                last_fetched TEXT NOT NULL,
                PRIMARY KEY (symbol, interval)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a batch of bars and record the fetch time. No-op on empty input.
    pub async fn save(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        bars: &[OhlcvBar],
    ) -> Result<()> {
        if bars.is_empty() {
            return Ok(());
        }

        let mut transaction = self.pool.begin().await?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO price_data
                (symbol, interval, timestamp, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(symbol)
            .bind(interval.as_str())
            .bind(bar.time.to_rfc3339())
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;

        self.touch(symbol, interval).await
    }

    /// Record that a fetch completed now, whether or not it returned rows
    pub async fn touch(&self, symbol: &str, interval: CanonicalInterval) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO fetch_metadata (symbol, interval, last_fetched)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite the fetch record with an arbitrary instant, so tests can
    /// age a cached series past its freshness window
    #[cfg(test)]
    pub async fn set_last_fetched(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        when: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO fetch_metadata (symbol, interval, last_fetched)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(when.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the full cached series ordered by ascending timestamp.
    /// Returns an empty series when nothing is cached for the pair.
    pub async fn load(&self, symbol: &str, interval: CanonicalInterval) -> Result<Vec<OhlcvBar>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM price_data
            WHERE symbol = ?1 AND interval = ?2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_bar).collect()
    }

    /// When did we last fetch this pair from upstream, if ever
    pub async fn last_fetched(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT last_fetched FROM fetch_metadata WHERE symbol = ?1 AND interval = ?2",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("last_fetched")?;
                Ok(Some(parse_utc_timestamp(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Overall cache statistics for the `status` command
    pub async fn stats(&self) -> Result<StoreStats> {
        let total_bars: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_data")
            .fetch_one(&self.pool)
            .await?;

        let unique_symbols: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT symbol) FROM price_data")
            .fetch_one(&self.pool)
            .await?;

        let series: Vec<SeriesStats> = sqlx::query(
            r#"
            SELECT symbol, interval, COUNT(*) AS bar_count,
                   MIN(timestamp) AS first_ts, MAX(timestamp) AS last_ts
            FROM price_data
            GROUP BY symbol, interval
            ORDER BY symbol, interval
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            Ok(SeriesStats {
                symbol: row.try_get("symbol")?,
                interval: row.try_get("interval")?,
                bar_count: row.try_get("bar_count")?,
                first_timestamp: row.try_get("first_ts")?,
                last_timestamp: row.try_get("last_ts")?,
            })
        })
        .collect::<Result<_>>()?;

        Ok(StoreStats {
            total_bars,
            unique_symbols,
            series,
        })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Cache statistics, grouped per (symbol, interval) series
#[derive(Debug)]
pub struct StoreStats {
    pub total_bars: i64,
    pub unique_symbols: i64,
    pub series: Vec<SeriesStats>,
}

#[derive(Debug)]
pub struct SeriesStats {
    pub symbol: String,
    pub interval: String,
    pub bar_count: i64,
    pub first_timestamp: String,
    pub last_timestamp: String,
}

fn row_to_bar(row: SqliteRow) -> Result<OhlcvBar> {
    let raw_ts: String = row.try_get("timestamp")?;
    Ok(OhlcvBar {
        time: parse_utc_timestamp(&raw_ts)?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: read_volume(&row)?,
    })
}

/// Volume may have been written as REAL, INTEGER, or text by older tooling;
/// coerce all of them to f64 on read.
fn read_volume(row: &SqliteRow) -> Result<f64> {
    if let Ok(v) = row.try_get::<f64, _>("volume") {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64, _>("volume") {
        return Ok(v as f64);
    }
    let raw: String = row.try_get("volume")?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| AppError::Database(format!("unparseable volume '{}': {}", raw, e)))
}

/// Parse a stored timestamp, treating timezone-naive values as UTC
pub fn parse_utc_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
        if format == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, format) {
                if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                    return Ok(naive.and_utc());
                }
            }
        }
    }
    Err(AppError::Database(format!("unparseable timestamp '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bars() -> Vec<OhlcvBar> {
        vec![
            OhlcvBar::new(
                Utc.with_ymd_and_hms(2025, 11, 7, 14, 30, 0).unwrap(),
                100.0,
                105.0,
                99.0,
                104.0,
                1_000_000.0,
            ),
            OhlcvBar::new(
                Utc.with_ymd_and_hms(2025, 11, 8, 14, 30, 0).unwrap(),
                104.0,
                106.0,
                103.0,
                105.5,
                800_000.0,
            ),
        ]
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let bars = sample_bars();

        store.save("AAPL", CanonicalInterval::Day1, &bars).await.unwrap();

        let loaded = store.load("AAPL", CanonicalInterval::Day1).await.unwrap();
        assert_eq!(loaded, bars);
    }

    #[tokio::test]
    async fn test_load_returns_ascending_order() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let mut bars = sample_bars();
        bars.reverse();

        store.save("AAPL", CanonicalInterval::Day1, &bars).await.unwrap();

        let loaded = store.load("AAPL", CanonicalInterval::Day1).await.unwrap();
        assert!(loaded.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[tokio::test]
    async fn test_overlapping_save_is_idempotent() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let bars = sample_bars();

        store.save("AAPL", CanonicalInterval::Day1, &bars).await.unwrap();
        // Re-save the same range plus a corrected close on the last bar
        let mut updated = bars.clone();
        updated[1].close = 107.0;
        store.save("AAPL", CanonicalInterval::Day1, &updated).await.unwrap();

        let loaded = store.load("AAPL", CanonicalInterval::Day1).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].close, 107.0);
    }

    #[tokio::test]
    async fn test_empty_save_is_a_noop() {
        let store = PriceStore::open_in_memory().await.unwrap();

        store.save("AAPL", CanonicalInterval::Day1, &[]).await.unwrap();

        // No bars and, since nothing was fetched, no freshness record either
        assert!(store.load("AAPL", CanonicalInterval::Day1).await.unwrap().is_empty());
        assert!(store
            .last_fetched("AAPL", CanonicalInterval::Day1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_updates_last_fetched() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let before = Utc::now();

        store
            .save("AAPL", CanonicalInterval::Minute5, &sample_bars())
            .await
            .unwrap();

        let fetched = store
            .last_fetched("AAPL", CanonicalInterval::Minute5)
            .await
            .unwrap()
            .expect("metadata row should exist after save");
        assert!(fetched >= before - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_series_are_keyed_per_interval() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let bars = sample_bars();

        store.save("AAPL", CanonicalInterval::Day1, &bars).await.unwrap();

        assert!(store.load("AAPL", CanonicalInterval::Hour1).await.unwrap().is_empty());
        assert!(store.load("MSFT", CanonicalInterval::Day1).await.unwrap().is_empty());
    }

    #[test]
    fn test_naive_timestamps_are_treated_as_utc() {
        let parsed = parse_utc_timestamp("2025-11-08 14:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 11, 8, 14, 30, 0).unwrap());

        let parsed = parse_utc_timestamp("2025-11-08T14:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 11, 8, 12, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists_across_reopens() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("cache").join("test.db");
        let bars = sample_bars();

        let store = PriceStore::open(db_path.clone()).await.unwrap();
        store.save("AAPL", CanonicalInterval::Day1, &bars).await.unwrap();
        store.close().await;

        let reopened = PriceStore::open(db_path).await.unwrap();
        let loaded = reopened.load("AAPL", CanonicalInterval::Day1).await.unwrap();
        assert_eq!(loaded, bars);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_stats_groups_by_series() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.save("AAPL", CanonicalInterval::Day1, &sample_bars()).await.unwrap();
        store.save("AAPL", CanonicalInterval::Hour1, &sample_bars()).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_bars, 4);
        assert_eq!(stats.unique_symbols, 1);
        assert_eq!(stats.series.len(), 2);
    }
}
