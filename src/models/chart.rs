use crate::constants::{VOLUME_DOWN_COLOR, VOLUME_UP_COLOR};
use crate::models::OhlcvBar;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Chart timestamp: unix seconds for intraday series, calendar date string
/// for daily and coarser. Matches what the charting library expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartTime {
    Unix(i64),
    Date(String),
}

impl ChartTime {
    fn from_bar_time(time: DateTime<Utc>, intraday: bool) -> Self {
        if intraday {
            ChartTime::Unix(time.timestamp())
        } else {
            ChartTime::Date(time.format("%Y-%m-%d").to_string())
        }
    }
}

/// Single candlestick as rendered by the chart
#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    pub time: ChartTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Single volume histogram bar, colored by candle direction
#[derive(Debug, Clone, Serialize)]
pub struct VolumeBar {
    pub time: ChartTime,
    pub value: f64,
    pub color: &'static str,
}

/// Display-oriented projection of a (possibly resampled) series.
/// Ephemeral; recomputed on every request, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ChartDataset {
    pub candles: Vec<Candle>,
    pub volume: Vec<VolumeBar>,
    pub intraday: bool,
}

impl ChartDataset {
    /// Empty dataset for an interval that produced no data
    pub fn empty(intraday: bool) -> Self {
        Self {
            candles: Vec::new(),
            volume: Vec::new(),
            intraday,
        }
    }

    /// Project a series into chart-ready candle and volume lists
    pub fn from_bars(bars: &[OhlcvBar], intraday: bool) -> Self {
        let mut candles = Vec::with_capacity(bars.len());
        let mut volume = Vec::with_capacity(bars.len());

        for bar in bars {
            let time = ChartTime::from_bar_time(bar.time, intraday);
            candles.push(Candle {
                time: time.clone(),
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            });
            let color = if bar.close >= bar.open {
                VOLUME_UP_COLOR
            } else {
                VOLUME_DOWN_COLOR
            };
            volume.push(VolumeBar {
                time,
                value: bar.volume,
                color,
            });
        }

        Self {
            candles,
            volume,
            intraday,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_intraday_uses_unix_timestamps() {
        let time = Utc.with_ymd_and_hms(2025, 11, 8, 9, 30, 0).unwrap();
        let bars = vec![OhlcvBar::new(time, 1.0, 2.0, 0.5, 1.5, 100.0)];

        let dataset = ChartDataset::from_bars(&bars, true);
        assert_eq!(dataset.candles[0].time, ChartTime::Unix(time.timestamp()));
        assert!(dataset.intraday);
    }

    #[test]
    fn test_daily_uses_date_strings() {
        let time = Utc.with_ymd_and_hms(2025, 11, 8, 0, 0, 0).unwrap();
        let bars = vec![OhlcvBar::new(time, 1.0, 2.0, 0.5, 1.5, 100.0)];

        let dataset = ChartDataset::from_bars(&bars, false);
        assert_eq!(
            dataset.candles[0].time,
            ChartTime::Date("2025-11-08".to_string())
        );
    }

    #[test]
    fn test_volume_color_follows_candle_direction() {
        let time = Utc.with_ymd_and_hms(2025, 11, 8, 0, 0, 0).unwrap();
        let up = OhlcvBar::new(time, 1.0, 2.0, 0.5, 1.5, 100.0);
        let down = OhlcvBar::new(time, 1.5, 2.0, 0.5, 1.0, 50.0);

        let dataset = ChartDataset::from_bars(&[up, down], false);
        assert_eq!(dataset.volume[0].color, VOLUME_UP_COLOR);
        assert_eq!(dataset.volume[1].color, VOLUME_DOWN_COLOR);
    }
}
