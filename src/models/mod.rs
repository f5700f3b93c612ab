mod bar;
mod chart;
mod interval;
pub mod catalog;

pub use bar::OhlcvBar;
pub use catalog::{IntervalDescriptor, CATALOG};
pub use chart::{Candle, ChartDataset, ChartTime, VolumeBar};
pub use interval::{BucketRule, BucketUnit, CanonicalInterval, Lookback};
