use chrono::{DateTime, Utc};
use screener_data::{Candle, Timeframe};
use serde::{Deserialize, Serialize};

/// OHLCV bar of an implicit symbol, used for in-memory series & resampling.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Candle> for Bar {
    fn from(candle: &Candle) -> Self {
        Self {
            time: candle.time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }
}

impl Bar {
    /// Combine the next bar of the same bucket: first open, max high, min low, last close, summed
    /// volume.
    fn aggregate(&mut self, next: &Bar) {
        self.high = self.high.max(next.high);
        self.low = self.low.min(next.low);
        self.close = next.close;
        self.volume += next.volume;
    }

    /// Apply a later write to the same minute: high/low widen, close & volume are replaced.
    pub fn merge(&mut self, update: &Bar) {
        self.high = self.high.max(update.high);
        self.low = self.low.min(update.low);
        self.close = update.close;
        self.volume = update.volume;
    }
}

/// Resample ascending 1m `bars` into epoch-aligned `timeframe` buckets.
///
/// Each output bar is stamped with its bucket start. Input order is preserved, so bars must be
/// sorted ascending by time.
pub fn resample(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    if timeframe == Timeframe::M1 {
        return bars.to_vec();
    }

    bars.iter().fold(Vec::new(), |mut buckets: Vec<Bar>, bar| {
        let bucket = timeframe.bucket_start(bar.time);
        match buckets.last_mut() {
            Some(current) if current.time == bucket => current.aggregate(bar),
            _ => buckets.push(Bar { time: bucket, ..*bar }),
        }
        buckets
    })
}
