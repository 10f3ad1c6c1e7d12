use crate::{error::DataError, symbol::Symbol, tick::Tick, timeframe::minute_floor};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Normalised OHLCV bar for one minute-aligned bucket of a [`Symbol`].
///
/// Exactly one [`Candle`] exists per `(symbol, time)` key. Repeated writes for the same key are
/// combined with [`Candle::merge`], never overwritten.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Construct a validated [`Candle`].
    ///
    /// `time` must be minute-aligned, prices finite & positive, and the high/low must bound the
    /// open/close.
    pub fn new(
        symbol: Symbol,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, DataError> {
        let candle = Self {
            symbol,
            time,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Construct the single-bar approximation of a live [`Tick`].
    ///
    /// The bar opens at `prior_close` (or the tick price if unknown) and closes at the tick price.
    pub fn from_tick(tick: &Tick, prior_close: Option<f64>) -> Result<Self, DataError> {
        let open = prior_close
            .filter(|price| price.is_finite() && *price > 0.0)
            .unwrap_or(tick.price);

        Self::new(
            tick.symbol.clone(),
            minute_floor(tick.time),
            open,
            open.max(tick.price),
            open.min(tick.price),
            tick.price,
            tick.volume,
        )
    }

    fn validate(&self) -> Result<(), DataError> {
        let invalid = |reason: String| DataError::InvalidCandle {
            symbol: self.symbol.to_string(),
            reason,
        };

        if self.time.second() != 0 || self.time.nanosecond() != 0 {
            return Err(invalid(format!("time {} is not minute-aligned", self.time)));
        }

        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|price| !price.is_finite() || *price <= 0.0) {
            return Err(invalid(format!("non-positive or non-finite price in {prices:?}")));
        }

        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(invalid(format!("invalid volume {}", self.volume)));
        }

        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(invalid(format!(
                "high {} / low {} do not bound open {} / close {}",
                self.high, self.low, self.open, self.close
            )));
        }

        Ok(())
    }

    /// Merge a later write for the same `(symbol, time)` key into this [`Candle`].
    ///
    /// Open is kept, high/low widen, close & volume take the newer value (volume is a snapshot
    /// counter, not an increment). Applying the same update twice is a no-op.
    pub fn merge(&mut self, update: &Candle) {
        debug_assert_eq!(self.key(), update.key());
        self.high = self.high.max(update.high);
        self.low = self.low.min(update.low);
        self.close = update.close;
        self.volume = update.volume;
    }

    /// Return a merged copy, leaving `self` untouched.
    pub fn merged(&self, update: &Candle) -> Candle {
        let mut merged = self.clone();
        merged.merge(update);
        merged
    }

    pub fn key(&self) -> (&Symbol, DateTime<Utc>) {
        (&self.symbol, self.time)
    }
}
