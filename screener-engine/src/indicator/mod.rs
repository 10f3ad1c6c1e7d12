use crate::resample::Bar;
use std::collections::VecDeque;

/// Average Directional Index, Wilder smoothed.
pub mod adx;

/// Average True Range, Wilder smoothed.
pub mod atr;

/// Bollinger Bands over a rolling sample standard deviation.
pub mod bollinger;

/// Exponential Moving Average, seeded with the first value.
pub mod ema;

/// Moving Average Convergence Divergence.
pub mod macd;

/// Money Flow Index.
pub mod mfi;

/// Relative Strength Index, Wilder smoothed.
pub mod rsi;

/// Stochastic Oscillator %K / %D.
pub mod stochastic;

/// Fixed capacity rolling window, evicting the oldest value once full.
#[derive(Debug, Clone)]
pub struct RingBuf {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RingBuf {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum() / self.values.len() as f64
    }

    /// Sample standard deviation (n - 1 denominator).
    pub fn std_sample(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / (self.values.len() - 1) as f64;
        variance.sqrt()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Every indicator carried by a [`TimeframeIndicators`](crate::snapshot::TimeframeIndicators),
/// updated bar by bar over one resampled series.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub ema_20: ema::Ema,
    pub ema_50: ema::Ema,
    pub ema_100: ema::Ema,
    pub ema_200: ema::Ema,
    pub rsi: rsi::Rsi,
    pub macd: macd::Macd,
    pub bollinger: bollinger::Bollinger,
    pub atr: atr::Atr,
    pub adx: adx::Adx,
    pub mfi: mfi::Mfi,
    pub stochastic: stochastic::Stochastic,
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self {
            ema_20: ema::Ema::new(20),
            ema_50: ema::Ema::new(50),
            ema_100: ema::Ema::new(100),
            ema_200: ema::Ema::new(200),
            rsi: rsi::Rsi::new(14),
            macd: macd::Macd::new(12, 26, 9),
            bollinger: bollinger::Bollinger::new(20, 2.0),
            atr: atr::Atr::new(14),
            adx: adx::Adx::new(14),
            mfi: mfi::Mfi::new(14),
            stochastic: stochastic::Stochastic::new(14, 3),
        }
    }
}

impl IndicatorSet {
    /// Run every indicator over `bars` (oldest first) and return the warmed up state.
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut set = Self::default();
        bars.iter().for_each(|bar| set.update(bar));
        set
    }

    pub fn update(&mut self, bar: &Bar) {
        self.ema_20.update(bar.close);
        self.ema_50.update(bar.close);
        self.ema_100.update(bar.close);
        self.ema_200.update(bar.close);
        self.rsi.update(bar.close);
        self.macd.update(bar.close);
        self.bollinger.update(bar.close);
        self.atr.update(bar.high, bar.low, bar.close);
        self.adx.update(bar.high, bar.low, bar.close);
        self.mfi.update(bar.high, bar.low, bar.close, bar.volume);
        self.stochastic.update(bar.high, bar.low, bar.close);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "actual {actual} != expected {expected}"
        );
    }

    #[test]
    fn test_ring_buf() {
        let mut ring = RingBuf::new(3);
        assert!(ring.is_empty());

        for value in [1.0, 2.0, 3.0, 4.0] {
            ring.push(value);
        }

        assert!(ring.is_full());
        assert_eq!(ring.len(), 3);
        assert_close(ring.sum(), 9.0);
        assert_close(ring.mean(), 3.0);
        assert_close(ring.std_sample(), 1.0);
        assert_close(ring.min(), 2.0);
        assert_close(ring.max(), 4.0);
    }
}
