use crate::{
    config::ComputeConfig,
    error::EngineError,
    indicator::IndicatorSet,
    resample::{Bar, resample},
};
use chrono::{DateTime, Utc};
use screener_data::{Symbol, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Directional label derived from the close against EMA50, confirmed by EMA50 against EMA200.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Trend {
    /// Classify a close.
    ///
    /// Bullish requires `close > ema_50` and, if EMA200 is available, `ema_50 >= ema_200`.
    /// Bearish is the mirror. Anything else, including a missing EMA50, is Neutral.
    pub fn classify(close: f64, ema_50: Option<f64>, ema_200: Option<f64>) -> Self {
        let Some(ema_50) = ema_50 else {
            return Trend::Neutral;
        };

        if close > ema_50 && ema_200.is_none_or(|ema_200| ema_50 >= ema_200) {
            Trend::Bullish
        } else if close < ema_50 && ema_200.is_none_or(|ema_200| ema_50 <= ema_200) {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }
}

/// Indicator values of the last bar of one resampled [`Timeframe`] series.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeframeIndicators {
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_100: Option<f64>,
    pub ema_200: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub mfi_14: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub trend: Trend,
    pub close: f64,
    /// Number of resampled bars the values were computed from.
    pub bars: usize,
    /// Bucket start of the last bar.
    pub bar_time: DateTime<Utc>,
}

impl TimeframeIndicators {
    /// Compute every indicator over `bars` (ascending), returning `None` for an empty series.
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let last = bars.last()?;
        let set = IndicatorSet::from_bars(bars);

        let macd = set.macd.value();
        let bollinger = set.bollinger.value();
        let stochastic = set.stochastic.value();
        let ema_50 = set.ema_50.value();
        let ema_200 = set.ema_200.value();

        Some(Self {
            rsi_14: set.rsi.value(),
            macd: macd.map(|output| output.macd),
            macd_signal: macd.map(|output| output.signal),
            macd_histogram: macd.map(|output| output.histogram),
            ema_20: set.ema_20.value(),
            ema_50,
            ema_100: set.ema_100.value(),
            ema_200,
            bb_upper: bollinger.map(|output| output.upper),
            bb_middle: bollinger.map(|output| output.middle),
            bb_lower: bollinger.map(|output| output.lower),
            atr_14: set.atr.value(),
            adx_14: set.adx.value(),
            mfi_14: set.mfi.value(),
            stoch_k: stochastic.map(|output| output.k),
            stoch_d: stochastic.and_then(|output| output.d),
            trend: Trend::classify(last.close, ema_50, ema_200),
            close: last.close,
            bars: bars.len(),
            bar_time: last.time,
        })
    }
}

/// Latest computed indicators of one symbol across every [`Timeframe`].
///
/// Persisted wholesale as one Status Store row.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndicatorSnapshot {
    pub symbol: Symbol,
    pub current_price: f64,
    pub updated_at: DateTime<Utc>,
    pub timeframes: BTreeMap<Timeframe, TimeframeIndicators>,
}

impl IndicatorSnapshot {
    pub fn timeframe(&self, timeframe: Timeframe) -> Option<&TimeframeIndicators> {
        self.timeframes.get(&timeframe)
    }
}

/// Result of [`compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub snapshot: IndicatorSnapshot,
    /// Timeframes recomputed this cycle.
    pub computed: Vec<Timeframe>,
    /// Timeframes with too few bars, carrying their previous value (if any).
    pub skipped: Vec<Timeframe>,
}

/// Compute the [`IndicatorSnapshot`] of `symbol` from ascending 1m `bars`.
///
/// Every configured timeframe with at least its minimum of resampled bars is recomputed, others
/// keep the value found in `previous`. Used identically by the batch workers & the shards.
pub fn compute(
    symbol: &Symbol,
    bars: &[Bar],
    previous: Option<&IndicatorSnapshot>,
    config: &ComputeConfig,
    now: DateTime<Utc>,
) -> Result<Computed, EngineError> {
    let Some(last) = bars.last() else {
        return Err(EngineError::insufficient(symbol, "no 1m bars"));
    };

    let mut timeframes = previous
        .map(|previous| previous.timeframes.clone())
        .unwrap_or_default();
    let mut computed = Vec::with_capacity(config.timeframes.len());
    let mut skipped = Vec::new();

    for timeframe in &config.timeframes {
        let resampled = resample(bars, *timeframe);
        let min_bars = config.min_bars(*timeframe);
        if resampled.len() < min_bars {
            debug!(
                %symbol,
                %timeframe,
                bars = resampled.len(),
                min_bars,
                "insufficient bars, retaining previous values"
            );
            skipped.push(*timeframe);
            continue;
        }

        if let Some(indicators) = TimeframeIndicators::from_bars(&resampled) {
            timeframes.insert(*timeframe, indicators);
            computed.push(*timeframe);
        }
    }

    Ok(Computed {
        snapshot: IndicatorSnapshot {
            symbol: symbol.clone(),
            current_price: last.close,
            updated_at: now,
            timeframes,
        },
        computed,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn bars(count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.1).sin() * 3.0 + i as f64 * 0.01;
                Bar {
                    time: start + TimeDelta::minutes(i as i64),
                    open: close - 0.2,
                    high: close + 0.5,
                    low: close - 0.7,
                    close,
                    volume: 10.0 + (i % 7) as f64,
                }
            })
            .collect()
    }

    #[test]
    fn test_trend_classify() {
        struct TestCase {
            input: (f64, Option<f64>, Option<f64>),
            expected: Trend,
        }

        let tests = vec![
            TestCase {
                // TC0: above EMA50, no EMA200
                input: (105.0, Some(100.0), None),
                expected: Trend::Bullish,
            },
            TestCase {
                // TC1: above EMA50 with EMA50 above EMA200
                input: (105.0, Some(100.0), Some(95.0)),
                expected: Trend::Bullish,
            },
            TestCase {
                // TC2: above EMA50 but EMA50 below EMA200 disagrees
                input: (105.0, Some(100.0), Some(101.0)),
                expected: Trend::Neutral,
            },
            TestCase {
                // TC3: below EMA50 with EMA50 below EMA200
                input: (95.0, Some(100.0), Some(101.0)),
                expected: Trend::Bearish,
            },
            TestCase {
                // TC4: below EMA50, no EMA200
                input: (95.0, Some(100.0), None),
                expected: Trend::Bearish,
            },
            TestCase {
                // TC5: no EMA50
                input: (95.0, None, None),
                expected: Trend::Neutral,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let (close, ema_50, ema_200) = test.input;
            let actual = Trend::classify(close, ema_50, ema_200);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_compute_empty_is_insufficient() {
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let actual = compute(&symbol, &[], None, &ComputeConfig::default(), Utc::now());
        assert!(matches!(actual, Err(EngineError::DataInsufficient { .. })));
    }

    #[test]
    fn test_compute_skips_short_timeframes() {
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let input = bars(300);
        let config = ComputeConfig::default();

        let actual = compute(&symbol, &input, None, &config, Utc::now()).unwrap();

        // 300 1m bars: 300 x 1m & 60 x 5m reach min_bars, 20 x 15m and coarser do not
        assert_eq!(actual.computed, vec![Timeframe::M1, Timeframe::M5]);
        assert_eq!(
            actual.skipped,
            vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1]
        );
        assert_eq!(actual.snapshot.current_price, input[299].close);

        let one_minute = actual.snapshot.timeframe(Timeframe::M1).unwrap();
        assert_eq!(one_minute.bars, 300);
        assert!(one_minute.ema_200.is_some());
        assert!(one_minute.rsi_14.is_some());
        assert!(one_minute.adx_14.is_some());
        assert!(one_minute.stoch_d.is_some());

        // 60 x 5m bars: EMA100 & EMA200 periods exceed the series
        let five_minute = actual.snapshot.timeframe(Timeframe::M5).unwrap();
        assert_eq!(five_minute.bars, 60);
        assert!(five_minute.ema_50.is_some());
        assert!(five_minute.ema_100.is_none());
        assert!(five_minute.ema_200.is_none());
    }

    #[test]
    fn test_compute_uses_per_timeframe_minimum() {
        let symbol = Symbol::new("BTC/USDT").unwrap();
        // 21 days of 1m bars: 126 x 4h & 21 x 1d buckets
        let input = bars(21 * 24 * 60);
        let config = ComputeConfig::default().with_timeframes([Timeframe::H4, Timeframe::D1]);

        let actual = compute(&symbol, &input, None, &config, Utc::now()).unwrap();
        assert_eq!(actual.computed, vec![Timeframe::H4, Timeframe::D1]);
        assert!(actual.skipped.is_empty());

        let daily = actual.snapshot.timeframe(Timeframe::D1).unwrap();
        assert_eq!(daily.bars, 21);
        assert!(daily.rsi_14.is_some());
        assert!(daily.bb_upper.is_some());
        assert!(daily.ema_50.is_none());

        // 10 days: 60 x 4h still computed, 10 x 1d below its minimum of 20
        let actual = compute(&symbol, &input[..10 * 24 * 60], None, &config, Utc::now()).unwrap();
        assert_eq!(actual.computed, vec![Timeframe::H4]);
        assert_eq!(actual.skipped, vec![Timeframe::D1]);
    }

    #[test]
    fn test_compute_retains_previous_timeframes() {
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let config = ComputeConfig::default();

        let mut previous = compute(&symbol, &bars(300), None, &config, Utc::now())
            .unwrap()
            .snapshot;
        let mut retained = previous.timeframes[&Timeframe::M5].clone();
        retained.close = 1.0;
        previous.timeframes.insert(Timeframe::H1, retained.clone());

        // Only 60 bars this time: 1m recomputed, 5m & 1h keep previous values
        let actual = compute(&symbol, &bars(60), Some(&previous), &config, Utc::now()).unwrap();

        assert_eq!(actual.computed, vec![Timeframe::M1]);
        assert_eq!(actual.snapshot.timeframe(Timeframe::H1), Some(&retained));
        assert_eq!(
            actual.snapshot.timeframe(Timeframe::M5),
            previous.timeframe(Timeframe::M5)
        );
        assert_eq!(actual.snapshot.timeframe(Timeframe::M1).unwrap().bars, 60);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let symbol = Symbol::new("ETH/USDT").unwrap();
        let input = bars(500);
        let now = Utc::now();
        let config = ComputeConfig::default();

        let first = compute(&symbol, &input, None, &config, now).unwrap();
        let second = compute(&symbol, &input, None, &config, now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_serde_timeframe_keys() {
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let snapshot = compute(&symbol, &bars(100), None, &ComputeConfig::default(), Utc::now())
            .unwrap()
            .snapshot;

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["timeframes"]["1m"]["rsi_14"].is_number());
        assert!(json["timeframes"]["1m"]["trend"].is_string());

        let decoded = serde_json::from_value::<IndicatorSnapshot>(json).unwrap();
        assert_eq!(decoded.symbol, snapshot.symbol);
        assert_eq!(
            decoded.timeframes.keys().collect::<Vec<_>>(),
            vec![&Timeframe::M1]
        );
    }
}
