use crate::{candle::Candle, symbol::Symbol};
use chrono::DateTime;
use serde::Deserialize;
use tracing::warn;

/// Binance REST kline, returned as a positional JSON array.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
/// ```json
/// [
///   1499040000000,
///   "0.01634790",
///   "0.80000000",
///   "0.01575800",
///   "0.01577100",
///   "148976.11427815",
///   1499644799999,
///   "2434.19055334",
///   308,
///   "1756.87402397",
///   "28.46694368",
///   "0"
/// ]
/// ```
#[derive(Debug, Deserialize)]
pub struct BinanceKline(
    pub i64,    // 0: Open time
    pub String, // 1: Open
    pub String, // 2: High
    pub String, // 3: Low
    pub String, // 4: Close
    pub String, // 5: Volume
    pub i64,    // 6: Close time
    pub String, // 7: Quote asset volume
    pub i64,    // 8: Number of trades
    pub String, // 9: Taker buy base asset volume
    pub String, // 10: Taker buy quote asset volume
    pub String, // 11: Ignore
);

impl BinanceKline {
    /// Convert into a validated [`Candle`], returning `None` for unparseable or invalid klines.
    pub fn into_candle(self, symbol: &Symbol) -> Option<Candle> {
        let time = DateTime::from_timestamp_millis(self.0)?;
        let parsed = (
            self.1.parse::<f64>(),
            self.2.parse::<f64>(),
            self.3.parse::<f64>(),
            self.4.parse::<f64>(),
            self.5.parse::<f64>(),
        );

        let (Ok(open), Ok(high), Ok(low), Ok(close), Ok(volume)) = parsed else {
            warn!(%symbol, open_time = self.0, "dropping unparseable Binance kline");
            return None;
        };

        Candle::new(symbol.clone(), time, open, high, low, close, volume)
            .inspect_err(|error| warn!(%symbol, %error, "dropping invalid Binance kline"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_de_binance_kline() {
        let input = r#"[
            [1704067200000,"42283.58","42298.62","42261.02","42298.61","35.92724",1704067259999,"1519287.53",1190,"23.27","984012.46","0"],
            [1704067260000,"42298.62","42320.00","42290.00","42292.36","21.00000",1704067319999,"888332.90",900,"10.00","423000.00","0"],
            [1704067320000,"bad","42320.00","42290.00","42292.36","21.00000",1704067379999,"888332.90",900,"10.00","423000.00","0"]
        ]"#;

        let symbol = Symbol::new("BTC/USDT").unwrap();
        let klines = serde_json::from_str::<Vec<BinanceKline>>(input).unwrap();
        let candles = klines
            .into_iter()
            .filter_map(|kline| kline.into_candle(&symbol))
            .collect::<Vec<_>>();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time.timestamp_millis(), 1704067200000);
        assert_eq!(candles[0].open, 42283.58);
        assert_eq!(candles[0].high, 42298.62);
        assert_eq!(candles[0].low, 42261.02);
        assert_eq!(candles[0].close, 42298.61);
        assert_eq!(candles[0].volume, 35.92724);
        assert_eq!(candles[1].close, 42292.36);
    }
}
