use super::from_exchange_symbol;
use crate::{error::DataError, tick::Tick};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Binance all-market mini ticker, received as an array on the `!miniTicker@arr` stream.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#all-market-mini-tickers-stream>
/// ```json
/// {
///   "e": "24hrMiniTicker",
///   "E": 1704067200123,
///   "s": "BTCUSDT",
///   "c": "42298.61",
///   "o": "41800.00",
///   "h": "42500.00",
///   "l": "41500.00",
///   "v": "25000.12345",
///   "q": "1050000000.00"
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct BinanceMiniTicker {
    #[serde(
        rename = "E",
        deserialize_with = "crate::de::de_u64_epoch_ms_as_datetime_utc"
    )]
    pub time: DateTime<Utc>,

    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "c", deserialize_with = "crate::de::de_str")]
    pub close: f64,

    #[serde(rename = "v", deserialize_with = "crate::de::de_str")]
    pub volume: f64,
}

impl BinanceMiniTicker {
    /// Convert into a [`Tick`] if the market trades against the `quote` asset.
    pub fn into_tick(self, quote: &str) -> Option<Result<Tick, DataError>> {
        let symbol = from_exchange_symbol(&self.market, quote)?;
        Some(Tick::new(symbol, self.close, self.volume, self.time))
    }
}

/// Parse one `!miniTicker@arr` text frame into [`Tick`]s, skipping markets not quoted in `quote`.
pub fn parse_mini_tickers(payload: &str, quote: &str) -> Vec<Result<Tick, DataError>> {
    match serde_json::from_str::<Vec<BinanceMiniTicker>>(payload) {
        Ok(tickers) => tickers
            .into_iter()
            .filter_map(|ticker| ticker.into_tick(quote))
            .collect(),
        Err(error) => vec![Err(DataError::from(error))],
    }
}
