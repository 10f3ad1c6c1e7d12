use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use screener_data::{Candle, Symbol, Tick};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// In-process fan-out over a `tokio::sync::broadcast` channel.
pub mod memory;

/// Redis `PUBLISH` / `SUBSCRIBE` fan-out.
pub mod redis;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BusError {
    #[error("fan-out backend error: {0}")]
    Backend(String),

    #[error("failed to encode fan-out payload: {0}")]
    Encode(String),
}

/// Stream of raw fan-out payloads.
pub type Subscription = BoxStream<'static, String>;

/// One-to-many publish/subscribe channel without persistence. Subscribers only receive
/// messages published after they subscribed, and slow subscribers may miss messages.
#[async_trait]
pub trait FanOut: Send + Sync {
    /// Publish `payload`, returning the number of subscribers reached (if known).
    async fn publish(&self, payload: String) -> Result<usize, BusError>;

    async fn subscribe(&self) -> Result<Subscription, BusError>;
}

/// Live price update relayed to subscribers as JSON text.
///
/// ```json
/// {"s":"BTC/USDT","p":42298.61,"v":25000.1,"t":1704067200123,"bar":{...}}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PriceUpdate {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "v")]
    pub volume: f64,
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    /// Single bar approximation of the tick's minute.
    pub bar: Candle,
}

impl PriceUpdate {
    pub fn new(tick: &Tick, bar: Candle) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price: tick.price,
            volume: tick.volume,
            time: tick.time,
            bar,
        }
    }

    pub fn to_json(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|error| BusError::Encode(error.to_string()))
    }
}
