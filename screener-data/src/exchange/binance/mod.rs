use self::{kline::BinanceKline, ticker::parse_mini_tickers};
use crate::{
    candle::Candle,
    error::DataError,
    market::{DEFAULT_MAX_BARS_PER_CALL, MarketData, TickStream},
    streams::TimeoutStream,
    symbol::Symbol,
    timeframe::Timeframe,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

/// REST kline payload & conversion.
pub mod kline;

/// `!miniTicker@arr` live stream payload & conversion.
pub mod ticker;

/// Binance spot REST base url.
pub const BASE_URL_BINANCE_SPOT: &str = "https://api.binance.com";

/// Binance spot all-market mini ticker stream.
pub const WS_URL_BINANCE_MINI_TICKERS: &str = "wss://stream.binance.com:9443/ws/!miniTicker@arr";

/// [`BinanceMarketData`] configuration.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// REST base url
    pub rest_url: String,
    /// Live tick WebSocket url
    pub ws_url: String,
    /// Only markets quoted in this asset are normalised into [`Symbol`]s
    pub quote: String,
    /// Timeout applied to each REST request
    pub request_timeout: Duration,
    /// Idle period after which a silent tick stream is considered dead
    pub read_timeout: Duration,
    /// Maximum bars returned per kline request
    pub max_bars_per_call: usize,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_url: BASE_URL_BINANCE_SPOT.to_string(),
            ws_url: WS_URL_BINANCE_MINI_TICKERS.to_string(),
            quote: "USDT".to_string(),
            request_timeout: Duration::from_secs(10),
            read_timeout: crate::streams::timeout::DEFAULT_READ_TIMEOUT,
            max_bars_per_call: DEFAULT_MAX_BARS_PER_CALL,
        }
    }
}

impl BinanceConfig {
    /// Build from `SCREENER_BINANCE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            rest_url: std::env::var("SCREENER_BINANCE_REST_URL").unwrap_or(default.rest_url),
            ws_url: std::env::var("SCREENER_BINANCE_WS_URL").unwrap_or(default.ws_url),
            quote: std::env::var("SCREENER_QUOTE_ASSET").unwrap_or(default.quote),
            ..default
        }
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// [`MarketData`] implementation backed by Binance spot REST klines & the mini ticker stream.
#[derive(Debug, Clone)]
pub struct BinanceMarketData {
    config: BinanceConfig,
    client: Client,
}

impl BinanceMarketData {
    pub fn new(config: BinanceConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn klines_url(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Url, DataError> {
        let mut url = Url::parse(&format!("{}/api/v3/klines", self.config.rest_url))
            .map_err(|error| DataError::Http(format!("invalid Binance REST url: {error}")))?;

        url.query_pairs_mut()
            .append_pair("symbol", &to_exchange_symbol(symbol))
            .append_pair("interval", timeframe.as_str())
            .append_pair("startTime", &since.timestamp_millis().to_string())
            .append_pair("limit", &limit.to_string());

        Ok(url)
    }
}

impl Default for BinanceMarketData {
    fn default() -> Self {
        Self::new(BinanceConfig::default())
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let limit = limit.clamp(1, self.config.max_bars_per_call);
        let url = self.klines_url(symbol, timeframe, since, limit)?;

        let response = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => {
                return Err(DataError::RateLimited(format!(
                    "klines {symbol}: HTTP {}",
                    response.status()
                )));
            }
            status if !status.is_success() => {
                return Err(DataError::Http(format!("klines {symbol}: HTTP {status}")));
            }
            _ => {}
        }

        let klines = response.json::<Vec<BinanceKline>>().await?;
        let candles = klines
            .into_iter()
            .filter_map(|kline| kline.into_candle(symbol))
            .collect::<Vec<_>>();

        debug!(%symbol, %timeframe, %since, limit, fetched = candles.len(), "fetched Binance klines");
        Ok(candles)
    }

    async fn subscribe_ticks(&self) -> Result<TickStream, DataError> {
        let (websocket, _) = connect_async(self.config.ws_url.as_str()).await?;
        info!(url = %self.config.ws_url, "connected to Binance mini ticker stream");

        let quote = self.config.quote.clone();
        let ticks = websocket
            .filter_map(move |message| {
                let ticks = match message {
                    Ok(Message::Text(text)) => Some(parse_mini_tickers(text.as_str(), &quote)),
                    Ok(Message::Close(frame)) => Some(vec![Err(DataError::Socket(format!(
                        "ConnectionClosed by Binance: {frame:?}"
                    )))]),
                    Ok(_) => None,
                    Err(error) => Some(vec![Err(DataError::from(error))]),
                };
                futures::future::ready(ticks)
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(TimeoutStream::new(ticks, self.config.read_timeout).boxed())
    }

    fn max_bars_per_call(&self) -> usize {
        self.config.max_bars_per_call
    }
}

/// Convert a [`Symbol`] into the Binance market name, eg/ "BTC/USDT" -> "BTCUSDT".
pub fn to_exchange_symbol(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base(), symbol.quote())
}

/// Convert a Binance market name into a [`Symbol`] if it is quoted in `quote`,
/// eg/ ("BTCUSDT", "USDT") -> "BTC/USDT".
pub fn from_exchange_symbol(market: &str, quote: &str) -> Option<Symbol> {
    let base = market.strip_suffix(quote)?;
    Symbol::from_parts(base, quote).ok()
}
