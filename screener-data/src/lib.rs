#![forbid(unsafe_code)]
#![warn(unused, rust_2018_idioms)]

//! # Screener-Data
//! Normalised market data model and integrations for the screener pipeline.
//!
//! **It is:**
//! * **Normalised**: [`Candle`], [`Tick`], [`Symbol`] and [`Timeframe`] are validated at
//!   construction, so downstream components never see malformed records.
//! * **Pluggable**: exchanges are reached through the [`MarketData`] trait. A Binance spot
//!   implementation ([`BinanceMarketData`](exchange::binance::BinanceMarketData)) is included.
//! * **Robust**: live streams are wrapped in an idle [`TimeoutStream`](streams::TimeoutStream) and
//!   reconnected with an [`ExponentialBackoff`](streams::ExponentialBackoff).
//!
//! ## Candle Merge Rule
//! Exactly one [`Candle`] exists per `(symbol, minute)`. Repeated writes merge with
//! [`Candle::merge`]: high widens, low widens, close and volume take the newer value.

/// Validated OHLCV bar & the merge rule applied to repeated writes.
pub mod candle;

/// Custom serde deserializers used by exchange payloads.
pub mod de;

/// All [`Error`](std::error::Error)s generated in Screener-Data.
pub mod error;

/// Exchange specific [`MarketData`] implementations.
pub mod exchange;

/// Abstract market data provider interface.
pub mod market;

/// Stream utilities for long-running live subscriptions.
pub mod streams;

/// Normalised `BASE/QUOTE` identifier.
pub mod symbol;

/// Live price update.
pub mod tick;

/// Resampling bucket widths.
pub mod timeframe;

pub use candle::Candle;
pub use error::DataError;
pub use market::{MarketData, TickStream};
pub use symbol::Symbol;
pub use tick::Tick;
pub use timeframe::Timeframe;
