use crate::{candle::Candle, error::DataError, symbol::Symbol, tick::Tick, timeframe::Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

/// Live stream of [`Tick`]s. The stream ending signals the subscription must be re-established.
pub type TickStream = BoxStream<'static, Result<Tick, DataError>>;

/// Default maximum number of bars a provider returns from a single history request.
pub const DEFAULT_MAX_BARS_PER_CALL: usize = 1000;

/// Abstract market data provider used by the ingestion and backfill paths.
///
/// Implementations are rate limited, so callers are expected to pace and batch requests.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch up to `limit` historical [`Candle`]s of `timeframe` starting at `since`, ordered
    /// ascending by time.
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError>;

    /// Open a live [`TickStream`] covering every symbol the provider publishes.
    async fn subscribe_ticks(&self) -> Result<TickStream, DataError>;

    /// Maximum number of bars [`MarketData::fetch_history`] will return per call.
    fn max_bars_per_call(&self) -> usize {
        DEFAULT_MAX_BARS_PER_CALL
    }
}
