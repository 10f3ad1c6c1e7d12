use crate::snapshot::IndicatorSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use screener_data::{Candle, Symbol, Timeframe};
use thiserror::Error;

/// In-memory stores for tests & single process deployments.
pub mod memory;

/// Postgres / TimescaleDB stores.
pub mod postgres;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("failed to decode stored record: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(value.to_string())
            }
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Time-series store of 1m [`Candle`]s keyed by `(symbol, time)`.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Insert or merge every candle using the [`Candle::merge`] rule. Returns rows written.
    async fn upsert(&self, candles: &[Candle]) -> Result<u64, StoreError>;

    /// Insert candles whose key is absent, never touching existing rows. Returns rows inserted.
    async fn insert_missing(&self, candles: &[Candle]) -> Result<u64, StoreError>;

    /// Candles of `symbol` with `since <= time < until`, ascending.
    async fn range(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;

    /// [`CandleStore::range`] for many symbols at once.
    async fn range_many(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<FnvHashMap<Symbol, Vec<Candle>>, StoreError> {
        let mut candles = FnvHashMap::default();
        for symbol in symbols {
            candles.insert(symbol.clone(), self.range(symbol, since, until).await?);
        }
        Ok(candles)
    }

    /// Present minute timestamps of `symbol` with `since <= time < until`, ascending.
    async fn timestamps(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    async fn latest_time(&self, symbol: &Symbol) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Store side aggregation of `range` into `timeframe` buckets.
    async fn bucketed(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;
}

/// Latest [`IndicatorSnapshot`] per symbol.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Replace the whole row of `snapshot.symbol`.
    async fn put(&self, snapshot: &IndicatorSnapshot) -> Result<(), StoreError>;

    async fn get(&self, symbol: &Symbol) -> Result<Option<IndicatorSnapshot>, StoreError>;
}

/// Read-only view of the externally owned active symbol universe.
#[async_trait]
pub trait SymbolRegistry: Send + Sync {
    async fn active_symbols(&self) -> Result<Vec<Symbol>, StoreError>;
}

/// Pre-merge candles sharing a `(symbol, time)` key so one batch holds one row per key.
///
/// First occurrence order is preserved.
pub fn coalesce(candles: &[Candle]) -> Vec<Candle> {
    let mut index = FnvHashMap::<(&Symbol, DateTime<Utc>), usize>::default();
    let mut merged = Vec::<Candle>::with_capacity(candles.len());

    for candle in candles {
        match index.get(&candle.key()).copied() {
            Some(position) => merged[position].merge(candle),
            None => {
                index.insert(candle.key(), merged.len());
                merged.push(candle.clone());
            }
        }
    }

    merged
}
