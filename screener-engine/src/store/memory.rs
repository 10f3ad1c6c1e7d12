use super::{CandleStore, StatusStore, StoreError, SymbolRegistry};
use crate::{
    resample::{Bar, resample},
    snapshot::IndicatorSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use screener_data::{Candle, Symbol, Timeframe};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicU64, Ordering},
};

type Series = BTreeMap<DateTime<Utc>, Candle>;

/// [`CandleStore`] holding an ordered series per symbol.
#[derive(Debug, Default)]
pub struct MemoryCandleStore {
    series: RwLock<FnvHashMap<Symbol, Series>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &Symbol, time: DateTime<Utc>) -> Option<Candle> {
        self.series.read().get(symbol)?.get(&time).cloned()
    }

    /// Number of rows stored for `symbol`.
    pub fn len(&self, symbol: &Symbol) -> usize {
        self.series.read().get(symbol).map_or(0, BTreeMap::len)
    }

    pub fn total_rows(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    fn window(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<Candle> {
        if since >= until {
            return Vec::new();
        }

        self.series
            .read()
            .get(symbol)
            .map(|series| series.range(since..until).map(|(_, candle)| candle.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn upsert(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        let mut series = self.series.write();
        for candle in candles {
            series
                .entry(candle.symbol.clone())
                .or_default()
                .entry(candle.time)
                .and_modify(|existing| existing.merge(candle))
                .or_insert_with(|| candle.clone());
        }
        Ok(candles.len() as u64)
    }

    async fn insert_missing(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        let mut series = self.series.write();
        let mut inserted = 0;
        for candle in candles {
            let rows = series.entry(candle.symbol.clone()).or_default();
            if !rows.contains_key(&candle.time) {
                rows.insert(candle.time, candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn range(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        Ok(self.window(symbol, since, until))
    }

    async fn timestamps(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        if since >= until {
            return Ok(Vec::new());
        }

        Ok(self
            .series
            .read()
            .get(symbol)
            .map(|series| series.range(since..until).map(|(time, _)| *time).collect())
            .unwrap_or_default())
    }

    async fn latest_time(&self, symbol: &Symbol) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .series
            .read()
            .get(symbol)
            .and_then(|series| series.keys().next_back().copied()))
    }

    async fn bucketed(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let bars = self
            .window(symbol, since, until)
            .iter()
            .map(Bar::from)
            .collect::<Vec<_>>();

        Ok(resample(&bars, timeframe)
            .into_iter()
            .map(|bar| Candle {
                symbol: symbol.clone(),
                time: bar.time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
            .collect())
    }
}

/// [`StatusStore`] keeping the latest snapshot per symbol.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    rows: RwLock<FnvHashMap<Symbol, IndicatorSnapshot>>,
    writes: AtomicU64,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of successful [`StatusStore::put`] calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn put(&self, snapshot: &IndicatorSnapshot) -> Result<(), StoreError> {
        self.rows
            .write()
            .insert(snapshot.symbol.clone(), snapshot.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, symbol: &Symbol) -> Result<Option<IndicatorSnapshot>, StoreError> {
        Ok(self.rows.read().get(symbol).cloned())
    }
}

/// [`SymbolRegistry`] over a mutable in-memory set of active symbols.
#[derive(Debug, Default)]
pub struct MemorySymbolRegistry {
    active: RwLock<BTreeSet<Symbol>>,
}

impl MemorySymbolRegistry {
    pub fn new(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            active: RwLock::new(symbols.into_iter().collect()),
        }
    }

    pub fn activate(&self, symbol: Symbol) {
        self.active.write().insert(symbol);
    }

    pub fn deactivate(&self, symbol: &Symbol) {
        self.active.write().remove(symbol);
    }
}

#[async_trait]
impl SymbolRegistry for MemorySymbolRegistry {
    async fn active_symbols(&self) -> Result<Vec<Symbol>, StoreError> {
        Ok(self.active.read().iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minute)
    }

    fn candle(minute: i64, values: (f64, f64, f64, f64, f64)) -> Candle {
        let (open, high, low, close, volume) = values;
        Candle::new(
            Symbol::new("BTC/USDT").unwrap(),
            t(minute),
            open,
            high,
            low,
            close,
            volume,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_merge_rule() {
        let store = MemoryCandleStore::new();
        let first = candle(0, (100.0, 105.0, 99.0, 102.0, 10.0));
        let second = candle(0, (101.0, 103.0, 98.0, 104.0, 12.0));

        store.upsert(&[first]).await.unwrap();
        store.upsert(&[second.clone()]).await.unwrap();

        let symbol = Symbol::new("BTC/USDT").unwrap();
        let expected = candle(0, (100.0, 105.0, 98.0, 104.0, 12.0));
        assert_eq!(store.get(&symbol, t(0)), Some(expected.clone()));
        assert_eq!(store.len(&symbol), 1);

        // Idempotent
        store.upsert(&[second]).await.unwrap();
        assert_eq!(store.get(&symbol, t(0)), Some(expected));
    }

    #[tokio::test]
    async fn test_insert_missing_never_touches_existing() {
        let store = MemoryCandleStore::new();
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let existing = candle(0, (100.0, 105.0, 99.0, 102.0, 10.0));
        store.upsert(&[existing.clone()]).await.unwrap();

        let inserted = store
            .insert_missing(&[
                candle(0, (1.0, 1.0, 1.0, 1.0, 1.0)),
                candle(1, (1.0, 1.0, 1.0, 1.0, 1.0)),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.get(&symbol, t(0)), Some(existing));
        assert_eq!(store.len(&symbol), 2);
    }

    #[tokio::test]
    async fn test_range_timestamps_latest() {
        let store = MemoryCandleStore::new();
        let symbol = Symbol::new("BTC/USDT").unwrap();
        let rows = [3, 0, 1, 2]
            .into_iter()
            .map(|minute| candle(minute, (10.0, 11.0, 9.0, 10.0, 1.0)))
            .collect::<Vec<_>>();
        store.upsert(&rows).await.unwrap();

        let range = store.range(&symbol, t(1), t(3)).await.unwrap();
        assert_eq!(range.iter().map(|c| c.time).collect::<Vec<_>>(), vec![t(1), t(2)]);

        let timestamps = store.timestamps(&symbol, t(0), t(10)).await.unwrap();
        assert_eq!(timestamps, vec![t(0), t(1), t(2), t(3)]);

        assert_eq!(store.latest_time(&symbol).await.unwrap(), Some(t(3)));

        let other = Symbol::new("ETH/USDT").unwrap();
        assert_eq!(store.latest_time(&other).await.unwrap(), None);
        assert!(store.range(&other, t(0), t(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bucketed() {
        let store = MemoryCandleStore::new();
        let symbol = Symbol::new("BTC/USDT").unwrap();
        store
            .upsert(&[
                candle(0, (10.0, 12.0, 9.0, 11.0, 1.0)),
                candle(4, (11.0, 15.0, 10.0, 14.0, 2.0)),
                candle(5, (14.0, 14.0, 13.0, 13.5, 3.0)),
            ])
            .await
            .unwrap();

        let buckets = store
            .bucketed(&symbol, Timeframe::M5, t(0), t(10))
            .await
            .unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(
            (buckets[0].open, buckets[0].high, buckets[0].low, buckets[0].close, buckets[0].volume),
            (10.0, 15.0, 9.0, 14.0, 3.0)
        );
        assert_eq!(buckets[1].time, t(5));
    }

    #[tokio::test]
    async fn test_symbol_registry() {
        let btc = Symbol::new("BTC/USDT").unwrap();
        let eth = Symbol::new("ETH/USDT").unwrap();
        let registry = MemorySymbolRegistry::new([eth.clone(), btc.clone()]);

        assert_eq!(registry.active_symbols().await.unwrap(), vec![btc.clone(), eth.clone()]);

        registry.deactivate(&btc);
        assert_eq!(registry.active_symbols().await.unwrap(), vec![eth]);
    }
}
