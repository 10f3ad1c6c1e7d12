//! Gap detection & repair against a provider serving the missing minutes.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use screener_data::{Candle, DataError, MarketData, Symbol, TickStream, Timeframe, timeframe::minute_floor};
use screener_engine::{
    backfill::{BackfillEngine, Gap, detect_gaps},
    config::BackfillConfig,
    store::{CandleStore, memory::{MemoryCandleStore, MemorySymbolRegistry}},
};
use std::{sync::Arc, time::Duration};

/// Provider returning contiguous bars priced at 1.0, recording every request.
#[derive(Default)]
struct RecordingMarket {
    requests: Mutex<Vec<(DateTime<Utc>, usize)>>,
}

#[async_trait]
impl MarketData for RecordingMarket {
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        _: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        self.requests.lock().push((since, limit));
        (0..limit as i64)
            .map(|offset| {
                let time = since + TimeDelta::minutes(offset);
                Candle::new(symbol.clone(), time, 1.0, 1.0, 1.0, 1.0, 1.0)
            })
            .collect()
    }

    async fn subscribe_ticks(&self) -> Result<TickStream, DataError> {
        Err(DataError::Socket("unsupported".to_string()))
    }
}

#[tokio::test]
async fn test_interior_gap_is_filled_exactly() {
    let btc = Symbol::new("BTC/USDT").unwrap();
    let base = minute_floor(Utc::now()) - TimeDelta::minutes(6);
    let minute = |offset: i64| base + TimeDelta::minutes(offset);

    let store = Arc::new(MemoryCandleStore::new());
    let present = [0, 1, 2, 5, 6]
        .into_iter()
        .map(|offset| {
            let price = 100.0 + offset as f64;
            Candle::new(btc.clone(), minute(offset), price, price, price, price, 10.0).unwrap()
        })
        .collect::<Vec<_>>();
    store.upsert(&present).await.unwrap();

    let timestamps = store.timestamps(&btc, minute(0), minute(7)).await.unwrap();
    assert_eq!(
        detect_gaps(&btc, &timestamps),
        vec![Gap::new(btc.clone(), minute(3), minute(5))]
    );

    let market = Arc::new(RecordingMarket::default());
    let engine = BackfillEngine::new(
        market.clone(),
        store.clone(),
        Arc::new(MemorySymbolRegistry::new([btc.clone()])),
        BackfillConfig::default().with_request_delay(Duration::ZERO),
    );
    let report = engine.repair_symbol(&btc).await.unwrap();

    assert_eq!(report.gaps, 1);
    assert_eq!(report.missing_minutes, 2);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.inserted, 0);
    assert_eq!(market.requests.lock().clone(), vec![(minute(3), 2)]);

    // Exactly rows 3 & 4 were added, existing rows unchanged
    assert_eq!(store.len(&btc), 7);
    for offset in [3, 4] {
        assert_eq!(store.get(&btc, minute(offset)).map(|candle| candle.close), Some(1.0));
    }
    for offset in [0, 1, 2, 5, 6] {
        let expected = 100.0 + offset as f64;
        assert_eq!(store.get(&btc, minute(offset)).map(|candle| candle.close), Some(expected));
    }

    // Complete history: a second pass has nothing to do
    let timestamps = store.timestamps(&btc, minute(0), minute(7)).await.unwrap();
    assert!(detect_gaps(&btc, &timestamps).is_empty());
}

#[tokio::test]
async fn test_run_cycle_isolates_failing_symbols() {
    /// Provider failing every request for one symbol.
    struct PartialMarket {
        inner: RecordingMarket,
        broken: Symbol,
    }

    #[async_trait]
    impl MarketData for PartialMarket {
        async fn fetch_history(
            &self,
            symbol: &Symbol,
            timeframe: Timeframe,
            since: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Candle>, DataError> {
            if *symbol == self.broken {
                return Err(DataError::Http("503 Service Unavailable".to_string()));
            }
            self.inner.fetch_history(symbol, timeframe, since, limit).await
        }

        async fn subscribe_ticks(&self) -> Result<TickStream, DataError> {
            self.inner.subscribe_ticks().await
        }
    }

    let btc = Symbol::new("BTC/USDT").unwrap();
    let eth = Symbol::new("ETH/USDT").unwrap();
    let store = Arc::new(MemoryCandleStore::new());
    let engine = BackfillEngine::new(
        Arc::new(PartialMarket {
            inner: RecordingMarket::default(),
            broken: eth.clone(),
        }),
        store.clone(),
        Arc::new(MemorySymbolRegistry::new([btc.clone(), eth.clone()])),
        BackfillConfig::default()
            .with_request_delay(Duration::ZERO)
            .with_cold_start(Duration::from_secs(60 * 60)),
    );

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.symbols, 2);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(store.len(&btc), 60);
    assert_eq!(store.len(&eth), 0);
}
