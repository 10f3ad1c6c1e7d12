//! The batch & stateful paths produce the same indicators from the same 1m history.

use chrono::{TimeDelta, Utc};
use screener_data::{Candle, Symbol, Tick, Timeframe, timeframe::minute_floor};
use screener_engine::{
    bus::PriceUpdate,
    config::{ComputeConfig, ShardConfig, WorkerConfig},
    context::MarketContext,
    queue::memory::MemoryWorkQueue,
    resample::Bar,
    shard::Shard,
    snapshot::compute,
    store::{
        CandleStore, StatusStore,
        memory::{MemoryCandleStore, MemoryStatusStore},
    },
    worker::BatchWorker,
};
use std::sync::Arc;

fn history(symbol: &Symbol, minutes: i64) -> Vec<Candle> {
    let end = minute_floor(Utc::now());
    (1..=minutes)
        .rev()
        .map(|offset| {
            let step = (minutes - offset) as f64;
            let close = 250.0 + (step * 0.07).sin() * 4.0 + step * 0.02;
            Candle::new(
                symbol.clone(),
                end - TimeDelta::minutes(offset),
                close - 0.3,
                close + 0.8,
                close - 0.9,
                close,
                20.0 + (step as usize % 11) as f64,
            )
            .unwrap()
        })
        .collect()
}

fn compute_config() -> ComputeConfig {
    ComputeConfig::default().with_timeframes([Timeframe::M1, Timeframe::M5, Timeframe::H1])
}

#[test]
fn test_compute_is_deterministic() {
    let btc = Symbol::new("BTC/USDT").unwrap();
    let bars = history(&btc, 400).iter().map(Bar::from).collect::<Vec<_>>();
    let now = Utc::now();

    let first = compute(&btc, &bars, None, &compute_config(), now).unwrap();
    let second = compute(&btc, &bars, None, &compute_config(), now).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.computed, vec![Timeframe::M1, Timeframe::M5]);
    assert_eq!(first.skipped, vec![Timeframe::H1]);
}

#[tokio::test]
async fn test_batch_and_shard_paths_agree() {
    let btc = Symbol::new("BTC/USDT").unwrap();
    let candles = Arc::new(MemoryCandleStore::new());
    let seeded = history(&btc, 400);
    candles.upsert(&seeded).await.unwrap();

    // Batch path
    let batch_status = Arc::new(MemoryStatusStore::new());
    let worker = BatchWorker::new(
        "worker-0",
        Arc::new(MemoryWorkQueue::default()),
        candles.clone(),
        batch_status.clone(),
        WorkerConfig::default().with_compute(compute_config()),
    );
    worker.process(&btc).await.unwrap();
    let batch = batch_status.get(&btc).await.unwrap().unwrap();

    // Stateful path: warm up, then replay the last stored minute unchanged
    let shard_status = Arc::new(MemoryStatusStore::new());
    let mut shard = Shard::new(
        0,
        [btc.clone()],
        candles.clone(),
        shard_status.clone(),
        Arc::new(MarketContext::new()),
        ShardConfig::default().with_compute(compute_config()),
    );
    assert_eq!(shard.warm_up().await.unwrap(), 400);

    let last = seeded.last().unwrap().clone();
    let tick = Tick::new(btc.clone(), last.close, last.volume, last.time).unwrap();
    shard.on_update(&PriceUpdate::new(&tick, last));
    assert_eq!(shard.flush(Utc::now()).await.written, 1);
    let stateful = shard_status.get(&btc).await.unwrap().unwrap();

    assert_eq!(batch.current_price, stateful.current_price);
    assert_eq!(batch.timeframes, stateful.timeframes);
    assert!(batch.timeframe(Timeframe::M5).is_some());
}
