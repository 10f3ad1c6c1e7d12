use crate::{
    config::{WorkerConfig, time_delta},
    context::Shutdown,
    error::EngineError,
    queue::{Delivery, QueueError, WorkQueue},
    resample::Bar,
    snapshot::{Computed, compute},
    store::{CandleStore, StatusStore},
};
use chrono::Utc;
use screener_data::{Symbol, streams::ExponentialBackoff};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Point in time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub acked: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Counters shared by the workers of a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    acked: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// How a [`Delivery`] was concluded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    /// Snapshot persisted & task acknowledged.
    Completed,
    /// Task acknowledged without a new snapshot (eg/ no history yet).
    Skipped,
    /// Task left unacknowledged for redelivery.
    Retry,
}

/// Queue consumer recomputing the [`IndicatorSnapshot`](crate::snapshot::IndicatorSnapshot) of
/// each delivered symbol.
pub struct BatchWorker {
    consumer: String,
    queue: Arc<dyn WorkQueue>,
    candles: Arc<dyn CandleStore>,
    status: Arc<dyn StatusStore>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl std::fmt::Debug for BatchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWorker")
            .field("consumer", &self.consumer)
            .field("config", &self.config)
            .finish()
    }
}

impl BatchWorker {
    pub fn new(
        consumer: impl Into<String>,
        queue: Arc<dyn WorkQueue>,
        candles: Arc<dyn CandleStore>,
        status: Arc<dyn StatusStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            consumer: consumer.into(),
            queue,
            candles,
            status,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Recompute & persist the snapshot of `symbol` from its stored 1m history.
    pub async fn process(&self, symbol: &Symbol) -> Result<Computed, EngineError> {
        let now = Utc::now();
        let since = now - time_delta(self.config.lookback);

        let candles = self.candles.range(symbol, since, now).await?;
        if candles.is_empty() {
            return Err(EngineError::insufficient(symbol, "no stored candles in lookback"));
        }
        let bars = candles.iter().map(Bar::from).collect::<Vec<_>>();

        let previous = self.status.get(symbol).await?;
        let computed = compute(symbol, &bars, previous.as_ref(), &self.config.compute, now)?;

        self.status
            .put(&computed.snapshot)
            .await
            .map_err(EngineError::persist)?;

        Ok(computed)
    }

    /// Process one delivery & apply the acknowledgement policy.
    pub async fn handle(&self, delivery: &Delivery) -> Outcome {
        let symbol = &delivery.task.symbol;
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.process(symbol).await {
            Ok(computed) => {
                debug!(
                    consumer = %self.consumer,
                    %symbol,
                    computed = computed.computed.len(),
                    skipped = computed.skipped.len(),
                    "computed indicator snapshot"
                );
                Outcome::Completed
            }
            Err(error) if error.should_ack() => {
                debug!(consumer = %self.consumer, %symbol, %error, "skipping symbol");
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                Outcome::Skipped
            }
            Err(error) => {
                warn!(
                    consumer = %self.consumer,
                    %symbol,
                    %error,
                    delivery_count = delivery.delivery_count,
                    "failed to process task, leaving for redelivery"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Outcome::Retry;
            }
        };

        match self.queue.ack(&self.config.group, &delivery.id).await {
            Ok(()) => {
                self.stats.acked.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Err(error) => {
                warn!(consumer = %self.consumer, %symbol, %error, "failed to acknowledge task");
                Outcome::Retry
            }
        }
    }

    /// Read & handle at most one delivery, returning the number handled.
    ///
    /// A missing consumer group is recreated lazily and the read retried once.
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        let deliveries = match self.read().await {
            Err(QueueError::GroupMissing(group)) => {
                info!(consumer = %self.consumer, %group, "recreating missing consumer group");
                self.queue.ensure_group(&group).await?;
                self.read().await?
            }
            other => other?,
        };

        for delivery in &deliveries {
            self.handle(delivery).await;
        }

        Ok(deliveries.len())
    }

    async fn read(&self) -> Result<Vec<Delivery>, QueueError> {
        self.queue
            .read(&self.config.group, &self.consumer, self.config.block, 1)
            .await
    }

    /// Consume tasks until shutdown. The shutdown signal is checked after every bounded read,
    /// so an in-flight task always completes.
    pub async fn run(self, shutdown: Shutdown) {
        info!(consumer = %self.consumer, group = %self.config.group, "batch worker started");

        let mut backoff = ExponentialBackoff::new(
            self.config.error_backoff_initial,
            self.config.error_backoff_max,
        );

        while !shutdown.is_triggered() {
            match self.poll_once().await {
                Ok(_) => backoff.reset(),
                Err(error) => {
                    let delay = backoff.next_delay();
                    error!(consumer = %self.consumer, %error, ?delay, "work queue read failed");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            consumer = %self.consumer,
            processed = stats.processed,
            acked = stats.acked,
            failed = stats.failed,
            skipped = stats.skipped,
            "batch worker stopped"
        );
    }
}

/// Spawns [`BatchWorker`]s onto a shared [`JoinSet`].
#[derive(Debug)]
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(workers: impl IntoIterator<Item = BatchWorker>, shutdown: &Shutdown) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker in workers {
            set.spawn(worker.run(shutdown.clone()));
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        queue::{Task, memory::MemoryWorkQueue},
        store::{
            StoreError,
            memory::{MemoryCandleStore, MemoryStatusStore},
        },
        snapshot::IndicatorSnapshot,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta};
    use screener_data::Candle;
    use std::time::Duration;

    const GROUP: &str = "indicator_workers";

    /// Status store rejecting every write.
    struct FailingStatusStore;

    #[async_trait]
    impl StatusStore for FailingStatusStore {
        async fn put(&self, _: &IndicatorSnapshot) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn get(&self, _: &Symbol) -> Result<Option<IndicatorSnapshot>, StoreError> {
            Ok(None)
        }
    }

    fn btc() -> Symbol {
        Symbol::new("BTC/USDT").unwrap()
    }

    fn history(symbol: &Symbol, minutes: i64, end: DateTime<Utc>) -> Vec<Candle> {
        let start = screener_data::timeframe::minute_floor(end) - TimeDelta::minutes(minutes);
        (0..minutes)
            .map(|minute| {
                let close = 100.0 + (minute as f64 * 0.05).sin();
                Candle::new(
                    symbol.clone(),
                    start + TimeDelta::minutes(minute),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    5.0,
                )
                .unwrap()
            })
            .collect()
    }

    async fn setup(
        candles: &[Candle],
        status: Arc<dyn StatusStore>,
    ) -> (Arc<MemoryWorkQueue>, BatchWorker) {
        let queue = Arc::new(MemoryWorkQueue::new(Duration::from_millis(50)));
        queue.ensure_group(GROUP).await.unwrap();
        queue.publish(&Task::new(btc(), 1, Utc::now())).await.unwrap();

        let store = Arc::new(MemoryCandleStore::new());
        store.upsert(candles).await.unwrap();

        let worker = BatchWorker::new(
            "worker-0",
            queue.clone(),
            store,
            status,
            WorkerConfig::default().with_block(Duration::ZERO),
        );
        (queue, worker)
    }

    #[tokio::test]
    async fn test_completed_task_is_acked_and_persisted() {
        let status = Arc::new(MemoryStatusStore::new());
        let (queue, worker) = setup(&history(&btc(), 120, Utc::now()), status.clone()).await;

        assert_eq!(worker.poll_once().await.unwrap(), 1);
        assert_eq!(queue.len().await.unwrap(), 0);

        let snapshot = status.get(&btc()).await.unwrap().unwrap();
        assert!(snapshot.timeframe(screener_data::Timeframe::M1).is_some());
        assert_eq!(
            worker.stats().snapshot(),
            WorkerStatsSnapshot {
                processed: 1,
                acked: 1,
                failed: 0,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_history_is_acked_without_write() {
        let status = Arc::new(MemoryStatusStore::new());
        let (queue, worker) = setup(&[], status.clone()).await;

        worker.poll_once().await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(status.writes(), 0);
        assert_eq!(worker.stats().snapshot().skipped, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_task_for_redelivery() {
        let (queue, worker) =
            setup(&history(&btc(), 120, Utc::now()), Arc::new(FailingStatusStore)).await;

        worker.poll_once().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.pending(GROUP), 1);
        assert_eq!(worker.stats().snapshot().failed, 1);

        // Redelivered after the visibility timeout
        tokio::time::sleep(Duration::from_millis(80)).await;
        let redelivered = queue.read(GROUP, "worker-1", Duration::ZERO, 1).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_poll_recreates_missing_group() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let worker = BatchWorker::new(
            "worker-0",
            queue.clone(),
            Arc::new(MemoryCandleStore::new()),
            Arc::new(MemoryStatusStore::new()),
            WorkerConfig::default().with_block(Duration::ZERO),
        );

        assert_eq!(worker.poll_once().await.unwrap(), 0);
        assert_eq!(queue.pending(GROUP), 0);
        queue.publish(&Task::new(btc(), 1, Utc::now())).await.unwrap();
        assert_eq!(worker.poll_once().await.unwrap(), 1);
    }
}
