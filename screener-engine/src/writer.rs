use crate::{
    config::WriterConfig,
    context::Shutdown,
    store::{CandleStore, coalesce},
};
use screener_data::Candle;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, error, info};

/// Point in time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct WriterStatsSnapshot {
    pub batches: u64,
    pub rows: u64,
    pub dropped_batches: u64,
}

#[derive(Debug, Default)]
pub struct WriterStats {
    batches: AtomicU64,
    rows: AtomicU64,
    dropped_batches: AtomicU64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

/// Buffers candles from the streamer & persists them in batches.
pub struct StorageWriter {
    store: Arc<dyn CandleStore>,
    config: WriterConfig,
    stats: Arc<WriterStats>,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter")
            .field("config", &self.config)
            .finish()
    }
}

impl StorageWriter {
    pub fn new(store: Arc<dyn CandleStore>, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(WriterStats::default()),
        }
    }

    /// Bounded channel feeding a [`StorageWriter`].
    pub fn channel(capacity: usize) -> (mpsc::Sender<Candle>, mpsc::Receiver<Candle>) {
        mpsc::channel(capacity.max(1))
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Persist one batch, pre-merging records that share a key. Failed batches are dropped.
    pub async fn flush(&self, batch: &mut Vec<Candle>) {
        if batch.is_empty() {
            return;
        }

        let rows = coalesce(batch);
        batch.clear();

        match self.store.upsert(&rows).await {
            Ok(written) => {
                debug!(rows = written, "flushed candle batch");
                self.stats.batches.fetch_add(1, Ordering::Relaxed);
                self.stats.rows.fetch_add(rows.len() as u64, Ordering::Relaxed);
            }
            Err(error) => {
                error!(%error, rows = rows.len(), "failed to persist candle batch, dropping");
                self.stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drain `rx`, flushing when the batch reaches `batch_size` or `flush_interval` elapses.
    ///
    /// Runs a final flush on shutdown or once every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<Candle>, shutdown: Shutdown) {
        info!(
            batch_size = self.config.batch_size,
            flush_interval = ?self.config.flush_interval,
            "storage writer started"
        );

        let mut batch = Vec::with_capacity(self.config.batch_size);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.flush(&mut batch).await,
                candle = rx.recv() => match candle {
                    Some(candle) => {
                        batch.push(candle);
                        if batch.len() >= self.config.batch_size {
                            self.flush(&mut batch).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },
            }
        }

        // Drain whatever is already buffered
        while let Ok(candle) = rx.try_recv() {
            batch.push(candle);
        }
        self.flush(&mut batch).await;

        let stats = self.stats.snapshot();
        info!(
            batches = stats.batches,
            rows = stats.rows,
            dropped_batches = stats.dropped_batches,
            "storage writer stopped"
        );
    }
}
