use crate::{
    bus::{FanOut, PriceUpdate},
    config::{ShardConfig, time_delta},
    context::{MarketContext, Shutdown},
    error::EngineError,
    resample::Bar,
    snapshot::{IndicatorSnapshot, compute},
    store::{CandleStore, StatusStore},
};
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use futures::StreamExt;
use itertools::Itertools;
use screener_data::{Symbol, Tick, streams::ExponentialBackoff};
use std::sync::Arc;
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bounded in-memory 1m bar buffer.
pub mod buffer;

pub use buffer::{Applied, BarBuffer};

/// Statically partition `symbols` into `shards` disjoint sets covering every symbol.
///
/// Symbols are sorted & deduplicated then dealt round-robin, so the assignment only depends on
/// the symbol set.
pub fn partition(symbols: &[Symbol], shards: usize) -> Vec<Vec<Symbol>> {
    let shards = shards.max(1);
    let mut partitions = vec![Vec::new(); shards];

    symbols
        .iter()
        .sorted()
        .dedup()
        .enumerate()
        .for_each(|(index, symbol)| partitions[index % shards].push(symbol.clone()));

    partitions
}

/// One shard per available core minus one for the rest of the process, capped at 8.
pub fn default_shard_count() -> usize {
    let cores = std::thread::available_parallelism().map_or(2, |cores| cores.get());
    cores.saturating_sub(1).clamp(1, 8)
}

/// Outcome of one [`Shard::flush`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct FlushReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Last snapshot of a symbol & when it was last read from the Status Store.
#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: IndicatorSnapshot,
    loaded_at: DateTime<Utc>,
}

/// Stateful worker owning a fixed subset of symbols.
///
/// Keeps a [`BarBuffer`] per owned symbol updated from live [`PriceUpdate`]s and writes at most
/// one snapshot per dirty symbol each flush window.
pub struct Shard {
    id: usize,
    owned: FnvHashSet<Symbol>,
    buffers: FnvHashMap<Symbol, BarBuffer>,
    snapshots: FnvHashMap<Symbol, CachedSnapshot>,
    dirty: FnvHashSet<Symbol>,
    candles: Arc<dyn CandleStore>,
    status: Arc<dyn StatusStore>,
    context: Arc<MarketContext>,
    config: ShardConfig,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("owned", &self.owned.len())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

impl Shard {
    pub fn new(
        id: usize,
        symbols: impl IntoIterator<Item = Symbol>,
        candles: Arc<dyn CandleStore>,
        status: Arc<dyn StatusStore>,
        context: Arc<MarketContext>,
        config: ShardConfig,
    ) -> Self {
        let owned = symbols.into_iter().collect::<FnvHashSet<_>>();
        let buffers = owned
            .iter()
            .map(|symbol| (symbol.clone(), BarBuffer::new(config.buffer_capacity)))
            .collect();

        Self {
            id,
            owned,
            buffers,
            snapshots: FnvHashMap::default(),
            dirty: FnvHashSet::default(),
            candles,
            status,
            context,
            config,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn owns(&self, symbol: &Symbol) -> bool {
        self.owned.contains(symbol)
    }

    pub fn buffer(&self, symbol: &Symbol) -> Option<&BarBuffer> {
        self.buffers.get(symbol)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Load the warm-up window of stored history into the buffers, a batch of symbols at a
    /// time. Returns the number of bars loaded.
    pub async fn warm_up(&mut self) -> Result<usize, EngineError> {
        let until = Utc::now();
        let since = until - time_delta(self.config.warmup);
        let symbols = self.owned.iter().cloned().sorted().collect::<Vec<_>>();

        let mut loaded = 0;
        for batch in symbols.chunks(self.config.warmup_batch.max(1)) {
            let history = self.candles.range_many(batch, since, until).await?;
            for (symbol, candles) in history {
                let Some(buffer) = self.buffers.get_mut(&symbol) else {
                    continue;
                };
                loaded += candles.len();
                buffer.extend_history(candles.iter().map(Bar::from));
            }
        }

        info!(shard = self.id, symbols = symbols.len(), bars = loaded, "shard warmed up");
        Ok(loaded)
    }

    /// Apply a live update. Returns `None` for symbols owned by another shard.
    pub fn on_update(&mut self, update: &PriceUpdate) -> Option<Applied> {
        let buffer = self.buffers.get_mut(&update.symbol)?;

        self.context.record(&Tick {
            symbol: update.symbol.clone(),
            price: update.price,
            volume: update.volume,
            time: update.time,
        });

        let applied = buffer.apply(Bar::from(&update.bar));
        if applied != Applied::Ignored {
            self.dirty.insert(update.symbol.clone());
        }
        Some(applied)
    }

    /// Decode a fan-out payload & apply it. Malformed payloads are logged and skipped.
    pub fn on_message(&mut self, payload: &str) -> Option<Applied> {
        match serde_json::from_str::<PriceUpdate>(payload) {
            Ok(update) => self.on_update(&update),
            Err(error) => {
                warn!(shard = self.id, %error, "skipping malformed price update");
                None
            }
        }
    }

    /// True when the cached snapshot of `symbol` is missing or older than the refresh age.
    fn needs_refresh(&self, symbol: &Symbol, now: DateTime<Utc>) -> bool {
        self.snapshots.get(symbol).is_none_or(|cached| {
            now - cached.loaded_at >= time_delta(self.config.snapshot_refresh)
        })
    }

    /// Recompute & persist the snapshot of every dirty symbol.
    ///
    /// The stored snapshot of a symbol is (re)loaded on its first flush & once the cached copy
    /// is older than `snapshot_refresh`, so timeframes this shard cannot recompute keep the
    /// values written by the batch path. Symbols whose load or write failed stay dirty for the
    /// next window.
    pub async fn flush(&mut self, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();
        let dirty = std::mem::take(&mut self.dirty);

        for symbol in dirty.into_iter().sorted() {
            if self.needs_refresh(&symbol, now) {
                match self.status.get(&symbol).await {
                    Ok(Some(snapshot)) => {
                        self.snapshots.insert(
                            symbol.clone(),
                            CachedSnapshot {
                                snapshot,
                                loaded_at: now,
                            },
                        );
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(shard = self.id, %symbol, %error, "failed to load stored snapshot");
                        self.dirty.insert(symbol);
                        report.failed += 1;
                        continue;
                    }
                }
            }

            let Some(buffer) = self.buffers.get_mut(&symbol) else {
                continue;
            };

            let computed = match compute(
                &symbol,
                buffer.as_slice(),
                self.snapshots.get(&symbol).map(|cached| &cached.snapshot),
                &self.config.compute,
                now,
            ) {
                Ok(computed) => computed,
                Err(error) => {
                    debug!(shard = self.id, %symbol, %error, "skipping symbol");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.status.put(&computed.snapshot).await {
                Ok(()) => {
                    let loaded_at = self
                        .snapshots
                        .get(&symbol)
                        .map_or(now, |cached| cached.loaded_at);
                    self.snapshots.insert(
                        symbol,
                        CachedSnapshot {
                            snapshot: computed.snapshot,
                            loaded_at,
                        },
                    );
                    report.written += 1;
                }
                Err(error) => {
                    warn!(shard = self.id, %symbol, %error, "failed to persist snapshot");
                    self.dirty.insert(symbol);
                    report.failed += 1;
                }
            }
        }

        if report != FlushReport::default() {
            debug!(
                shard = self.id,
                written = report.written,
                skipped = report.skipped,
                failed = report.failed,
                "shard flushed"
            );
        }
        report
    }

    /// Warm up, then apply fan-out updates & flush on a timer until shutdown. A final flush runs
    /// before returning.
    pub async fn run(mut self, fanout: Arc<dyn FanOut>, shutdown: Shutdown) {
        if let Err(error) = self.warm_up().await {
            warn!(shard = self.id, %error, "warm-up failed, starting from live updates only");
        }

        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = ExponentialBackoff::default();

        'subscribe: loop {
            let mut subscription = match fanout.subscribe().await {
                Ok(subscription) => {
                    backoff.reset();
                    subscription
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!(shard = self.id, %error, ?delay, "fan-out subscribe failed");
                    tokio::select! {
                        _ = shutdown.wait() => break 'subscribe,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue 'subscribe;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.wait() => break 'subscribe,
                    _ = flush.tick() => {
                        self.flush(Utc::now()).await;
                    }
                    message = subscription.next() => match message {
                        Some(payload) => {
                            self.on_message(&payload);
                        }
                        None => {
                            warn!(shard = self.id, "fan-out subscription ended, resubscribing");
                            continue 'subscribe;
                        }
                    }
                }
            }
        }

        let report = self.flush(Utc::now()).await;
        info!(
            shard = self.id,
            written = report.written,
            pending = self.dirty.len(),
            "shard stopped"
        );
    }
}

/// Shared handles used to spawn a set of [`Shard`]s.
pub struct ShardSet {
    candles: Arc<dyn CandleStore>,
    status: Arc<dyn StatusStore>,
    context: Arc<MarketContext>,
    fanout: Arc<dyn FanOut>,
    config: ShardConfig,
}

impl std::fmt::Debug for ShardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSet")
            .field("config", &self.config)
            .finish()
    }
}

impl ShardSet {
    pub fn new(
        candles: Arc<dyn CandleStore>,
        status: Arc<dyn StatusStore>,
        context: Arc<MarketContext>,
        fanout: Arc<dyn FanOut>,
        config: ShardConfig,
    ) -> Self {
        Self {
            candles,
            status,
            context,
            fanout,
            config,
        }
    }

    /// Partition `symbols` once & run one task per shard.
    pub fn spawn(&self, symbols: &[Symbol], shards: usize, shutdown: &Shutdown) -> JoinSet<()> {
        let mut set = JoinSet::new();

        for (id, owned) in partition(symbols, shards).into_iter().enumerate() {
            info!(shard = id, symbols = owned.len(), "spawning shard");
            let shard = Shard::new(
                id,
                owned,
                Arc::clone(&self.candles),
                Arc::clone(&self.status),
                Arc::clone(&self.context),
                self.config.clone(),
            );
            set.spawn(shard.run(Arc::clone(&self.fanout), shutdown.clone()));
        }

        set
    }
}
