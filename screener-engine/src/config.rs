use chrono::TimeDelta;
use screener_data::Timeframe;
use std::{collections::BTreeMap, str::FromStr, time::Duration};
use tracing::warn;

/// Default consumer group shared by every [`BatchWorker`](crate::worker::BatchWorker).
pub const DEFAULT_CONSUMER_GROUP: &str = "indicator_workers";

/// Default Work Queue stream key.
pub const DEFAULT_TASK_STREAM: &str = "ta_tasks";

/// Default fan-out channel name.
pub const DEFAULT_TICK_CHANNEL: &str = "crypto_ticks";

/// Parse the environment variable `key` into `T`, logging and falling back to `default` if the
/// value is present but malformed.
pub fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %value, "ignoring malformed environment variable");
            default
        }),
        Err(_) => default,
    }
}

/// Read a whole number of seconds from the environment variable `key`.
pub fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

/// Read a whole number of milliseconds from the environment variable `key`.
pub fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

/// Convert a std [`Duration`] into a chrono [`TimeDelta`], saturating on overflow.
pub fn time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Minimum resampled bars of a timeframe without a configured override.
pub const DEFAULT_MIN_BARS: usize = 52;

/// Indicator computation settings shared by the batch & stateful paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeConfig {
    /// Timeframes computed for every snapshot.
    pub timeframes: Vec<Timeframe>,
    /// Minimum resampled bars required before a timeframe is computed.
    pub min_bars: BTreeMap<Timeframe, usize>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            timeframes: Timeframe::ALL.to_vec(),
            min_bars: BTreeMap::from([
                (Timeframe::M1, DEFAULT_MIN_BARS),
                (Timeframe::M5, DEFAULT_MIN_BARS),
                (Timeframe::M15, DEFAULT_MIN_BARS),
                (Timeframe::H1, DEFAULT_MIN_BARS),
                (Timeframe::H4, 30),
                (Timeframe::D1, 20),
            ]),
        }
    }
}

impl ComputeConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        let timeframes = std::env::var("SCREENER_TIMEFRAMES")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .filter_map(|raw| {
                        raw.trim()
                            .parse::<Timeframe>()
                            .inspect_err(|error| warn!(%error, "ignoring configured timeframe"))
                            .ok()
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|timeframes| !timeframes.is_empty())
            .unwrap_or(default.timeframes);

        let mut min_bars = default.min_bars;
        if let Ok(value) = std::env::var("SCREENER_MIN_BARS") {
            min_bars.extend(parse_min_bars(&value));
        }

        Self {
            timeframes,
            min_bars,
        }
    }

    /// Minimum resampled bars required to compute `timeframe`.
    pub fn min_bars(&self, timeframe: Timeframe) -> usize {
        self.min_bars
            .get(&timeframe)
            .copied()
            .unwrap_or(DEFAULT_MIN_BARS)
    }

    pub fn with_timeframes(mut self, timeframes: impl IntoIterator<Item = Timeframe>) -> Self {
        self.timeframes = timeframes.into_iter().collect();
        self
    }

    /// Use the same minimum for every timeframe.
    pub fn with_min_bars(mut self, min_bars: usize) -> Self {
        self.min_bars = Timeframe::ALL
            .into_iter()
            .map(|timeframe| (timeframe, min_bars))
            .collect();
        self
    }

    pub fn with_timeframe_min_bars(mut self, timeframe: Timeframe, min_bars: usize) -> Self {
        self.min_bars.insert(timeframe, min_bars);
        self
    }
}

/// Parse minimum bar overrides.
///
/// Accepts a bare number applied to every timeframe (eg/ "40") and/or comma separated
/// `timeframe=bars` pairs (eg/ "4h=30,1d=20"). Malformed entries are skipped.
pub fn parse_min_bars(value: &str) -> BTreeMap<Timeframe, usize> {
    let mut min_bars = BTreeMap::new();
    for raw in value.split(',').map(str::trim).filter(|raw| !raw.is_empty()) {
        match raw.split_once('=') {
            None => match raw.parse::<usize>() {
                Ok(bars) => min_bars.extend(Timeframe::ALL.map(|timeframe| (timeframe, bars))),
                Err(_) => warn!(entry = raw, "ignoring malformed minimum bars"),
            },
            Some((timeframe, bars)) => {
                match (timeframe.trim().parse::<Timeframe>(), bars.trim().parse::<usize>()) {
                    (Ok(timeframe), Ok(bars)) => {
                        min_bars.insert(timeframe, bars);
                    }
                    _ => warn!(entry = raw, "ignoring malformed minimum bars"),
                }
            }
        }
    }
    min_bars
}

/// [`Scheduler`](crate::scheduler::Scheduler) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub group: String,
    pub interval: Duration,
    /// Retry delay used when the active symbol set is empty.
    pub empty_backoff: Duration,
    pub max_queue_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            interval: Duration::from_secs(60),
            empty_backoff: Duration::from_secs(5),
            max_queue_len: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            group: env_or("SCREENER_CONSUMER_GROUP", default.group),
            interval: env_secs("SCREENER_SCHEDULER_INTERVAL_SECS", default.interval),
            empty_backoff: env_secs("SCREENER_SCHEDULER_EMPTY_BACKOFF_SECS", default.empty_backoff),
            max_queue_len: env_or("SCREENER_MAX_QUEUE_LEN", default.max_queue_len),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_empty_backoff(mut self, backoff: Duration) -> Self {
        self.empty_backoff = backoff;
        self
    }

    pub fn with_max_queue_len(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = max_queue_len;
        self
    }
}

/// Work Queue backend configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub stream_key: String,
    /// Idle period after which an unacknowledged delivery may be claimed by another consumer.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_key: DEFAULT_TASK_STREAM.to_string(),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            stream_key: env_or("SCREENER_TASK_STREAM", default.stream_key),
            visibility_timeout: env_secs(
                "SCREENER_VISIBILITY_TIMEOUT_SECS",
                default.visibility_timeout,
            ),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// [`BatchWorker`](crate::worker::BatchWorker) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub group: String,
    /// Upper bound of a single blocking queue read.
    pub block: Duration,
    /// History window of 1m candles read per task.
    pub lookback: Duration,
    pub error_backoff_initial: Duration,
    pub error_backoff_max: Duration,
    pub compute: ComputeConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            block: Duration::from_secs(5),
            lookback: Duration::from_secs(21 * 24 * 60 * 60),
            error_backoff_initial: Duration::from_millis(500),
            error_backoff_max: Duration::from_secs(30),
            compute: ComputeConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            group: env_or("SCREENER_CONSUMER_GROUP", default.group),
            block: env_millis("SCREENER_WORKER_BLOCK_MS", default.block),
            lookback: env_secs("SCREENER_WORKER_LOOKBACK_SECS", default.lookback),
            compute: ComputeConfig::from_env(),
            ..default
        }
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_compute(mut self, compute: ComputeConfig) -> Self {
        self.compute = compute;
        self
    }
}

/// [`Shard`](crate::shard::Shard) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardConfig {
    /// History window of 1m candles loaded at warm-up.
    pub warmup: Duration,
    /// Number of symbols whose history is loaded per store query at warm-up.
    pub warmup_batch: usize,
    /// Maximum 1m bars retained per symbol.
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    /// Age after which a symbol's cached snapshot is re-read from the Status Store, picking up
    /// timeframes written by the batch path.
    pub snapshot_refresh: Duration,
    pub compute: ComputeConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(3 * 24 * 60 * 60),
            warmup_batch: 20,
            buffer_capacity: 2000,
            flush_interval: Duration::from_secs(1),
            snapshot_refresh: Duration::from_secs(60),
            compute: ComputeConfig::default(),
        }
    }
}

impl ShardConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            warmup: env_secs("SCREENER_SHARD_WARMUP_SECS", default.warmup),
            warmup_batch: env_or("SCREENER_SHARD_WARMUP_BATCH", default.warmup_batch),
            buffer_capacity: env_or("SCREENER_SHARD_BUFFER_CAPACITY", default.buffer_capacity),
            flush_interval: env_millis("SCREENER_SHARD_FLUSH_MS", default.flush_interval),
            snapshot_refresh: env_secs(
                "SCREENER_SHARD_SNAPSHOT_REFRESH_SECS",
                default.snapshot_refresh,
            ),
            compute: ComputeConfig::from_env(),
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_snapshot_refresh(mut self, refresh: Duration) -> Self {
        self.snapshot_refresh = refresh;
        self
    }

    pub fn with_compute(mut self, compute: ComputeConfig) -> Self {
        self.compute = compute;
        self
    }
}

/// [`Streamer`](crate::streamer::Streamer) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Capacity of the bounded buffer between the streamer & the storage writer.
    pub writer_buffer: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            writer_buffer: 10_000,
        }
    }
}

impl StreamerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            reconnect_initial: env_millis(
                "SCREENER_RECONNECT_INITIAL_MS",
                default.reconnect_initial,
            ),
            reconnect_max: env_secs("SCREENER_RECONNECT_MAX_SECS", default.reconnect_max),
            writer_buffer: env_or("SCREENER_WRITER_BUFFER", default.writer_buffer),
        }
    }
}

/// [`StorageWriter`](crate::writer::StorageWriter) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl WriterConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            batch_size: env_or("SCREENER_WRITER_BATCH_SIZE", default.batch_size),
            flush_interval: env_millis("SCREENER_WRITER_FLUSH_MS", default.flush_interval),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// [`BackfillEngine`](crate::backfill::BackfillEngine) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    /// Period between full repair cycles over every active symbol.
    pub interval: Duration,
    /// Period between expedited repairs of stale symbols only.
    pub stale_check_interval: Duration,
    /// Window scanned for interior gaps.
    pub lookback: Duration,
    /// History fetched for a symbol with no stored rows.
    pub cold_start: Duration,
    /// Age of the latest row beyond which a symbol is considered stale.
    pub stale_after: Duration,
    /// Pause after every market data request.
    pub request_delay: Duration,
    /// Maximum symbols repaired concurrently.
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            stale_check_interval: Duration::from_secs(60),
            lookback: Duration::from_secs(24 * 60 * 60),
            cold_start: Duration::from_secs(7 * 24 * 60 * 60),
            stale_after: Duration::from_secs(5 * 60),
            request_delay: Duration::from_millis(200),
            concurrency: 10,
        }
    }
}

impl BackfillConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            interval: env_secs("SCREENER_BACKFILL_INTERVAL_SECS", default.interval),
            stale_check_interval: env_secs(
                "SCREENER_BACKFILL_STALE_CHECK_SECS",
                default.stale_check_interval,
            ),
            lookback: env_secs("SCREENER_BACKFILL_LOOKBACK_SECS", default.lookback),
            cold_start: env_secs("SCREENER_BACKFILL_COLD_START_SECS", default.cold_start),
            stale_after: env_secs("SCREENER_BACKFILL_STALE_AFTER_SECS", default.stale_after),
            request_delay: env_millis("SCREENER_BACKFILL_REQUEST_DELAY_MS", default.request_delay),
            concurrency: env_or("SCREENER_BACKFILL_CONCURRENCY", default.concurrency).clamp(1, 10),
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_cold_start(mut self, cold_start: Duration) -> Self {
        self.cold_start = cold_start;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, 10);
        self
    }
}

/// [`BroadcastBridge`](crate::bridge::BroadcastBridge) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Outbound queue capacity per connection. A full queue drops the connection.
    pub client_buffer: usize,
    pub ping_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            client_buffer: env_or("SCREENER_WS_CLIENT_BUFFER", default.client_buffer),
            ping_interval: env_secs("SCREENER_WS_PING_SECS", default.ping_interval),
        }
    }

    pub fn with_client_buffer(mut self, capacity: usize) -> Self {
        self.client_buffer = capacity.max(1);
        self
    }
}
