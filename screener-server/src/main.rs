#![forbid(unsafe_code)]

use crate::config::{Role, ServerConfig, ServerError};
use screener_data::{MarketData, exchange::binance::BinanceMarketData};
use screener_engine::{
    backfill::BackfillEngine,
    bridge::BroadcastBridge,
    bus::{FanOut, memory::MemoryFanOut, redis::RedisFanOut},
    config::QueueConfig,
    context::{MarketContext, shutdown_channel},
    queue::{WorkQueue, memory::MemoryWorkQueue, redis::RedisWorkQueue},
    scheduler::Scheduler,
    shard::ShardSet,
    store::{
        CandleStore, StatusStore, SymbolRegistry,
        memory::{MemoryCandleStore, MemoryStatusStore, MemorySymbolRegistry},
        postgres::{self, PgCandleStore, PgStatusStore, PgSymbolRegistry},
    },
    streamer::Streamer,
    worker::{BatchWorker, WorkerPool},
    writer::StorageWriter,
};
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{error, info, warn};

/// Server configuration & start-up errors.
mod config;

/// WebSocket push endpoint feeding the broadcast bridge's connections.
mod push;

/// Source of [`WorkQueue`] handles.
///
/// Redis handles each own a connection, since a blocking read holds its connection until it
/// returns. The in-memory queue is shared by every handle.
enum QueueSource {
    Redis(redis::Client, QueueConfig),
    Memory(Arc<MemoryWorkQueue>),
}

impl QueueSource {
    async fn handle(&self) -> Result<Arc<dyn WorkQueue>, ServerError> {
        match self {
            QueueSource::Redis(client, config) => {
                Ok(Arc::new(RedisWorkQueue::connect(client, config.clone()).await?))
            }
            QueueSource::Memory(queue) => Ok(Arc::clone(queue) as Arc<dyn WorkQueue>),
        }
    }
}

/// Shared stores, queue source & fan-out every role is built on.
struct Backends {
    candles: Arc<dyn CandleStore>,
    status: Arc<dyn StatusStore>,
    registry: Arc<dyn SymbolRegistry>,
    queues: QueueSource,
    fanout: Arc<dyn FanOut>,
}

impl Backends {
    /// Postgres & Redis when their urls are configured, in-memory otherwise.
    async fn connect(config: &ServerConfig) -> Result<Self, ServerError> {
        let (candles, status, registry): (
            Arc<dyn CandleStore>,
            Arc<dyn StatusStore>,
            Arc<dyn SymbolRegistry>,
        ) = match &config.database_url {
            Some(url) => {
                let pool = postgres::connect(url, config.database_max_connections).await?;
                postgres::migrate(&pool).await?;
                (
                    Arc::new(PgCandleStore::new(pool.clone())),
                    Arc::new(PgStatusStore::new(pool.clone())),
                    Arc::new(PgSymbolRegistry::new(pool)),
                )
            }
            None => {
                warn!(symbols = config.symbols.len(), "DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(MemoryCandleStore::new()),
                    Arc::new(MemoryStatusStore::new()),
                    Arc::new(MemorySymbolRegistry::new(config.symbols.clone())),
                )
            }
        };

        let (queues, fanout): (QueueSource, Arc<dyn FanOut>) = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let fanout = RedisFanOut::connect(client.clone(), config.tick_channel.clone()).await?;
                (
                    QueueSource::Redis(client, config.queue.clone()),
                    Arc::new(fanout),
                )
            }
            None => {
                warn!("REDIS_URL not set, using in-memory work queue & fan-out");
                (
                    QueueSource::Memory(Arc::new(MemoryWorkQueue::new(
                        config.queue.visibility_timeout,
                    ))),
                    Arc::new(MemoryFanOut::default()),
                )
            }
        };

        Ok(Self {
            candles,
            status,
            registry,
            queues,
            fanout,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    init_logging();

    let config = ServerConfig::from_env();
    info!(
        roles = ?config.roles,
        ws_addr = %config.ws_addr,
        "starting screener server"
    );

    let backends = Backends::connect(&config).await?;
    let context = Arc::new(MarketContext::new());
    let market: Arc<dyn MarketData> = Arc::new(BinanceMarketData::new(config.binance.clone()));

    let (trigger, shutdown) = shutdown_channel();
    let mut tasks = JoinSet::new();

    if config.runs(Role::Scheduler) {
        let scheduler = Scheduler::new(
            Arc::clone(&backends.registry),
            backends.queues.handle().await?,
            config.scheduler.clone(),
        );
        tasks.spawn(scheduler.run(shutdown.clone()));
    }

    if config.runs(Role::Worker) {
        let pid = std::process::id();
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            workers.push(BatchWorker::new(
                format!("worker-{pid}-{index}"),
                backends.queues.handle().await?,
                Arc::clone(&backends.candles),
                Arc::clone(&backends.status),
                config.worker.clone(),
            ));
        }
        let pool = WorkerPool::spawn(workers, &shutdown);
        tasks.spawn(join_all(pool));
    }

    if config.runs(Role::Shard) {
        let symbols = backends.registry.active_symbols().await?;
        let shards = ShardSet::new(
            Arc::clone(&backends.candles),
            Arc::clone(&backends.status),
            Arc::clone(&context),
            Arc::clone(&backends.fanout),
            config.shard.clone(),
        )
        .spawn(&symbols, config.shards, &shutdown);
        tasks.spawn(join_all(shards));
    }

    if config.runs(Role::Streamer) {
        let (tx, rx) = StorageWriter::channel(config.streamer.writer_buffer);
        let writer = StorageWriter::new(Arc::clone(&backends.candles), config.writer.clone());
        tasks.spawn(writer.run(rx, shutdown.clone()));

        let streamer = Streamer::new(
            Arc::clone(&market),
            Arc::clone(&backends.fanout),
            tx,
            Arc::clone(&context),
            config.streamer.clone(),
        );
        tasks.spawn(streamer.run(shutdown.clone()));
    }

    if config.runs(Role::Backfill) {
        let backfill = BackfillEngine::new(
            Arc::clone(&market),
            Arc::clone(&backends.candles),
            Arc::clone(&backends.registry),
            config.backfill.clone(),
        );
        tasks.spawn(backfill.run(shutdown.clone()));
    }

    if config.runs(Role::Bridge) {
        let bridge = Arc::new(BroadcastBridge::new(config.bridge.clone()));
        tasks.spawn(Arc::clone(&bridge).run(Arc::clone(&backends.fanout), shutdown.clone()));

        let listener = TcpListener::bind(config.ws_addr).await?;
        tasks.spawn(push::serve(listener, bridge, shutdown.clone()));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping roles");
    trigger.trigger();

    while let Some(result) = tasks.join_next().await {
        if let Err(error) = result {
            error!(%error, "role task failed");
        }
    }

    info!("screener server stopped");
    Ok(())
}

async fn join_all(mut set: JoinSet<()>) {
    while let Some(result) = set.join_next().await {
        if let Err(error) = result {
            error!(%error, "task failed");
        }
    }
}

/// Initialise logging: `RUST_LOG` filter (default `info`), JSON output with `SCREENER_LOG_JSON=1`.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("SCREENER_LOG_JSON")
        .is_ok_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use screener_data::Symbol;
    use screener_engine::queue::Task;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_queue_handles_share_one_queue() {
        let queues = QueueSource::Memory(Arc::new(MemoryWorkQueue::new(Duration::from_secs(60))));
        let scheduler = queues.handle().await.unwrap();
        let worker = queues.handle().await.unwrap();

        scheduler.ensure_group("workers").await.unwrap();
        let task = Task::new(Symbol::new("BTC/USDT").unwrap(), 1, Utc::now());
        scheduler.publish(&task).await.unwrap();

        let deliveries = worker
            .read("workers", "worker-0", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].task, task);
    }

    #[tokio::test]
    async fn test_redis_queue_handles_connect_separately() {
        // Nothing listens on port 1: every handle attempts its own connection
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let queues = QueueSource::Redis(client, QueueConfig::default());

        for _ in 0..2 {
            assert!(matches!(queues.handle().await, Err(ServerError::Queue(_))));
        }
    }
}
