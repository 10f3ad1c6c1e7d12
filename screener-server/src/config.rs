use screener_data::{Symbol, exchange::binance::BinanceConfig};
use screener_engine::{
    bus::BusError,
    config::{
        BackfillConfig, BridgeConfig, DEFAULT_TICK_CHANNEL, QueueConfig, SchedulerConfig,
        ShardConfig, StreamerConfig, WorkerConfig, WriterConfig, env_or,
    },
    queue::QueueError,
    shard::default_shard_count,
    store::StoreError,
};
use std::{net::SocketAddr, str::FromStr};
use thiserror::Error;
use tracing::warn;

/// Errors that abort server start-up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("work queue: {0}")]
    Queue(#[from] QueueError),

    #[error("fan-out: {0}")]
    Bus(#[from] BusError),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline component run by this process.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Role {
    Scheduler,
    Worker,
    Shard,
    Streamer,
    Backfill,
    Bridge,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Scheduler,
        Role::Worker,
        Role::Shard,
        Role::Streamer,
        Role::Backfill,
        Role::Bridge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Scheduler => "scheduler",
            Role::Worker => "worker",
            Role::Shard => "shard",
            Role::Streamer => "streamer",
            Role::Backfill => "backfill",
            Role::Bridge => "bridge",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Parse a comma separated role list, skipping unknown entries. Empty input selects every role.
pub fn parse_roles(value: &str) -> Vec<Role> {
    let mut roles = Vec::new();
    for raw in value.split(',').filter(|raw| !raw.trim().is_empty()) {
        match raw.parse::<Role>() {
            Ok(role) if !roles.contains(&role) => roles.push(role),
            Ok(_) => {}
            Err(error) => warn!(%error, "ignoring configured role"),
        }
    }

    if roles.is_empty() {
        Role::ALL.to_vec()
    } else {
        roles
    }
}

/// Parse a comma separated symbol list (eg/ "BTC/USDT,ETH/USDT"), skipping invalid entries.
pub fn parse_symbols(value: &str) -> Vec<Symbol> {
    value
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .filter_map(|raw| {
            Symbol::new(raw)
                .inspect_err(|error| warn!(%error, symbol = raw, "ignoring configured symbol"))
                .ok()
        })
        .collect()
}

/// Process wide configuration, aggregated from `SCREENER_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub roles: Vec<Role>,
    /// Postgres stores when present, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Redis queue & fan-out when present, in-memory otherwise.
    pub redis_url: Option<String>,
    pub tick_channel: String,
    pub ws_addr: SocketAddr,
    /// Active symbols of the in-memory registry.
    pub symbols: Vec<Symbol>,
    pub workers: usize,
    pub shards: usize,
    pub binance: BinanceConfig,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub shard: ShardConfig,
    pub streamer: StreamerConfig,
    pub writer: WriterConfig,
    pub backfill: BackfillConfig,
    pub bridge: BridgeConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|value| !value.trim().is_empty());

        Self {
            roles: parse_roles(&std::env::var("SCREENER_ROLES").unwrap_or_default()),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: env_or("SCREENER_DB_MAX_CONNECTIONS", 10),
            redis_url: non_empty("REDIS_URL"),
            tick_channel: env_or("SCREENER_TICK_CHANNEL", DEFAULT_TICK_CHANNEL.to_string()),
            ws_addr: env_or("SCREENER_WS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9001))),
            symbols: parse_symbols(
                &std::env::var("SCREENER_SYMBOLS").unwrap_or_else(|_| "BTC/USDT,ETH/USDT".into()),
            ),
            workers: env_or("SCREENER_WORKERS", 4_usize).max(1),
            shards: env_or("SCREENER_SHARDS", default_shard_count()).max(1),
            binance: BinanceConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            queue: QueueConfig::from_env(),
            worker: WorkerConfig::from_env(),
            shard: ShardConfig::from_env(),
            streamer: StreamerConfig::from_env(),
            writer: WriterConfig::from_env(),
            backfill: BackfillConfig::from_env(),
            bridge: BridgeConfig::from_env(),
        }
    }

    pub fn runs(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
