use super::{CandleStore, StatusStore, StoreError, SymbolRegistry, coalesce};
use crate::snapshot::{IndicatorSnapshot, TimeframeIndicators};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use screener_data::{Candle, Symbol, Timeframe};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Postgres limits a statement to 65535 bind parameters, 7 are used per candle.
const MAX_ROWS_PER_STATEMENT: usize = 5000;

const CANDLE_COLUMNS: &str = "time, symbol, open, high, low, close, volume";

/// `coin_status` JSONB column holding each [`Timeframe`].
fn status_column(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "indicators_1m",
        Timeframe::M5 => "indicators_5m",
        Timeframe::M15 => "indicators_15m",
        Timeframe::H1 => "indicators_1h",
        Timeframe::H4 => "indicators_4h",
        Timeframe::D1 => "indicators_1d",
    }
}

/// Connect a pool to `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    info!(max_connections, "connected to Postgres");
    Ok(pool)
}

/// Idempotently create the tables used by the Postgres stores.
///
/// Intended for tests & local runs. The `candles` table is promoted to a TimescaleDB hypertable
/// when the extension is available.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS candles (
            time TIMESTAMPTZ NOT NULL,
            symbol TEXT NOT NULL,
            open DOUBLE PRECISION NOT NULL,
            high DOUBLE PRECISION NOT NULL,
            low DOUBLE PRECISION NOT NULL,
            close DOUBLE PRECISION NOT NULL,
            volume DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (time, symbol)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS coin_status (
            symbol TEXT PRIMARY KEY,
            current_price DOUBLE PRECISION NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            indicators_1m JSONB,
            indicators_5m JSONB,
            indicators_15m JSONB,
            indicators_1h JSONB,
            indicators_4h JSONB,
            indicators_1d JSONB
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS coins_meta (
            symbol TEXT PRIMARY KEY,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )",
    )
    .execute(pool)
    .await?;

    if let Err(error) = sqlx::query(
        "SELECT create_hypertable('candles', 'time', if_not_exists => TRUE, migrate_data => TRUE)",
    )
    .execute(pool)
    .await
    {
        warn!(%error, "TimescaleDB unavailable, candles stays a plain table");
    }

    Ok(())
}

/// [`CandleStore`] over the TimescaleDB `candles` table.
#[derive(Debug, Clone)]
pub struct PgCandleStore {
    pool: PgPool,
}

impl PgCandleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, candles: &[Candle], on_conflict: &str) -> Result<u64, StoreError> {
        let rows = coalesce(candles);
        let mut written = 0;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut query = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO candles ({CANDLE_COLUMNS}) "
            ));
            query.push_values(chunk, |mut row, candle| {
                row.push_bind(candle.time)
                    .push_bind(candle.symbol.as_str())
                    .push_bind(candle.open)
                    .push_bind(candle.high)
                    .push_bind(candle.low)
                    .push_bind(candle.close)
                    .push_bind(candle.volume);
            });
            query.push(on_conflict);

            written += query.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(written)
    }
}

fn candle_from_row(row: &PgRow) -> Result<Candle, StoreError> {
    let symbol = row.try_get::<String, _>("symbol")?;
    Ok(Candle {
        symbol: Symbol::new(&symbol).map_err(|error| StoreError::Decode(error.to_string()))?,
        time: row.try_get("time")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
    })
}

#[async_trait]
impl CandleStore for PgCandleStore {
    async fn upsert(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        self.insert(
            candles,
            " ON CONFLICT (time, symbol) DO UPDATE SET
                high = GREATEST(candles.high, EXCLUDED.high),
                low = LEAST(candles.low, EXCLUDED.low),
                close = EXCLUDED.close,
                volume = EXCLUDED.volume",
        )
        .await
    }

    async fn insert_missing(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        self.insert(candles, " ON CONFLICT (time, symbol) DO NOTHING")
            .await
    }

    async fn range(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CANDLE_COLUMNS} FROM candles
             WHERE symbol = $1 AND time >= $2 AND time < $3
             ORDER BY time ASC"
        ))
        .bind(symbol.as_str())
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candle_from_row).collect()
    }

    async fn range_many(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<FnvHashMap<Symbol, Vec<Candle>>, StoreError> {
        let names = symbols.iter().map(Symbol::to_string).collect::<Vec<_>>();
        let rows = sqlx::query(&format!(
            "SELECT {CANDLE_COLUMNS} FROM candles
             WHERE symbol = ANY($1) AND time >= $2 AND time < $3
             ORDER BY symbol, time ASC"
        ))
        .bind(&names)
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = symbols
            .iter()
            .map(|symbol| (symbol.clone(), Vec::new()))
            .collect::<FnvHashMap<_, _>>();

        for row in &rows {
            let candle = candle_from_row(row)?;
            candles.entry(candle.symbol.clone()).or_default().push(candle);
        }

        debug!(symbols = symbols.len(), rows = rows.len(), "loaded candle batch");
        Ok(candles)
    }

    async fn timestamps(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let timestamps = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT time FROM candles
             WHERE symbol = $1 AND time >= $2 AND time < $3
             ORDER BY time ASC",
        )
        .bind(symbol.as_str())
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(timestamps)
    }

    async fn latest_time(&self, symbol: &Symbol) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(time) FROM candles WHERE symbol = $1",
        )
        .bind(symbol.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn bucketed(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            "SELECT time_bucket($1::interval, time) AS time,
                    symbol,
                    first(open, time) AS open,
                    MAX(high) AS high,
                    MIN(low) AS low,
                    last(close, time) AS close,
                    SUM(volume) AS volume
             FROM candles
             WHERE symbol = $2 AND time >= $3 AND time < $4
             GROUP BY 1, symbol
             ORDER BY 1 ASC",
        )
        .bind(format!("{} minutes", timeframe.minutes()))
        .bind(symbol.as_str())
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candle_from_row).collect()
    }
}

/// [`StatusStore`] over the `coin_status` table, one JSONB column per [`Timeframe`].
#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn put(&self, snapshot: &IndicatorSnapshot) -> Result<(), StoreError> {
        let columns = Timeframe::ALL
            .iter()
            .map(|timeframe| {
                snapshot
                    .timeframe(*timeframe)
                    .map(serde_json::to_value)
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut query = sqlx::query(
            "INSERT INTO coin_status (
                symbol, current_price, updated_at,
                indicators_1m, indicators_5m, indicators_15m,
                indicators_1h, indicators_4h, indicators_1d
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (symbol) DO UPDATE SET
                current_price = EXCLUDED.current_price,
                updated_at = EXCLUDED.updated_at,
                indicators_1m = EXCLUDED.indicators_1m,
                indicators_5m = EXCLUDED.indicators_5m,
                indicators_15m = EXCLUDED.indicators_15m,
                indicators_1h = EXCLUDED.indicators_1h,
                indicators_4h = EXCLUDED.indicators_4h,
                indicators_1d = EXCLUDED.indicators_1d",
        )
        .bind(snapshot.symbol.as_str())
        .bind(snapshot.current_price)
        .bind(snapshot.updated_at);

        for column in columns {
            query = query.bind(column);
        }

        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, symbol: &Symbol) -> Result<Option<IndicatorSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT symbol, current_price, updated_at,
                    indicators_1m, indicators_5m, indicators_15m,
                    indicators_1h, indicators_4h, indicators_1d
             FROM coin_status WHERE symbol = $1",
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut timeframes = BTreeMap::new();
        for timeframe in Timeframe::ALL {
            let value = row.try_get::<Option<serde_json::Value>, _>(status_column(timeframe))?;
            if let Some(value) = value {
                timeframes.insert(timeframe, serde_json::from_value::<TimeframeIndicators>(value)?);
            }
        }

        Ok(Some(IndicatorSnapshot {
            symbol: symbol.clone(),
            current_price: row.try_get("current_price")?,
            updated_at: row.try_get("updated_at")?,
            timeframes,
        }))
    }
}

/// [`SymbolRegistry`] reading `coins_meta WHERE is_active`.
#[derive(Debug, Clone)]
pub struct PgSymbolRegistry {
    pool: PgPool,
}

impl PgSymbolRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SymbolRegistry for PgSymbolRegistry {
    async fn active_symbols(&self) -> Result<Vec<Symbol>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT symbol FROM coins_meta WHERE is_active ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names
            .iter()
            .filter_map(|name| {
                Symbol::new(name)
                    .inspect_err(|error| warn!(%error, "skipping malformed registry symbol"))
                    .ok()
            })
            .collect())
    }
}
