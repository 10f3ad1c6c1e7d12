use crate::{
    config::{BackfillConfig, time_delta},
    context::Shutdown,
    error::EngineError,
    store::{CandleStore, SymbolRegistry},
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use itertools::Itertools;
use screener_data::{Candle, MarketData, Symbol, Timeframe, timeframe::minute_floor};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Gap model & detection over stored timestamps.
pub mod gap;

pub use gap::{Gap, detect_gaps};

/// Outcome of repairing one symbol.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RepairReport {
    pub symbol: Symbol,
    /// True when the symbol had no stored rows and a cold backfill ran.
    pub cold_start: bool,
    pub gaps: usize,
    pub missing_minutes: usize,
    pub fetched: usize,
    /// Rows merged from bars inside a gap window.
    pub upserted: u64,
    /// Rows inserted from bars outside a gap window, never touching existing rows.
    pub inserted: u64,
}

impl RepairReport {
    fn new(symbol: &Symbol) -> Self {
        Self {
            symbol: symbol.clone(),
            cold_start: false,
            gaps: 0,
            missing_minutes: 0,
            fetched: 0,
            upserted: 0,
            inserted: 0,
        }
    }

    fn add(&mut self, fill: FillReport) {
        self.fetched += fill.fetched;
        self.upserted += fill.upserted;
        self.inserted += fill.inserted;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
struct FillReport {
    fetched: usize,
    upserted: u64,
    inserted: u64,
}

/// Outcome of [`BackfillEngine::run_cycle`] & [`BackfillEngine::run_stale_check`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct CycleReport {
    pub symbols: usize,
    pub repaired: usize,
    pub failed: usize,
    pub rows: u64,
}

/// Detects & repairs gaps in stored 1m history by fetching from the market data provider.
pub struct BackfillEngine {
    market: Arc<dyn MarketData>,
    store: Arc<dyn CandleStore>,
    registry: Arc<dyn SymbolRegistry>,
    config: BackfillConfig,
}

impl std::fmt::Debug for BackfillEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl BackfillEngine {
    pub fn new(
        market: Arc<dyn MarketData>,
        store: Arc<dyn CandleStore>,
        registry: Arc<dyn SymbolRegistry>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            market,
            store,
            registry,
            config,
        }
    }

    /// Repair the stored history of `symbol` up to the last closed minute.
    ///
    /// A symbol with no rows gets a cold backfill of the cold start window. Otherwise interior
    /// gaps within the lookback window are filled, plus the tail since the latest row when it
    /// is older than the staleness threshold.
    pub async fn repair_symbol(&self, symbol: &Symbol) -> Result<RepairReport, EngineError> {
        let now = Utc::now();
        let current = minute_floor(now);
        let floor = current - time_delta(self.config.cold_start);
        let mut report = RepairReport::new(symbol);

        let Some(latest) = self.store.latest_time(symbol).await? else {
            info!(%symbol, since = %floor, "no stored history, running cold backfill");
            let fill = self.fill_gap(&Gap::new(symbol.clone(), floor, current)).await?;
            report.cold_start = true;
            report.gaps = 1;
            report.missing_minutes = (current - floor).num_minutes().max(0) as usize;
            report.add(fill);
            return Ok(report);
        };

        let since = current - time_delta(self.config.lookback);
        let timestamps = self
            .store
            .timestamps(symbol, since, current + TimeDelta::minutes(1))
            .await?;
        let mut gaps = detect_gaps(symbol, &timestamps);

        if now - latest > time_delta(self.config.stale_after) {
            let start = (latest + TimeDelta::minutes(1)).max(floor);
            if start < current {
                debug!(%symbol, %latest, "stale history, adding tail gap");
                gaps.push(Gap::new(symbol.clone(), start, current));
            }
        }

        for gap in &gaps {
            debug!(%symbol, start = %gap.start, end = %gap.end, missing = gap.len(), "filling gap");
            report.gaps += 1;
            report.missing_minutes += gap.len();
            report.add(self.fill_gap(gap).await?);
        }

        if report.gaps > 0 {
            info!(
                %symbol,
                gaps = report.gaps,
                missing = report.missing_minutes,
                upserted = report.upserted,
                inserted = report.inserted,
                "repaired history"
            );
        }
        Ok(report)
    }

    /// Fetch `gap` page by page. Bars inside the gap are merged, bars outside it are only
    /// inserted where absent.
    async fn fill_gap(&self, gap: &Gap) -> Result<FillReport, EngineError> {
        let max_bars = self.market.max_bars_per_call().max(1);
        let mut report = FillReport::default();
        let mut cursor = gap.start;

        while cursor < gap.end {
            let remaining = (gap.end - cursor).num_minutes().max(1) as usize;
            let limit = remaining.min(max_bars);

            let candles = self
                .market
                .fetch_history(&gap.symbol, Timeframe::M1, cursor, limit)
                .await?;
            tokio::time::sleep(self.config.request_delay).await;

            let Some(last) = candles.last().map(|candle| candle.time) else {
                debug!(symbol = %gap.symbol, %cursor, "provider returned no bars");
                break;
            };
            report.fetched += candles.len();

            let (inside, outside): (Vec<Candle>, Vec<Candle>) = candles
                .iter()
                .cloned()
                .partition(|candle| gap.contains(candle.time));

            if !inside.is_empty() {
                report.upserted += self
                    .store
                    .upsert(&inside)
                    .await
                    .map_err(EngineError::persist)?;
            }
            if !outside.is_empty() {
                report.inserted += self
                    .store
                    .insert_missing(&outside)
                    .await
                    .map_err(EngineError::persist)?;
            }

            // Short page means the provider has nothing further
            if last < cursor || candles.len() < limit {
                break;
            }
            cursor = last + TimeDelta::minutes(1);
        }

        Ok(report)
    }

    async fn repair_many(&self, symbols: Vec<Symbol>) -> CycleReport {
        let mut report = CycleReport {
            symbols: symbols.len(),
            ..CycleReport::default()
        };

        let results = stream::iter(symbols)
            .map(|symbol| async move {
                let result = self.repair_symbol(&symbol).await;
                (symbol, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for (symbol, result) in results {
            match result {
                Ok(repair) => {
                    if repair.gaps > 0 {
                        report.repaired += 1;
                    }
                    report.rows += repair.upserted + repair.inserted;
                }
                Err(error) => {
                    warn!(%symbol, %error, "failed to repair symbol");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Repair every active symbol, at most `concurrency` at a time.
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let symbols = self.registry.active_symbols().await?;
        let report = self.repair_many(symbols).await;
        info!(
            symbols = report.symbols,
            repaired = report.repaired,
            failed = report.failed,
            rows = report.rows,
            "backfill cycle complete"
        );
        Ok(report)
    }

    /// Repair only the active symbols whose latest row is missing or older than `stale_after`.
    pub async fn run_stale_check(&self) -> Result<CycleReport, EngineError> {
        let now = Utc::now();
        let stale_after = time_delta(self.config.stale_after);

        let mut stale = Vec::new();
        for symbol in self.registry.active_symbols().await? {
            let latest = self.store.latest_time(&symbol).await?;
            if latest.is_none_or(|latest| now - latest > stale_after) {
                stale.push(symbol);
            }
        }

        if stale.is_empty() {
            return Ok(CycleReport::default());
        }

        info!(stale = %stale.iter().join(","), "repairing stale symbols");
        Ok(self.repair_many(stale).await)
    }

    /// Full cycle every `interval` plus an expedited staleness check every
    /// `stale_check_interval`, until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            interval = ?self.config.interval,
            stale_check_interval = ?self.config.stale_check_interval,
            "backfill engine started"
        );

        let mut full = tokio::time::interval(self.config.interval);
        full.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stale = tokio::time::interval(self.config.stale_check_interval);
        stale.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Full cycle covers staleness on startup
        stale.tick().await;

        loop {
            let result = tokio::select! {
                _ = shutdown.wait() => break,
                _ = full.tick() => self.run_cycle().await,
                _ = stale.tick() => self.run_stale_check().await,
            };

            if let Err(error) = result {
                error!(%error, "backfill pass failed");
            }
        }

        info!("backfill engine stopped");
    }
}
