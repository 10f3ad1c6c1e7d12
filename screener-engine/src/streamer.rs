use crate::{
    bus::{FanOut, PriceUpdate},
    config::StreamerConfig,
    context::{MarketContext, Shutdown},
};
use futures::StreamExt;
use screener_data::{Candle, MarketData, Tick, streams::ExponentialBackoff};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Point in time copy of [`StreamerStats`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct StreamerStatsSnapshot {
    pub ticks: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub dropped: u64,
    pub invalid: u64,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub struct StreamerStats {
    ticks: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
    reconnects: AtomicU64,
}

impl StreamerStats {
    pub fn snapshot(&self) -> StreamerStatsSnapshot {
        StreamerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Live tick ingestion.
///
/// Every tick is published to the fan-out channel first, then handed to the storage writer
/// without waiting: a full writer buffer drops the candle so a slow store never stalls
/// ingestion or broadcast.
pub struct Streamer {
    market: Arc<dyn MarketData>,
    fanout: Arc<dyn FanOut>,
    writer_tx: mpsc::Sender<Candle>,
    context: Arc<MarketContext>,
    config: StreamerConfig,
    stats: Arc<StreamerStats>,
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("config", &self.config)
            .finish()
    }
}

impl Streamer {
    pub fn new(
        market: Arc<dyn MarketData>,
        fanout: Arc<dyn FanOut>,
        writer_tx: mpsc::Sender<Candle>,
        context: Arc<MarketContext>,
        config: StreamerConfig,
    ) -> Self {
        Self {
            market,
            fanout,
            writer_tx,
            context,
            config,
            stats: Arc::new(StreamerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<StreamerStats> {
        Arc::clone(&self.stats)
    }

    /// Convert, publish & forward one tick.
    pub async fn handle_tick(&self, tick: &Tick) {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let prior_close = self.context.record(tick);
        let candle = match Candle::from_tick(tick, prior_close) {
            Ok(candle) => candle,
            Err(error) => {
                debug!(symbol = %tick.symbol, %error, "skipping invalid tick");
                self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let published = match PriceUpdate::new(tick, candle.clone()).to_json() {
            Ok(payload) => self.fanout.publish(payload).await,
            Err(error) => Err(error),
        };
        match published {
            Ok(_) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                warn!(symbol = %tick.symbol, %error, "failed to publish price update");
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        match self.writer_tx.try_send(candle) {
            Ok(()) => {}
            Err(TrySendError::Full(candle)) => {
                debug!(symbol = %candle.symbol, "storage writer buffer full, dropping candle");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(candle)) => {
                debug!(symbol = %candle.symbol, "storage writer closed, dropping candle");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Consume the live tick subscription until shutdown, reconnecting with exponential backoff
    /// whenever the subscription fails or ends.
    pub async fn run(self, shutdown: Shutdown) {
        info!("tick streamer started");

        let mut backoff = ExponentialBackoff::new(
            self.config.reconnect_initial,
            self.config.reconnect_max,
        )
        .with_jitter(true);

        'connect: loop {
            match self.market.subscribe_ticks().await {
                Ok(mut ticks) => {
                    info!("subscribed to live ticks");
                    let mut connected = false;

                    loop {
                        let next = tokio::select! {
                            _ = shutdown.wait() => break 'connect,
                            next = ticks.next() => next,
                        };

                        match next {
                            Some(Ok(tick)) => {
                                if !connected {
                                    connected = true;
                                    backoff.reset();
                                }
                                self.handle_tick(&tick).await;
                            }
                            Some(Err(error)) if error.is_terminal() => {
                                warn!(%error, "tick subscription terminated");
                                break;
                            }
                            Some(Err(error)) => {
                                debug!(%error, "skipping tick stream error");
                            }
                            None => {
                                warn!("tick subscription ended");
                                break;
                            }
                        }
                    }
                }
                Err(error) => {
                    error!(%error, "failed to subscribe to live ticks");
                }
            }

            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            let delay = backoff.next_delay();
            info!(?delay, "reconnecting tick subscription");
            tokio::select! {
                _ = shutdown.wait() => break 'connect,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let stats = self.stats.snapshot();
        info!(
            ticks = stats.ticks,
            published = stats.published,
            dropped = stats.dropped,
            reconnects = stats.reconnects,
            "tick streamer stopped"
        );
    }
}
