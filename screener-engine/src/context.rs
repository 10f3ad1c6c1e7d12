use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use screener_data::{Symbol, Tick};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Most recent live price observed for a [`Symbol`].
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct LatestPrice {
    pub price: f64,
    pub volume: f64,
    pub time: DateTime<Utc>,
}

/// Process-wide latest price table, shared between the streamer & the shards.
///
/// Created once by the server and handed out behind an `Arc`.
#[derive(Debug, Default)]
pub struct MarketContext {
    prices: RwLock<FnvHashMap<Symbol, LatestPrice>>,
}

impl MarketContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a [`Tick`], returning the previously known price for the symbol.
    ///
    /// Out of order ticks (older than the recorded time) are not recorded.
    pub fn record(&self, tick: &Tick) -> Option<f64> {
        let mut prices = self.prices.write();
        let latest = LatestPrice {
            price: tick.price,
            volume: tick.volume,
            time: tick.time,
        };

        match prices.get_mut(&tick.symbol) {
            Some(existing) => {
                let prior = existing.price;
                if tick.time >= existing.time {
                    *existing = latest;
                }
                Some(prior)
            }
            None => {
                prices.insert(tick.symbol.clone(), latest);
                None
            }
        }
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<LatestPrice> {
        self.prices.read().get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

/// Cooperative cancellation signal cloned into every long-running loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Owning half of [`Shutdown`]. Dropping it also signals shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Construct a linked [`ShutdownTrigger`] & [`Shutdown`] pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is triggered. Safe to use as a `tokio::select!` branch.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Err means every trigger was dropped
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn tick(price: f64, second: u32) -> Tick {
        Tick::new(
            Symbol::new("BTC/USDT").unwrap(),
            price,
            10.0,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_market_context_record() {
        let context = MarketContext::new();

        assert_eq!(context.record(&tick(100.0, 10)), None);
        assert_eq!(context.record(&tick(101.0, 20)), Some(100.0));

        // Stale tick returns the prior price but does not overwrite it
        assert_eq!(context.record(&tick(99.0, 5)), Some(101.0));

        let latest = context.latest(&Symbol::new("BTC/USDT").unwrap()).unwrap();
        assert_eq!(latest.price, 101.0);
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_wait() {
        let (trigger, shutdown) = shutdown_channel();
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_on_trigger_drop() {
        let (trigger, shutdown) = shutdown_channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }
}
