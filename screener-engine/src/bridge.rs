use crate::{bus::FanOut, config::BridgeConfig, context::Shutdown};
use derive_more::Display;
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use screener_data::streams::ExponentialBackoff;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Identifier of a registered push connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
pub struct ConnectionId(pub u64);

/// Outcome of one [`BroadcastBridge::broadcast`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Connections removed because they were closed or could not keep up.
    pub dropped: usize,
}

/// Registry of push connections, each fed through its own bounded outbound queue.
///
/// Delivery is best effort: a connection whose queue is closed or full is removed rather than
/// slowing down the broadcast.
#[derive(Debug)]
pub struct BroadcastBridge {
    connections: RwLock<FnvHashMap<ConnectionId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    config: BridgeConfig,
}

impl Default for BroadcastBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl BroadcastBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            connections: RwLock::new(FnvHashMap::default()),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Register a connection, returning its id & the receiving half of its outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.client_buffer.max(1));
        self.connections.write().insert(id, tx);
        debug!(%id, "registered push connection");
        (id, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().remove(&id).is_some();
        if removed {
            debug!(%id, "removed push connection");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Send `message` to every registered connection.
    pub fn broadcast(&self, message: &str) -> BroadcastReport {
        let targets = self
            .connections
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect::<Vec<_>>();

        let mut report = BroadcastReport::default();
        for (id, tx) in targets {
            match tx.try_send(message.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    let reason = match error {
                        TrySendError::Full(_) => "outbound queue full",
                        TrySendError::Closed(_) => "connection closed",
                    };
                    debug!(%id, reason, "dropping push connection");
                    self.remove(id);
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Relay every fan-out message to the registered connections until shutdown.
    pub async fn run(self: Arc<Self>, fanout: Arc<dyn FanOut>, shutdown: Shutdown) {
        info!("broadcast bridge started");
        let mut backoff = ExponentialBackoff::default();

        'subscribe: loop {
            let mut subscription = match fanout.subscribe().await {
                Ok(subscription) => {
                    backoff.reset();
                    subscription
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!(%error, ?delay, "fan-out subscribe failed");
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
                    message = subscription.next() => match message {
                        Some(message) => {
                            let report = self.broadcast(&message);
                            if report.dropped > 0 {
                                info!(
                                    dropped = report.dropped,
                                    remaining = self.len(),
                                    "dropped push connections"
                                );
                            }
                        }
                        None => {
                            warn!("fan-out subscription ended, resubscribing");
                            continue 'subscribe;
                        }
                    }
                }
            }
        }

        info!(connections = self.len(), "broadcast bridge stopped");
    }
}
