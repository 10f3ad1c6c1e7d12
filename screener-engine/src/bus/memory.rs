use super::{BusError, FanOut, Subscription};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

/// [`FanOut`] over a bounded `tokio::sync::broadcast` channel. Lagging subscribers skip the
/// messages they missed.
#[derive(Debug, Clone)]
pub struct MemoryFanOut {
    tx: broadcast::Sender<String>,
}

impl Default for MemoryFanOut {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryFanOut {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl FanOut for MemoryFanOut {
    async fn publish(&self, payload: String) -> Result<usize, BusError> {
        // No subscribers is not an error for a fan-out channel
        Ok(self.tx.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|message| {
            futures::future::ready(match message {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "fan-out subscriber lagged, skipping messages");
                    None
                }
            })
        });

        Ok(stream.boxed())
    }
}
