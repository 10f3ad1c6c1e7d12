use super::{BusError, FanOut, Subscription};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};

/// [`FanOut`] over a Redis pub/sub channel.
///
/// Publishing shares one multiplexed connection, every subscription opens a dedicated pub/sub
/// connection.
#[derive(Clone)]
pub struct RedisFanOut {
    client: Client,
    connection: MultiplexedConnection,
    channel: String,
}

impl std::fmt::Debug for RedisFanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFanOut")
            .field("channel", &self.channel)
            .finish()
    }
}

impl RedisFanOut {
    pub async fn connect(client: Client, channel: impl Into<String>) -> Result<Self, BusError> {
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| BusError::Backend(error.to_string()))?;
        let channel = channel.into();
        info!(%channel, "connected Redis fan-out");

        Ok(Self {
            client,
            connection,
            channel,
        })
    }
}

#[async_trait]
impl FanOut for RedisFanOut {
    async fn publish(&self, payload: String) -> Result<usize, BusError> {
        let mut connection = self.connection.clone();
        connection
            .publish(&self.channel, payload)
            .await
            .map_err(|error| BusError::Backend(error.to_string()))
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|error| BusError::Backend(error.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|error| BusError::Backend(error.to_string()))?;

        let channel = self.channel.clone();
        let stream = pubsub.into_on_message().filter_map(move |message| {
            let payload = message
                .get_payload::<String>()
                .inspect_err(|error| warn!(%channel, %error, "dropping non-text fan-out message"))
                .ok();
            futures::future::ready(payload)
        });

        Ok(stream.boxed())
    }
}
