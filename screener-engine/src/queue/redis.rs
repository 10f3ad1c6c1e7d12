use super::{Delivery, QueueError, Task, TaskId, WorkQueue};
use crate::config::QueueConfig;
use async_trait::async_trait;
use chrono::DateTime;
use redis::{
    AsyncCommands, Client, RedisError,
    aio::MultiplexedConnection,
    streams::{
        StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply,
    },
};
use screener_data::Symbol;
use std::time::Duration;
use tracing::{debug, info};

const FIELD_SYMBOL: &str = "symbol";
const FIELD_CYCLE: &str = "cycle";
const FIELD_DISPATCHED_AT: &str = "dispatched_at";

/// [`WorkQueue`] backed by a Redis Stream & consumer group.
///
/// Blocking reads hold the connection, so every consumer should own its own [`RedisWorkQueue`].
#[derive(Clone)]
pub struct RedisWorkQueue {
    connection: MultiplexedConnection,
    config: QueueConfig,
}

impl std::fmt::Debug for RedisWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWorkQueue")
            .field("config", &self.config)
            .finish()
    }
}

impl RedisWorkQueue {
    pub async fn connect(client: &Client, config: QueueConfig) -> Result<Self, QueueError> {
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))?;
        info!(stream = %config.stream_key, "connected Redis work queue");
        Ok(Self { connection, config })
    }

    fn key(&self) -> &str {
        &self.config.stream_key
    }
}

fn queue_error(group: &str, error: RedisError) -> QueueError {
    match error.code() {
        Some("NOGROUP") => QueueError::GroupMissing(group.to_string()),
        _ => QueueError::Backend(error.to_string()),
    }
}

fn encode(task: &Task) -> [(&'static str, String); 3] {
    [
        (FIELD_SYMBOL, task.symbol.to_string()),
        (FIELD_CYCLE, task.cycle.to_string()),
        (
            FIELD_DISPATCHED_AT,
            task.dispatched_at.timestamp_millis().to_string(),
        ),
    ]
}

fn decode(entry: &StreamId) -> Result<Task, QueueError> {
    let field = |name: &str| {
        entry
            .get::<String>(name)
            .ok_or_else(|| QueueError::Decode(format!("entry {} missing field {name}", entry.id)))
    };

    let symbol = Symbol::new(&field(FIELD_SYMBOL)?)
        .map_err(|error| QueueError::Decode(error.to_string()))?;
    let cycle = field(FIELD_CYCLE)?
        .parse::<u64>()
        .map_err(|error| QueueError::Decode(error.to_string()))?;
    let dispatched_at = field(FIELD_DISPATCHED_AT)?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| QueueError::Decode(format!("entry {} has invalid dispatch time", entry.id)))?;

    Ok(Task::new(symbol, cycle, dispatched_at))
}

impl RedisWorkQueue {
    /// `XPENDING` + `XCLAIM` deliveries idle for longer than the visibility timeout.
    async fn reclaim(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut connection = self.connection.clone();
        let visibility_ms = self.config.visibility_timeout.as_millis() as usize;

        let pending: StreamPendingCountReply = connection
            .xpending_count(self.key(), group, "-", "+", count)
            .await
            .map_err(|error| queue_error(group, error))?;

        let expired = pending
            .ids
            .iter()
            .filter(|entry| entry.last_delivered_ms >= visibility_ms)
            .map(|entry| (entry.id.clone(), entry.times_delivered))
            .collect::<Vec<_>>();

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let ids = expired.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>();
        let claimed: StreamClaimReply = connection
            .xclaim(self.key(), group, consumer, visibility_ms, ids.as_slice())
            .await
            .map_err(|error| queue_error(group, error))?;

        claimed
            .ids
            .iter()
            .map(|entry| {
                let delivered = expired
                    .iter()
                    .find(|(id, _)| *id == entry.id)
                    .map_or(1, |(_, count)| *count as u32);
                debug!(id = %entry.id, consumer, "reclaimed expired delivery");
                Ok(Delivery {
                    id: TaskId(entry.id.clone()),
                    task: decode(entry)?,
                    delivery_count: delivered + 1,
                })
            })
            .collect()
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn ensure_group(&self, group: &str) -> Result<(), QueueError> {
        let mut connection = self.connection.clone();
        let created: Result<(), RedisError> = connection
            .xgroup_create_mkstream(self.key(), group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.key(), group, "created consumer group");
                Ok(())
            }
            Err(error) if error.code() == Some("BUSYGROUP") => Ok(()),
            Err(error) => Err(QueueError::Backend(error.to_string())),
        }
    }

    async fn publish(&self, task: &Task) -> Result<TaskId, QueueError> {
        let mut connection = self.connection.clone();
        let id: String = connection
            .xadd(self.key(), "*", &encode(task))
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))?;
        Ok(TaskId(id))
    }

    async fn publish_batch(&self, tasks: &[Task]) -> Result<Vec<TaskId>, QueueError> {
        let mut pipe = redis::pipe();
        for task in tasks {
            pipe.xadd(self.key(), "*", &encode(task));
        }

        let mut connection = self.connection.clone();
        let ids: Vec<String> = pipe
            .query_async(&mut connection)
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))?;
        Ok(ids.into_iter().map(TaskId).collect())
    }

    async fn read(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let count = count.max(1);
        let reclaimed = self.reclaim(group, consumer, count).await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        // BLOCK 0 waits forever, so a zero block is a non-blocking read
        if !block.is_zero() {
            options = options.block(block.as_millis() as usize);
        }

        let mut connection = self.connection.clone();
        let reply: Option<StreamReadReply> = connection
            .xread_options(&[self.key()], &[">"], &options)
            .await
            .map_err(|error| queue_error(group, error))?;

        reply
            .map(|reply| reply.keys)
            .unwrap_or_default()
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| {
                Ok(Delivery {
                    id: TaskId(entry.id.clone()),
                    task: decode(entry)?,
                    delivery_count: 1,
                })
            })
            .collect()
    }

    async fn ack(&self, group: &str, id: &TaskId) -> Result<(), QueueError> {
        let mut connection = self.connection.clone();
        let _: () = redis::pipe()
            .xack(self.key(), group, &[id.0.as_str()])
            .ignore()
            .xdel(self.key(), &[id.0.as_str()])
            .ignore()
            .query_async(&mut connection)
            .await
            .map_err(|error| queue_error(group, error))?;
        Ok(())
    }

    /// `XTRIM MAXLEN 0`: the stream key & its consumer groups survive.
    async fn purge(&self) -> Result<(), QueueError> {
        let mut connection = self.connection.clone();
        let purged: u64 = connection
            .xtrim(self.key(), StreamMaxlen::Equals(0))
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))?;
        debug!(stream = %self.key(), purged, "purged work queue");
        Ok(())
    }

    async fn trim(&self, max_len: usize) -> Result<u64, QueueError> {
        let mut connection = self.connection.clone();
        let evicted: u64 = connection
            .xtrim(self.key(), StreamMaxlen::Approx(max_len))
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))?;
        Ok(evicted)
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut connection = self.connection.clone();
        connection
            .xlen(self.key())
            .await
            .map_err(|error| QueueError::Backend(error.to_string()))
    }
}
