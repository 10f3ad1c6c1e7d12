use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use screener_data::Symbol;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// In-process Work Queue with consumer groups & visibility timeout reclaim.
pub mod memory;

/// Redis Streams Work Queue.
pub mod redis;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum QueueError {
    #[error("consumer group does not exist: {0}")]
    GroupMissing(String),

    #[error("work queue backend error: {0}")]
    Backend(String),

    #[error("failed to decode task: {0}")]
    Decode(String),
}

/// Backend assigned identifier of a published [`Task`].
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, From, Deserialize, Serialize)]
pub struct TaskId(pub String);

/// Request to recompute the indicators of one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Task {
    pub symbol: Symbol,
    /// Scheduler cycle that dispatched the task.
    pub cycle: u64,
    pub dispatched_at: DateTime<Utc>,
}

impl Task {
    pub fn new(symbol: Symbol, cycle: u64, dispatched_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            cycle,
            dispatched_at,
        }
    }
}

/// A [`Task`] handed to a consumer. Unacknowledged deliveries are redelivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: TaskId,
    pub task: Task,
    /// Number of times this task has been delivered, starting at 1.
    pub delivery_count: u32,
}

/// At-least-once task queue with consumer group semantics.
///
/// Each task is delivered to exactly one consumer of a group per delivery. A delivery which is
/// not acknowledged within the visibility timeout may be claimed by any consumer of the group.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Create `group` if it does not exist. Idempotent.
    async fn ensure_group(&self, group: &str) -> Result<(), QueueError>;

    async fn publish(&self, task: &Task) -> Result<TaskId, QueueError>;

    async fn publish_batch(&self, tasks: &[Task]) -> Result<Vec<TaskId>, QueueError> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.publish(task).await?);
        }
        Ok(ids)
    }

    /// Read up to `count` deliveries for `consumer`, waiting at most `block` when none are
    /// available. Expired unacknowledged deliveries are reclaimed before new tasks are read.
    async fn read(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Acknowledge & delete a delivered task.
    async fn ack(&self, group: &str, id: &TaskId) -> Result<(), QueueError>;

    /// Drop every queued task. Consumer groups are kept.
    async fn purge(&self) -> Result<(), QueueError>;

    /// Evict the oldest tasks beyond `max_len`, returning how many were evicted (approximate
    /// for backends which trim lazily).
    async fn trim(&self, max_len: usize) -> Result<u64, QueueError>;

    /// Number of tasks currently held (queued or delivered but unacknowledged).
    async fn len(&self) -> Result<u64, QueueError>;
}
