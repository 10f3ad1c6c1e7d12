use super::{Delivery, QueueError, Task, TaskId, WorkQueue};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{collections::BTreeMap, time::Duration};
use tokio::{sync::Notify, time::Instant};
use tracing::debug;

#[derive(Debug)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct Group {
    /// Sequence of the last task handed out as new.
    last_delivered: u64,
    pending: BTreeMap<u64, Pending>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    tasks: BTreeMap<u64, Task>,
    groups: FnvHashMap<String, Group>,
}

/// [`WorkQueue`] held in process memory.
///
/// Mirrors Redis Streams consumer group semantics: a per group pending entries list tracks
/// unacknowledged deliveries, and deliveries idle for longer than the visibility timeout are
/// reclaimed by the next reader.
#[derive(Debug)]
pub struct MemoryWorkQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl MemoryWorkQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Number of delivered but unacknowledged tasks of `group`.
    pub fn pending(&self, group: &str) -> usize {
        self.state
            .lock()
            .groups
            .get(group)
            .map_or(0, |group| group.pending.len())
    }

    /// Claim expired & new tasks without waiting. Also returns when the earliest pending
    /// delivery of the group expires, so a blocked reader knows when to look again.
    fn try_read(
        &self,
        group_name: &str,
        consumer: &str,
        count: usize,
    ) -> Result<(Vec<Delivery>, Option<Instant>), QueueError> {
        let mut guard = self.state.lock();
        let State { tasks, groups, .. } = &mut *guard;
        let group = groups
            .get_mut(group_name)
            .ok_or_else(|| QueueError::GroupMissing(group_name.to_string()))?;

        let now = Instant::now();
        let mut deliveries = Vec::with_capacity(count);

        // Entries whose task was purged or trimmed can never be delivered again
        group.pending.retain(|seq, _| tasks.contains_key(seq));

        for (seq, pending) in group.pending.iter_mut() {
            if deliveries.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) < self.visibility_timeout {
                continue;
            }
            let Some(task) = tasks.get(seq) else {
                continue;
            };

            debug!(
                seq,
                from = %pending.consumer,
                to = consumer,
                "reclaiming expired delivery"
            );
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;
            deliveries.push(Delivery {
                id: TaskId(seq.to_string()),
                task: task.clone(),
                delivery_count: pending.delivery_count,
            });
        }

        let remaining = count.saturating_sub(deliveries.len());
        let fresh = tasks
            .range(group.last_delivered + 1..)
            .take(remaining)
            .map(|(seq, task)| (*seq, task.clone()))
            .collect::<Vec<_>>();

        for (seq, task) in fresh {
            group.last_delivered = seq;
            group.pending.insert(
                seq,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            deliveries.push(Delivery {
                id: TaskId(seq.to_string()),
                task,
                delivery_count: 1,
            });
        }

        let next_expiry = group
            .pending
            .values()
            .map(|pending| pending.delivered_at + self.visibility_timeout)
            .min();

        Ok((deliveries, next_expiry))
    }
}

fn parse_seq(id: &TaskId) -> Result<u64, QueueError> {
    id.0
        .parse()
        .map_err(|_| QueueError::Decode(format!("invalid task id {id}")))
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn ensure_group(&self, group: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, task: &Task) -> Result<TaskId, QueueError> {
        let seq = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.tasks.insert(seq, task.clone());
            seq
        };
        self.notify.notify_waiters();
        Ok(TaskId(seq.to_string()))
    }

    async fn read(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + block;

        loop {
            // Register interest before inspecting state so a concurrent publish is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (deliveries, next_expiry) = self.try_read(group, consumer, count.max(1))?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(deliveries);
            }

            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.clamp(now, deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, group: &str, id: &TaskId) -> Result<(), QueueError> {
        let seq = parse_seq(id)?;
        let mut state = self.state.lock();
        let Some(group_state) = state.groups.get_mut(group) else {
            return Err(QueueError::GroupMissing(group.to_string()));
        };

        if group_state.pending.remove(&seq).is_some() {
            state.tasks.remove(&seq);
        }
        Ok(())
    }

    async fn purge(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.tasks.clear();
        state
            .groups
            .values_mut()
            .for_each(|group| group.pending.clear());
        Ok(())
    }

    async fn trim(&self, max_len: usize) -> Result<u64, QueueError> {
        let mut state = self.state.lock();
        let mut evicted = 0;
        while state.tasks.len() > max_len {
            state.tasks.pop_first();
            evicted += 1;
        }
        Ok(evicted)
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().tasks.len() as u64)
    }
}
