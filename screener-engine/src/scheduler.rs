use crate::{
    config::SchedulerConfig,
    context::Shutdown,
    error::EngineError,
    queue::{Task, WorkQueue},
    store::SymbolRegistry,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Outcome of one [`Scheduler::dispatch_cycle`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct DispatchReport {
    pub cycle: u64,
    pub dispatched: usize,
    /// True when the active symbol set was empty and nothing was enqueued.
    pub skipped: bool,
    pub trimmed: u64,
    pub queue_len: u64,
}

/// Periodically enqueues one indicator recompute [`Task`] per active symbol.
pub struct Scheduler {
    registry: Arc<dyn SymbolRegistry>,
    queue: Arc<dyn WorkQueue>,
    config: SchedulerConfig,
    cycle: u64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("cycle", &self.cycle)
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn SymbolRegistry>,
        queue: Arc<dyn WorkQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            config,
            cycle: 0,
        }
    }

    /// Replace the queue contents with one task per active symbol.
    ///
    /// The previous cycle's unconsumed backlog is purged first, so a slow worker pool never
    /// accumulates stale tasks. The consumer group is ensured after the purge & before
    /// publishing. Does not wait for the tasks to be processed.
    pub async fn dispatch_cycle(&mut self) -> Result<DispatchReport, EngineError> {
        let symbols = self.registry.active_symbols().await?;
        if symbols.is_empty() {
            warn!("no active symbols, skipping dispatch");
            return Ok(DispatchReport {
                cycle: self.cycle,
                skipped: true,
                ..DispatchReport::default()
            });
        }

        self.cycle += 1;
        let now = Utc::now();
        let tasks = symbols
            .into_iter()
            .map(|symbol| Task::new(symbol, self.cycle, now))
            .collect::<Vec<_>>();

        self.queue.purge().await?;
        self.queue.ensure_group(&self.config.group).await?;
        let published = self.queue.publish_batch(&tasks).await?;
        let trimmed = self.queue.trim(self.config.max_queue_len).await?;
        let queue_len = self.queue.len().await?;

        let report = DispatchReport {
            cycle: self.cycle,
            dispatched: published.len(),
            skipped: false,
            trimmed,
            queue_len,
        };
        info!(
            cycle = report.cycle,
            dispatched = report.dispatched,
            trimmed = report.trimmed,
            queue_len = report.queue_len,
            "dispatched indicator tasks"
        );

        Ok(report)
    }

    /// Dispatch on a fixed interval until shutdown. An empty symbol set is retried after the
    /// configured empty backoff instead of waiting a full interval.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!(interval = ?self.config.interval, group = %self.config.group, "scheduler started");

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {}
            }

            match self.dispatch_cycle().await {
                Ok(report) if report.skipped => {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(self.config.empty_backoff) => {}
                    }
                    interval.reset_immediately();
                }
                Ok(_) => {}
                Err(error) => error!(%error, "dispatch cycle failed, retrying next interval"),
            }
        }

        info!(cycles = self.cycle, "scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        queue::{Delivery, QueueError, TaskId, memory::MemoryWorkQueue},
        store::memory::MemorySymbolRegistry,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use screener_data::Symbol;
    use std::time::Duration;

    /// Queue whose purge also drops every consumer group, recording the call order.
    #[derive(Default)]
    struct GroupDroppingQueue {
        inner: MemoryWorkQueue,
        groups: Mutex<Vec<String>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl GroupDroppingQueue {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl WorkQueue for GroupDroppingQueue {
        async fn ensure_group(&self, group: &str) -> Result<(), QueueError> {
            self.calls.lock().push("ensure_group");
            {
                let mut groups = self.groups.lock();
                if !groups.iter().any(|existing| existing == group) {
                    groups.push(group.to_string());
                }
                drop(groups);
            }
            self.inner.ensure_group(group).await
        }

        async fn publish(&self, task: &Task) -> Result<TaskId, QueueError> {
            self.inner.publish(task).await
        }

        async fn publish_batch(&self, tasks: &[Task]) -> Result<Vec<TaskId>, QueueError> {
            self.calls.lock().push("publish_batch");
            self.inner.publish_batch(tasks).await
        }

        async fn read(
            &self,
            group: &str,
            consumer: &str,
            block: Duration,
            count: usize,
        ) -> Result<Vec<Delivery>, QueueError> {
            if !self.groups.lock().iter().any(|existing| existing == group) {
                return Err(QueueError::GroupMissing(group.to_string()));
            }
            self.inner.read(group, consumer, block, count).await
        }

        async fn ack(&self, group: &str, id: &TaskId) -> Result<(), QueueError> {
            self.inner.ack(group, id).await
        }

        async fn purge(&self) -> Result<(), QueueError> {
            self.calls.lock().push("purge");
            self.groups.lock().clear();
            self.inner.purge().await
        }

        async fn trim(&self, max_len: usize) -> Result<u64, QueueError> {
            self.calls.lock().push("trim");
            self.inner.trim(max_len).await
        }

        async fn len(&self) -> Result<u64, QueueError> {
            self.inner.len().await
        }
    }

    fn symbols(count: usize) -> Vec<Symbol> {
        (0..count)
            .map(|index| Symbol::new(&format!("C{index}/USDT")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_cycle() {
        struct TestCase {
            active: usize,
            max_queue_len: usize,
            expected: DispatchReport,
        }

        let tests = vec![
            TestCase {
                // TC0: empty registry skips the cycle
                active: 0,
                max_queue_len: 100,
                expected: DispatchReport {
                    cycle: 0,
                    dispatched: 0,
                    skipped: true,
                    trimmed: 0,
                    queue_len: 0,
                },
            },
            TestCase {
                // TC1: one task per active symbol
                active: 3,
                max_queue_len: 100,
                expected: DispatchReport {
                    cycle: 1,
                    dispatched: 3,
                    skipped: false,
                    trimmed: 0,
                    queue_len: 3,
                },
            },
            TestCase {
                // TC2: queue trimmed to its cap
                active: 5,
                max_queue_len: 2,
                expected: DispatchReport {
                    cycle: 1,
                    dispatched: 5,
                    skipped: false,
                    trimmed: 3,
                    queue_len: 2,
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let registry = Arc::new(MemorySymbolRegistry::new(symbols(test.active)));
            let queue = Arc::new(MemoryWorkQueue::default());
            let mut scheduler = Scheduler::new(
                registry,
                queue,
                SchedulerConfig::default().with_max_queue_len(test.max_queue_len),
            );

            let actual = scheduler.dispatch_cycle().await.unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_dispatch_purges_previous_backlog() {
        let registry = Arc::new(MemorySymbolRegistry::new(symbols(4)));
        let queue = Arc::new(MemoryWorkQueue::default());
        let mut scheduler = Scheduler::new(
            registry.clone(),
            queue.clone(),
            SchedulerConfig::default(),
        );

        scheduler.dispatch_cycle().await.unwrap();
        registry.deactivate(&Symbol::new("C0/USDT").unwrap());
        let report = scheduler.dispatch_cycle().await.unwrap();

        assert_eq!(report.cycle, 2);
        assert_eq!(report.queue_len, 3);

        let group = SchedulerConfig::default().group;
        let deliveries = queue.read(&group, "c1", Duration::ZERO, 10).await.unwrap();
        assert!(deliveries.iter().all(|delivery| delivery.task.cycle == 2));
    }

    #[tokio::test]
    async fn test_dispatch_leaves_group_readable_after_purge() {
        let registry = Arc::new(MemorySymbolRegistry::new(symbols(3)));
        let queue = Arc::new(GroupDroppingQueue::default());
        let mut scheduler = Scheduler::new(registry, queue.clone(), SchedulerConfig::default());
        let group = SchedulerConfig::default().group;

        for cycle in 1..=2 {
            let report = scheduler.dispatch_cycle().await.unwrap();
            assert_eq!(report.cycle, cycle);

            let deliveries = queue.read(&group, "c1", Duration::ZERO, 10).await.unwrap();
            assert_eq!(deliveries.len(), 3);
            assert!(deliveries.iter().all(|delivery| delivery.task.cycle == cycle));
        }

        assert_eq!(
            queue.calls()[..4],
            ["purge", "ensure_group", "publish_batch", "trim"]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(MemorySymbolRegistry::new(symbols(2)));
        let queue = Arc::new(MemoryWorkQueue::default());
        let scheduler = Scheduler::new(
            registry,
            queue.clone(),
            SchedulerConfig::default().with_interval(Duration::from_millis(10)),
        );

        let (trigger, shutdown) = crate::context::shutdown_channel();
        let handle = tokio::spawn(scheduler.run(shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }
}
