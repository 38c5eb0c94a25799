//! Process wiring: storage, bus, queue, projections and workers.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::info;

use payqueue_core::{Clock, SystemClock};
use payqueue_events::ListenerBus;
use payqueue_infra::QueueConfig;
use payqueue_infra::projections::{RetentionJob, TransactionLogService, register_transaction_log_listeners};
use payqueue_infra::queue::{EnqueueOptions, QueueEvent, QueueItem, QueueService, QueueStats, QueueStore, TaskEnvironment, TaskRegistry};
use payqueue_infra::storage::{IndexedStorage, InMemoryIndexedStorage};
use payqueue_infra::tasks::{InMemoryOrderService, Notification, OrderService, OrderUpdateTask};
use payqueue_infra::workers::{QueueWorkerPool, WorkerPoolStats};

/// Everything a worker process runs.
pub struct App<C: Clock = SystemClock> {
    pub config: QueueConfig,
    pub queue: Arc<QueueService<C>>,
    pub logs: Arc<TransactionLogService<C>>,
    pub orders: Arc<InMemoryOrderService>,
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub enqueued: usize,
    pub workers: WorkerPoolStats,
    pub queue: QueueStats,
    pub transaction_logs: usize,
    pub retention_deleted: usize,
}

impl App<SystemClock> {
    pub fn build(config: QueueConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone + 'static> App<C> {
    pub fn with_clock(config: QueueConfig, clock: C) -> anyhow::Result<Self> {
        let storage: Arc<dyn IndexedStorage> = Arc::new(InMemoryIndexedStorage::new());
        let bus = ListenerBus::<QueueEvent>::arc();

        let logs = Arc::new(
            TransactionLogService::new(storage.clone(), clock.clone())
                .context("failed to register transaction log storage")?,
        );
        register_transaction_log_listeners(&bus, logs.clone());

        let registry = TaskRegistry::new()
            .with::<OrderUpdateTask>()
            .context("failed to register tasks")?;

        let orders = Arc::new(InMemoryOrderService::new());
        let order_service: Arc<dyn OrderService> = orders.clone();
        let environment = TaskEnvironment::new().with(order_service);

        let store = QueueStore::new(storage).context("failed to register queue storage")?;
        let queue = QueueService::new(store, Arc::new(registry), bus, clock)
            .with_environment(Arc::new(environment))
            .with_default_max_retries(config.max_retries);

        Ok(Self {
            config,
            queue: Arc::new(queue),
            logs,
            orders,
        })
    }

    /// Enqueue one order update per notification. Every referenced order is
    /// made known to the in-memory order backend first.
    pub fn submit(&self, notifications: &[Notification]) -> anyhow::Result<Vec<QueueItem>> {
        notifications
            .iter()
            .map(|notification| {
                self.orders.add_order(notification.merchant_reference.as_str());
                let task = OrderUpdateTask::from(notification.clone());
                self.queue
                    .enqueue(
                        &task,
                        EnqueueOptions::new().with_correlation_tag(notification.merchant_reference.as_str()),
                    )
                    .with_context(|| {
                        format!("failed to enqueue notification {}", notification.psp_reference)
                    })
            })
            .collect()
    }

    /// Run the worker pool until nothing is pending, then apply retention.
    pub fn run(&self, enqueued: usize, timeout: Duration) -> anyhow::Result<RunSummary> {
        let pool = QueueWorkerPool::spawn(self.queue.clone(), self.config.worker_pool_config())
            .context("failed to start worker pool")?;

        let deadline = Instant::now() + timeout;
        let drained = loop {
            let stats = self.queue.stats()?;
            if stats.pending() == 0 {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            std::thread::sleep(self.config.poll_interval);
        };
        let workers = pool.shutdown();
        if !drained {
            bail!("queue was not drained within {timeout:?}");
        }

        let retention = RetentionJob::new(self.logs.clone(), self.config.retention_policy());
        let retention_deleted = retention.run_to_exhaustion(self.logs.now())?;

        let summary = RunSummary {
            enqueued,
            workers,
            queue: self.queue.stats()?,
            transaction_logs: self.logs.count(None)?,
            retention_deleted,
        };
        info!(
            enqueued = summary.enqueued,
            completed = summary.queue.completed,
            failed = summary.queue.failed,
            aborted = summary.queue.aborted,
            transaction_logs = summary.transaction_logs,
            "run finished"
        );
        Ok(summary)
    }
}

/// Read a JSON array of notifications.
pub fn load_notifications(path: &Path) -> anyhow::Result<Vec<Notification>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid notifications in {}", path.display()))
}

/// A small demo batch: authorisations and captures for a few orders.
pub fn sample_notifications() -> Vec<Notification> {
    let mut batch = Vec::new();
    for (i, method) in ["visa", "mc", "ideal", "paypal"].into_iter().enumerate() {
        let order = format!("ORD-{:04}", 1000 + i);
        batch.push(Notification {
            merchant_reference: order.clone(),
            psp_reference: format!("PSP-A{i}"),
            event_code: "AUTHORISATION".to_string(),
            payment_method: Some(method.to_string()),
            success: true,
            reason: None,
        });
        batch.push(Notification {
            merchant_reference: order,
            psp_reference: format!("PSP-C{i}"),
            event_code: "CAPTURE".to_string(),
            payment_method: Some(method.to_string()),
            success: i % 2 == 0,
            reason: (i % 2 == 1).then(|| "capture refused".to_string()),
        });
    }
    batch
}
