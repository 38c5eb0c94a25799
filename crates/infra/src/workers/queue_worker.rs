//! Background worker threads draining the task queue.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use payqueue_core::Clock;

use crate::queue::{QueueError, QueueItem, QueueService, QueueStatus};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// Thread name prefix, also used in logs
    pub name: String,
    /// When set, the first worker fails running items inactive for this long
    pub max_inactivity: Option<chrono::Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
            name: "queue-worker".to_string(),
            max_inactivity: Some(chrono::Duration::minutes(5)),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_inactivity(mut self, max_inactivity: Option<chrono::Duration>) -> Self {
        self.max_inactivity = max_inactivity;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerPoolStats {
    /// Items claimed and run to their next state
    pub processed: u64,
    pub completed: u64,
    /// Attempts that failed and were requeued
    pub retried: u64,
    pub failed: u64,
    pub aborted: u64,
    /// Running items failed for inactivity
    pub stale_reaped: u64,
    /// Claim or execution errors (storage, undecodable payloads, conflicts)
    pub errors: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl WorkerPoolStats {
    fn record(&mut self, item: &QueueItem) {
        self.processed += 1;
        match item.status {
            QueueStatus::Completed => self.completed += 1,
            QueueStatus::Queued => self.retried += 1,
            QueueStatus::Failed => self.failed += 1,
            QueueStatus::Aborted => self.aborted += 1,
            QueueStatus::InProgress => {}
        }
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerPoolStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown and wait for every worker to finish its
    /// current item.
    pub fn shutdown(self) -> WorkerPoolStats {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            if join.join().is_err() {
                error!("queue worker thread panicked");
            }
        }
        let stats = lock(&self.stats).clone();
        info!(
            processed = stats.processed,
            completed = stats.completed,
            failed = stats.failed,
            aborted = stats.aborted,
            "queue worker pool stopped"
        );
        stats
    }

    pub fn workers(&self) -> usize {
        self.joins.len()
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let mut stats = lock(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Fixed-size pool of threads looping on [`QueueService::claim_next`] and
/// [`QueueService::execute`].
#[derive(Debug)]
pub struct QueueWorkerPool;

impl QueueWorkerPool {
    /// Spawn `config.workers` threads. Threads started before a spawn failure
    /// are shut down again.
    pub fn spawn<C>(service: Arc<QueueService<C>>, config: WorkerPoolConfig) -> io::Result<WorkerPoolHandle>
    where
        C: Clock + 'static,
    {
        let stats = Arc::new(Mutex::new(WorkerPoolStats::default()));
        let mut handle = WorkerPoolHandle {
            shutdown: Vec::with_capacity(config.workers),
            joins: Vec::with_capacity(config.workers),
            stats: stats.clone(),
            started: Instant::now(),
        };

        for index in 0..config.workers.max(1) {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let worker = Worker {
                name: format!("{}-{index}", config.name),
                reaper: index == 0,
                service: service.clone(),
                config: config.clone(),
                stats: stats.clone(),
            };
            let spawned = thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run(shutdown_rx));
            match spawned {
                Ok(join) => {
                    handle.shutdown.push(shutdown_tx);
                    handle.joins.push(join);
                }
                Err(err) => {
                    error!(pool = %config.name, error = %err, "failed to spawn queue worker");
                    handle.shutdown();
                    return Err(err);
                }
            }
        }

        info!(pool = %config.name, workers = config.workers.max(1), "queue worker pool started");
        Ok(handle)
    }
}

struct Worker<C: Clock> {
    name: String,
    reaper: bool,
    service: Arc<QueueService<C>>,
    config: WorkerPoolConfig,
    stats: Arc<Mutex<WorkerPoolStats>>,
}

impl<C: Clock> Worker<C> {
    fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        debug!(worker = %self.name, "queue worker started");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            let busy = match self.service.claim_next() {
                Ok(Some(item)) => {
                    self.execute(item);
                    true
                }
                Ok(None) => {
                    self.reap_stale();
                    false
                }
                Err(err) => {
                    error!(worker = %self.name, error = %err, "failed to claim queue item");
                    lock(&self.stats).errors += 1;
                    false
                }
            };

            if !busy {
                match shutdown_rx.recv_timeout(self.config.poll_interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }
            }
        }

        debug!(worker = %self.name, "queue worker stopped");
    }

    fn execute(&self, item: QueueItem) {
        lock(&self.stats).current_running += 1;
        let result = self.service.execute(item);

        let mut stats = lock(&self.stats);
        stats.current_running = stats.current_running.saturating_sub(1);
        match result {
            Ok(item) => stats.record(&item),
            Err(QueueError::Conflict(id)) => {
                debug!(worker = %self.name, item_id = %id, "queue item changed while running");
                stats.errors += 1;
            }
            Err(err) => {
                warn!(worker = %self.name, error = %err, "queue item execution failed");
                stats.errors += 1;
            }
        }
    }

    fn reap_stale(&self) {
        let Some(max_inactivity) = self.config.max_inactivity.filter(|_| self.reaper) else {
            return;
        };
        match self.service.fail_stale(max_inactivity) {
            Ok(0) => {}
            Ok(reaped) => lock(&self.stats).stale_reaped += reaped as u64,
            Err(err) => {
                error!(worker = %self.name, error = %err, "failed to reap inactive queue items");
                lock(&self.stats).errors += 1;
            }
        }
    }
}

fn lock(stats: &Mutex<WorkerPoolStats>) -> MutexGuard<'_, WorkerPoolStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}
