//! Queue service: enqueue, claim, execute.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use payqueue_core::{Clock, QueueItemId, SystemClock};
use payqueue_events::{Event, EventBus};

use super::error::QueueError;
use super::events::{QueueEvent, QueueEventKind};
use super::lifecycle::{self, Transition};
use super::registry::TaskRegistry;
use super::store::QueueStore;
use super::task::{ProgressSink, Task, TaskContext, TaskEnvironment, TaskError};
use super::types::{EnqueueOptions, QueueItem, QueueStats, QueueStatus};

/// Retries granted to items enqueued without an explicit `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Candidates read per claim attempt.
const CLAIM_BATCH: usize = 8;

/// Items reaped per `fail_stale` round.
const STALE_BATCH: usize = 100;

/// Failure description of items failed by [`QueueService::fail_stale`].
pub const INACTIVE_REASON: &str = "task became inactive";

/// Task execution queue.
///
/// Owns the item store, the task registry and the event bus the lifecycle
/// events go to. Every state change is persisted first and published second;
/// listener failures never undo a persisted transition.
///
/// `claim_next` is safe to call from many threads: claims go through a
/// conditional write on the item status, so each item is handed to exactly
/// one caller.
pub struct QueueService<C: Clock = SystemClock> {
    store: QueueStore,
    registry: Arc<TaskRegistry>,
    bus: Arc<dyn EventBus<QueueEvent>>,
    environment: Arc<TaskEnvironment>,
    clock: C,
    default_max_retries: u32,
}

impl<C: Clock> core::fmt::Debug for QueueService<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueService")
            .field("registry", &self.registry)
            .field("default_max_retries", &self.default_max_retries)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> QueueService<C> {
    pub fn new(
        store: QueueStore,
        registry: Arc<TaskRegistry>,
        bus: Arc<dyn EventBus<QueueEvent>>,
        clock: C,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            environment: Arc::new(TaskEnvironment::new()),
            clock,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_environment(mut self, environment: Arc<TaskEnvironment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Persist `task` as a new `queued` item and publish `Created`.
    pub fn enqueue<T: Task>(&self, task: &T, options: EnqueueOptions) -> Result<QueueItem, QueueError> {
        let payload = self.registry.encode(task)?;
        if let Some(parent) = options.parent_id {
            self.store.get(parent)?.ok_or(QueueError::NotFound(parent))?;
        }

        let now = self.clock.now();
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries);
        let mut item = QueueItem::new(T::TYPE, payload, max_retries, now)
            .with_parent(options.parent_id)
            .with_correlation_tag(options.correlation_tag)
            .with_transaction(task.transaction_data());
        let id = self.store.insert(&mut item)?;

        info!(
            item_id = %id,
            task_type = T::TYPE,
            parent_id = ?item.parent_id,
            max_retries,
            "queue item enqueued"
        );

        self.publish(&QueueEvent::new(QueueEventKind::Created, item.clone(), now));
        Ok(item)
    }

    /// Claim the oldest waiting item and move it to `in_progress`.
    ///
    /// Returns `None` when nothing is waiting. A candidate taken by another
    /// worker in the meantime is skipped.
    pub fn claim_next(&self) -> Result<Option<QueueItem>, QueueError> {
        loop {
            let candidates = self.store.next_queued(CLAIM_BATCH)?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for candidate in candidates {
                let transition = lifecycle::start(&candidate, self.clock.now())?;
                if self.store.swap_status(&transition.item, QueueStatus::Queued)? {
                    debug!(item_id = ?transition.item.id, task_type = %transition.item.task_type, "queue item claimed");
                    self.publish(&transition.event);
                    return Ok(Some(transition.item));
                }
                debug!(item_id = ?candidate.id, "lost claim race");
            }
        }
    }

    /// Run a claimed item to its next persisted state.
    ///
    /// Success completes the item; an abort (or a failed attempt with no
    /// retries left) finishes it; any other failure requeues it. An abort
    /// that cannot be cascaded to queued children is logged and the aborted
    /// item is still returned. A panicking
    /// task counts as a failed attempt. A payload that cannot be decoded
    /// leaves the item untouched and returns [`QueueError::Deserialization`].
    pub fn execute(&self, item: QueueItem) -> Result<QueueItem, QueueError> {
        let id = item.id.ok_or(QueueError::NotPersisted)?;
        if item.status != QueueStatus::InProgress {
            return Err(lifecycle::TransitionError::Illegal {
                from: item.status,
                action: "execute",
            }
            .into());
        }

        let task = match self.registry.decode(&item.task_type, &item.task) {
            Ok(task) => task,
            Err(source) => {
                error!(item_id = %id, task_type = %item.task_type, error = %source, "cannot decode queued task");
                return Err(QueueError::Deserialization { id, source });
            }
        };

        let mut ctx = TaskContext::new(item, &self.environment, self);
        let outcome = catch_unwind(AssertUnwindSafe(|| task.run(&mut ctx)))
            .unwrap_or_else(|panic| Err(TaskError::execution(panic_message(panic.as_ref()))));
        let latest = ctx.into_item();

        let now = self.clock.now();
        let transition = match &outcome {
            Ok(()) => lifecycle::complete(&latest, now)?,
            Err(TaskError::Abort(reason)) => lifecycle::abort(&latest, reason, now)?,
            Err(TaskError::Execution(reason)) => lifecycle::fail(&latest, reason, now)?,
        };
        let finished = self.commit_running(transition, &latest)?;

        match finished.status {
            QueueStatus::Completed => info!(item_id = %id, task_type = %finished.task_type, "queue item completed"),
            QueueStatus::Queued => warn!(
                item_id = %id,
                task_type = %finished.task_type,
                retries = finished.retries,
                max_retries = finished.max_retries,
                error = finished.failure_description.as_deref().unwrap_or_default(),
                "queue item failed, retry scheduled"
            ),
            QueueStatus::Failed => error!(
                item_id = %id,
                task_type = %finished.task_type,
                retries = finished.retries,
                error = finished.failure_description.as_deref().unwrap_or_default(),
                "queue item failed permanently"
            ),
            QueueStatus::Aborted => {
                warn!(
                    item_id = %id,
                    task_type = %finished.task_type,
                    reason = finished.failure_description.as_deref().unwrap_or_default(),
                    "queue item aborted"
                );
                if let Err(err) = self.abort_queued_children(id) {
                    error!(item_id = %id, error = %err, "failed to abort queued children");
                }
            }
            QueueStatus::InProgress => {}
        }

        Ok(finished)
    }

    /// Claim and execute one item, if any is waiting.
    pub fn process_next(&self) -> Result<Option<QueueItem>, QueueError> {
        match self.claim_next()? {
            Some(item) => self.execute(item).map(Some),
            None => Ok(None),
        }
    }

    /// Fail running items with no activity for `max_inactivity`.
    ///
    /// Reaped items go through the normal failure path, so they are retried
    /// while retries remain. Returns how many items were reaped.
    pub fn fail_stale(&self, max_inactivity: Duration) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let cutoff = now - max_inactivity;
        let mut reaped = 0;

        loop {
            let stale = self.store.stale(cutoff, STALE_BATCH)?;
            let batch_len = stale.len();
            let mut progressed = 0;

            for item in stale {
                let transition = lifecycle::fail(&item, INACTIVE_REASON, now)?;
                match self.commit_running(transition, &item) {
                    Ok(failed) => {
                        warn!(item_id = ?failed.id, status = %failed.status, "reaped inactive queue item");
                        progressed += 1;
                    }
                    Err(QueueError::Conflict(id)) => {
                        debug!(item_id = %id, "inactive item changed before reaping");
                    }
                    Err(err) => return Err(err),
                }
            }

            reaped += progressed;
            if batch_len < STALE_BATCH || progressed == 0 {
                return Ok(reaped);
            }
        }
    }

    pub fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueError> {
        Ok(self.store.get(id)?)
    }

    pub fn find_by_correlation_tag(&self, tag: &str) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.find_by_correlation_tag(tag)?)
    }

    pub fn find_children(&self, parent: QueueItemId) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.find_children(parent, None)?)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.store.stats()?)
    }

    /// Abort every still-waiting descendant of `parent`.
    fn abort_queued_children(&self, parent: QueueItemId) -> Result<(), QueueError> {
        let mut pending = vec![parent];
        while let Some(current) = pending.pop() {
            for child in self.store.find_children(current, Some(QueueStatus::Queued))? {
                let reason = format!("parent queue item {current} was aborted");
                let transition = lifecycle::abort(&child, &reason, self.clock.now())?;
                if self.store.swap_status(&transition.item, QueueStatus::Queued)? {
                    if let Some(child_id) = transition.item.id {
                        info!(item_id = %child_id, parent_id = %current, "queued child aborted with its parent");
                        pending.push(child_id);
                    }
                    self.publish(&transition.event);
                } else {
                    debug!(item_id = ?child.id, "child left the queue before it could be aborted");
                }
            }
        }
        Ok(())
    }

    /// Persist a transition of a running item, guarded on the attempt that
    /// produced it, then publish its event.
    fn commit_running(&self, transition: Transition, previous: &QueueItem) -> Result<QueueItem, QueueError> {
        let id = transition.item.id.ok_or(QueueError::NotPersisted)?;
        if !self.store.swap_running(&transition.item, previous)? {
            return Err(QueueError::Conflict(id));
        }
        self.publish(&transition.event);
        Ok(transition.item)
    }

    fn publish(&self, event: &QueueEvent) {
        let report = self.bus.publish(event);
        if !report.is_clean() {
            debug!(
                event_type = event.event_type(),
                item_id = ?event.item_id(),
                failed = report.failures.len(),
                "queue event had failing listeners"
            );
        }
    }
}

impl<C: Clock> ProgressSink for QueueService<C> {
    fn progress(&self, item: &QueueItem, base_points: u32) -> Result<QueueItem, QueueError> {
        let transition = lifecycle::report_progress(item, base_points, self.clock.now())?;
        debug!(item_id = ?item.id, progress = transition.item.progress_base_points, "queue item progress");
        self.commit_running(transition, item)
    }

    fn keep_alive(&self, item: &QueueItem) -> Result<QueueItem, QueueError> {
        let next = lifecycle::keep_alive(item, self.clock.now())?;
        let id = next.id.ok_or(QueueError::NotPersisted)?;
        if !self.store.swap_running(&next, item)? {
            return Err(QueueError::Conflict(id));
        }
        Ok(next)
    }
}

fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{DateTime, TimeZone, Utc};
    use payqueue_core::ManualClock;
    use payqueue_events::{ListenerBus, listener_fn};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::queue::lifecycle::TransitionError;
    use crate::queue::types::MAX_PROGRESS;
    use crate::storage::{Condition, IndexedStorage, InMemoryIndexedStorage, QueryFilter, RawRecord, StorageError};
    use payqueue_core::{EntityId, IndexMap};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "mode", rename_all = "snake_case")]
    enum Scripted {
        Succeed,
        /// Fails until the item has `times` recorded failures.
        FailTimes { times: u32 },
        Abort,
        Panic,
        Progress { steps: Vec<u32> },
    }

    impl Task for Scripted {
        const TYPE: &'static str = "scripted";

        fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
            match self {
                Scripted::Succeed => Ok(()),
                Scripted::FailTimes { times } => {
                    let retries = ctx.item().retries;
                    if retries < *times {
                        Err(TaskError::execution(format!("attempt {} failed", retries + 1)))
                    } else {
                        Ok(())
                    }
                }
                Scripted::Abort => Err(TaskError::abort("order not found")),
                Scripted::Panic => panic!("task exploded"),
                Scripted::Progress { steps } => {
                    for step in steps {
                        ctx.report_progress(*step)?;
                    }
                    Ok(())
                }
            }
        }
    }

    /// In-memory storage whose queries fail once armed.
    #[derive(Default)]
    struct FlakyStorage {
        inner: InMemoryIndexedStorage,
        broken: AtomicBool,
    }

    impl FlakyStorage {
        fn check(&self) -> Result<(), StorageError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(StorageError::Poisoned)
            } else {
                Ok(())
            }
        }
    }

    impl IndexedStorage for FlakyStorage {
        fn register(&self, entity_type: &str, index_map: IndexMap) -> Result<(), StorageError> {
            self.inner.register(entity_type, index_map)
        }

        fn insert(&self, entity_type: &str, record: RawRecord) -> Result<EntityId, StorageError> {
            self.inner.insert(entity_type, record)
        }

        fn update(&self, entity_type: &str, record: RawRecord) -> Result<(), StorageError> {
            self.inner.update(entity_type, record)
        }

        fn update_if(
            &self,
            entity_type: &str,
            record: RawRecord,
            conditions: &[Condition],
        ) -> Result<bool, StorageError> {
            self.inner.update_if(entity_type, record, conditions)
        }

        fn get(&self, entity_type: &str, id: EntityId) -> Result<Option<RawRecord>, StorageError> {
            self.inner.get(entity_type, id)
        }

        fn find(&self, entity_type: &str, filter: &QueryFilter) -> Result<Vec<RawRecord>, StorageError> {
            self.check()?;
            self.inner.find(entity_type, filter)
        }

        fn count(&self, entity_type: &str, filter: &QueryFilter) -> Result<usize, StorageError> {
            self.check()?;
            self.inner.count(entity_type, filter)
        }

        fn delete_matching(
            &self,
            entity_type: &str,
            filter: &QueryFilter,
            limit: usize,
        ) -> Result<usize, StorageError> {
            self.check()?;
            self.inner.delete_matching(entity_type, filter, limit)
        }
    }

    type Recorded = Arc<Mutex<Vec<(QueueEventKind, QueueItem)>>>;

    struct Harness {
        service: QueueService<Arc<ManualClock>>,
        clock: Arc<ManualClock>,
        events: Recorded,
    }

    impl Harness {
        fn kinds(&self) -> Vec<QueueEventKind> {
            self.events.lock().unwrap().iter().map(|(k, _)| *k).collect()
        }

        fn count(&self, kind: QueueEventKind) -> usize {
            self.kinds().into_iter().filter(|k| *k == kind).count()
        }

        fn enqueue(&self, task: Scripted, max_retries: u32) -> QueueItem {
            self.service
                .enqueue(&task, EnqueueOptions::new().with_max_retries(max_retries))
                .unwrap()
        }

        fn drain(&self) {
            while self.service.process_next().unwrap().is_some() {
                self.clock.advance(Duration::seconds(1));
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        harness_on(Arc::new(InMemoryIndexedStorage::new()))
    }

    fn harness_on(storage: Arc<dyn IndexedStorage>) -> Harness {
        let bus = ListenerBus::<QueueEvent>::arc();
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        for kind in QueueEventKind::ALL {
            let events = events.clone();
            bus.subscribe(
                kind,
                Arc::new(listener_fn("recorder", move |e: &QueueEvent| {
                    events.lock().unwrap().push((e.kind(), e.item().clone()));
                    Ok(())
                })),
            );
        }

        let registry = TaskRegistry::new().with::<Scripted>().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let service = QueueService::new(
            QueueStore::new(storage).unwrap(),
            Arc::new(registry),
            bus,
            clock.clone(),
        );
        Harness {
            service,
            clock,
            events,
        }
    }

    #[test]
    fn enqueue_persists_a_queued_item_and_publishes_created() {
        let h = harness();
        let item = h.enqueue(Scripted::Succeed, 3);

        assert!(item.id.is_some());
        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.max_retries, 3);
        assert_eq!(item.created_at, t0());
        assert_eq!(h.service.get(item.id.unwrap()).unwrap(), Some(item.clone()));

        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, QueueEventKind::Created);
        assert_eq!(events[0].1.id, item.id);
    }

    #[test]
    fn enqueue_uses_the_default_retry_budget() {
        let h = harness();
        let item = h.service.enqueue(&Scripted::Succeed, EnqueueOptions::new()).unwrap();
        assert_eq!(item.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn enqueue_rejects_a_missing_parent() {
        let h = harness();
        let missing = QueueItemId::new(99);
        let err = h
            .service
            .enqueue(&Scripted::Succeed, EnqueueOptions::new().with_parent(missing))
            .unwrap_err();
        assert_eq!(err, QueueError::NotFound(missing));
        assert!(h.kinds().is_empty());
    }

    #[test]
    fn claim_next_never_hands_out_the_same_item_twice() {
        let h = harness();
        h.enqueue(Scripted::Succeed, 0);

        let claimed = h.service.claim_next().unwrap().unwrap();
        assert_eq!(claimed.status, QueueStatus::InProgress);
        assert_eq!(claimed.started_at, Some(t0()));
        assert_eq!(h.service.claim_next().unwrap(), None);
    }

    #[test]
    fn zero_retries_fail_permanently_on_first_error() {
        let h = harness();
        h.enqueue(Scripted::FailTimes { times: 1 }, 0);

        let item = h.service.process_next().unwrap().unwrap();

        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retries, 1);
        assert_eq!(h.count(QueueEventKind::RetryScheduled), 0);
        assert_eq!(h.count(QueueEventKind::Finished), 1);
    }

    #[test]
    fn two_failures_then_success_completes_within_budget() {
        let h = harness();
        let item = h.enqueue(Scripted::FailTimes { times: 2 }, 2);

        h.drain();

        let done = h.service.get(item.id.unwrap()).unwrap().unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert_eq!(done.retries, 2);
        assert_eq!(done.progress_base_points, MAX_PROGRESS);
        assert_eq!(h.count(QueueEventKind::RetryScheduled), 2);
        assert_eq!(h.count(QueueEventKind::Finished), 1);
    }

    #[test]
    fn retried_items_wait_behind_items_already_queued() {
        let h = harness();
        let flaky = h.enqueue(Scripted::FailTimes { times: 1 }, 1);
        let steady = h.enqueue(Scripted::Succeed, 0);

        h.clock.advance(Duration::seconds(1));
        let first = h.service.process_next().unwrap().unwrap();
        assert_eq!(first.id, flaky.id);
        assert_eq!(first.status, QueueStatus::Queued);

        let second = h.service.claim_next().unwrap().unwrap();
        assert_eq!(second.id, steady.id);
    }

    #[test]
    fn abort_is_final_and_cascades_to_queued_children() {
        let h = harness();
        let parent = h.enqueue(Scripted::Abort, 5);
        let parent_id = parent.id.unwrap();
        let child = h
            .service
            .enqueue(&Scripted::Succeed, EnqueueOptions::new().with_parent(parent_id))
            .unwrap();
        let grandchild = h
            .service
            .enqueue(&Scripted::Succeed, EnqueueOptions::new().with_parent(child.id.unwrap()))
            .unwrap();

        let aborted = h.service.process_next().unwrap().unwrap();

        assert_eq!(aborted.id, parent.id);
        assert_eq!(aborted.status, QueueStatus::Aborted);
        assert_eq!(aborted.retries, 0);
        assert_eq!(aborted.failure_description.as_deref(), Some("order not found"));
        for id in [child.id, grandchild.id] {
            let item = h.service.get(id.unwrap()).unwrap().unwrap();
            assert_eq!(item.status, QueueStatus::Aborted);
        }
        assert_eq!(h.count(QueueEventKind::Aborted), 3);
        assert_eq!(h.service.process_next().unwrap(), None);
    }

    #[test]
    fn failed_cascade_still_reports_the_abort() {
        let storage = Arc::new(FlakyStorage::default());
        let h = harness_on(storage.clone());
        let parent = h.enqueue(Scripted::Abort, 0);
        let child = h
            .service
            .enqueue(&Scripted::Succeed, EnqueueOptions::new().with_parent(parent.id.unwrap()))
            .unwrap();
        let claimed = h.service.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, parent.id);

        storage.broken.store(true, Ordering::SeqCst);
        let aborted = h.service.execute(claimed).unwrap();
        storage.broken.store(false, Ordering::SeqCst);

        assert_eq!(aborted.status, QueueStatus::Aborted);
        assert_eq!(h.count(QueueEventKind::Aborted), 1);
        let child = h.service.get(child.id.unwrap()).unwrap().unwrap();
        assert_eq!(child.status, QueueStatus::Queued);
    }

    #[test]
    fn a_panicking_task_counts_as_a_failed_attempt() {
        let h = harness();
        h.enqueue(Scripted::Panic, 1);

        let item = h.service.process_next().unwrap().unwrap();

        assert_eq!(item.status, QueueStatus::Queued);
        assert_eq!(item.retries, 1);
        assert!(item
            .failure_description
            .as_deref()
            .unwrap()
            .contains("task exploded"));
    }

    #[test]
    fn undecodable_payload_leaves_the_item_in_place() {
        let h = harness();
        let mut item = h.enqueue(Scripted::Succeed, 0);
        item.task = serde_json::json!({ "mode": "teleport" });
        h.service.store().update(&item).unwrap();

        let claimed = h.service.claim_next().unwrap().unwrap();
        let err = h.service.execute(claimed.clone()).unwrap_err();

        assert!(matches!(err, QueueError::Deserialization { id, .. } if Some(id) == item.id));
        assert_eq!(h.service.get(item.id.unwrap()).unwrap(), Some(claimed));
    }

    #[test]
    fn progress_is_persisted_and_published() {
        let h = harness();
        let item = h.enqueue(Scripted::Progress { steps: vec![2_500, 7_500] }, 0);

        h.service.process_next().unwrap();

        let progress: Vec<u32> = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == QueueEventKind::Progress)
            .map(|(_, i)| i.progress_base_points)
            .collect();
        assert_eq!(progress, vec![2_500, 7_500]);
        let done = h.service.get(item.id.unwrap()).unwrap().unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
    }

    #[test]
    fn regressing_progress_fails_the_attempt() {
        let h = harness();
        h.enqueue(Scripted::Progress { steps: vec![5_000, 1_000] }, 0);

        let item = h.service.process_next().unwrap().unwrap();

        assert_eq!(item.status, QueueStatus::Failed);
        assert!(item
            .failure_description
            .as_deref()
            .unwrap()
            .contains("progress cannot go back"));
    }

    #[test]
    fn inactive_items_are_reaped_through_the_retry_path() {
        let h = harness();
        let retried = h.enqueue(Scripted::Succeed, 1);
        let failed = h.enqueue(Scripted::Succeed, 0);
        h.service.claim_next().unwrap().unwrap();
        h.service.claim_next().unwrap().unwrap();

        h.clock.advance(Duration::minutes(4));
        assert_eq!(h.service.fail_stale(Duration::minutes(5)).unwrap(), 0);

        h.clock.advance(Duration::minutes(2));
        assert_eq!(h.service.fail_stale(Duration::minutes(5)).unwrap(), 2);

        let retried = h.service.get(retried.id.unwrap()).unwrap().unwrap();
        assert_eq!(retried.status, QueueStatus::Queued);
        assert_eq!(retried.failure_description.as_deref(), Some(INACTIVE_REASON));
        let failed = h.service.get(failed.id.unwrap()).unwrap().unwrap();
        assert_eq!(failed.status, QueueStatus::Failed);
    }

    #[test]
    fn executing_a_reaped_item_reports_a_conflict() {
        let h = harness();
        h.enqueue(Scripted::Succeed, 1);
        let claimed = h.service.claim_next().unwrap().unwrap();
        h.clock.advance(Duration::minutes(10));
        h.service.fail_stale(Duration::minutes(5)).unwrap();

        let err = h.service.execute(claimed.clone()).unwrap_err();
        assert_eq!(err, QueueError::Conflict(claimed.id.unwrap()));
    }

    #[test]
    fn execute_requires_a_claimed_item() {
        let h = harness();
        let queued = h.enqueue(Scripted::Succeed, 0);
        assert!(matches!(
            h.service.execute(queued),
            Err(QueueError::Transition(TransitionError::Illegal { .. }))
        ));
    }

    #[test]
    fn stats_count_items_per_status() {
        let h = harness();
        h.enqueue(Scripted::Succeed, 0);
        h.enqueue(Scripted::Abort, 0);
        h.enqueue(Scripted::Succeed, 0);
        h.service.process_next().unwrap();
        h.service.process_next().unwrap();

        let stats = h.service.stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.total(), 3);
    }
}
