//! Batched deletion of old transaction log rows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use payqueue_core::Clock;

use super::transaction_log::{ProjectionError, TransactionLogService};

/// Rows older than `max_age` are deleted, `batch_size` rows per storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub batch_size: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::days(60),
            batch_size: 1000,
        }
    }
}

impl RetentionPolicy {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Rows with a timestamp strictly before this are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }
}

#[derive(Debug)]
pub struct RetentionJob<C: Clock> {
    logs: Arc<TransactionLogService<C>>,
    policy: RetentionPolicy,
}

impl<C: Clock> RetentionJob<C> {
    pub fn new(logs: Arc<TransactionLogService<C>>, policy: RetentionPolicy) -> Self {
        Self { logs, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Delete one batch of expired rows.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<usize, ProjectionError> {
        self.logs
            .delete_logs(self.policy.cutoff(now), self.policy.batch_size)
    }

    /// Delete batches until no expired row is left. Returns the total deleted.
    pub fn run_to_exhaustion(&self, now: DateTime<Utc>) -> Result<usize, ProjectionError> {
        let cutoff = self.policy.cutoff(now);
        let mut total = 0;
        let mut batches = 0;
        while self.logs.logs_exist(cutoff)? {
            let deleted = self.logs.delete_logs(cutoff, self.policy.batch_size)?;
            if deleted == 0 {
                break;
            }
            total += deleted;
            batches += 1;
        }
        info!(
            deleted = total,
            batches,
            cutoff = %cutoff,
            "transaction log retention finished"
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use payqueue_core::{ManualClock, QueueItemId};

    use super::*;
    use crate::projections::TransactionLog;
    use crate::queue::{QueueItem, QueueStatus, TransactionData};
    use crate::storage::InMemoryIndexedStorage;

    fn seeded(rows: u64, clock: &Arc<ManualClock>) -> Arc<TransactionLogService<Arc<ManualClock>>> {
        let logs = Arc::new(
            TransactionLogService::new(Arc::new(InMemoryIndexedStorage::new()), clock.clone())
                .unwrap(),
        );
        for id in 1..=rows {
            let mut item = QueueItem::new("order_update", serde_json::json!({}), 0, clock.now());
            item.id = Some(QueueItemId::new(id));
            item.status = QueueStatus::Completed;
            let data = TransactionData {
                correlation_key: format!("ORD-{id}"),
                event_code: "AUTHORISATION".into(),
                payment_method: None,
                is_successful: true,
                reason: None,
            };
            let mut log = TransactionLog::new(&item, &data, clock.now()).unwrap();
            logs.create(&mut log).unwrap();
            clock.advance(Duration::hours(1));
        }
        logs
    }

    #[test]
    fn default_policy_keeps_sixty_days() {
        let policy = RetentionPolicy::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(policy.cutoff(now), now - Duration::days(60));
        assert_eq!(policy.batch_size, 1000);
    }

    #[test]
    fn run_once_deletes_a_single_batch() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let logs = seeded(7, &clock);
        let job = RetentionJob::new(
            logs.clone(),
            RetentionPolicy::default().with_max_age(Duration::days(1)).with_batch_size(3),
        );

        let now = clock.now() + Duration::days(2);
        assert_eq!(job.run_once(now).unwrap(), 3);
        assert_eq!(logs.count(None).unwrap(), 4);
    }

    #[test]
    fn run_to_exhaustion_only_removes_expired_rows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let logs = seeded(10, &clock);
        let job = RetentionJob::new(
            logs.clone(),
            RetentionPolicy::default().with_max_age(Duration::hours(24)).with_batch_size(4),
        );

        // rows at start+0h .. start+9h; cutoff at start+5h keeps five of them
        let now = start + Duration::hours(29);
        assert_eq!(job.run_to_exhaustion(now).unwrap(), 5);

        let cutoff = job.policy().cutoff(now);
        assert!(!logs.logs_exist(cutoff).unwrap());
        assert_eq!(logs.count(Some(cutoff)).unwrap(), 0);
        assert_eq!(logs.count(None).unwrap(), 5);
    }

    #[test]
    fn zero_batch_size_is_raised_to_one() {
        let policy = RetentionPolicy::default().with_batch_size(0);
        assert_eq!(policy.batch_size, 1);
    }
}
