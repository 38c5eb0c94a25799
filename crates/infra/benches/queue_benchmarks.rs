use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, TimeZone, Utc};
use payqueue_core::{Clock, Entity, IndexValue, ManualClock, QueueItemId};
use payqueue_events::ListenerBus;
use payqueue_infra::projections::{TransactionLog, TransactionLogService};
use payqueue_infra::queue::{
    EnqueueOptions, QueueEvent, QueueItem, QueueService, QueueStatus, QueueStore, TaskRegistry,
    TransactionData,
};
use payqueue_infra::storage::{IndexedStorage, InMemoryIndexedStorage, RawRecord};
use payqueue_infra::tasks::OrderUpdateTask;
use std::sync::Arc;

/// Naive table: every query walks all rows.
struct NaiveTable {
    rows: Vec<RawRecord>,
}

impl NaiveTable {
    fn find_eq(&self, column: &str, value: &str) -> usize {
        self.rows
            .iter()
            .filter(|r| r.index_value(column) == IndexValue::from(value))
            .count()
    }
}

fn seeded_logs(rows: u64) -> (Arc<TransactionLogService<Arc<ManualClock>>>, NaiveTable) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let storage: Arc<dyn IndexedStorage> = Arc::new(InMemoryIndexedStorage::new());
    let logs = Arc::new(TransactionLogService::new(storage, clock.clone()).unwrap());
    let mut naive = NaiveTable { rows: Vec::new() };

    for id in 1..=rows {
        let mut item = QueueItem::new("order_update", serde_json::json!({}), 0, start);
        item.id = Some(QueueItemId::new(id));
        item.status = QueueStatus::Completed;
        let data = TransactionData {
            correlation_key: format!("ORD-{id}"),
            event_code: "AUTHORISATION".to_string(),
            payment_method: Some("visa".to_string()),
            is_successful: true,
            reason: None,
        };
        let mut log = TransactionLog::new(&item, &data, clock.now()).unwrap();
        logs.create(&mut log).unwrap();

        let indexes = log
            .index_values()
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect();
        naive
            .rows
            .push(RawRecord::new(indexes, serde_json::to_value(&log).unwrap()));
        clock.advance(Duration::seconds(1));
    }
    (logs, naive)
}

fn bench_indexed_lookup_vs_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation_key_lookup");

    for rows in [1_000u64, 10_000] {
        let (logs, naive) = seeded_logs(rows);
        let key = format!("ORD-{}", rows / 2);

        group.bench_with_input(BenchmarkId::new("indexed", rows), &key, |b, key| {
            b.iter(|| black_box(logs.get(key).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("scan", rows), &key, |b, key| {
            b.iter(|| black_box(naive.find_eq("correlation_key", key)));
        });
    }

    group.finish();
}

fn bench_retention_page(c: &mut Criterion) {
    let (logs, _) = seeded_logs(10_000);
    let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

    c.bench_function("transaction_log_find_older_than", |b| {
        b.iter(|| black_box(logs.find(100, 0, Some(cutoff)).unwrap()));
    });
    c.bench_function("transaction_log_count_older_than", |b| {
        b.iter(|| black_box(logs.count(Some(cutoff)).unwrap()));
    });
}

fn queue_with(items: usize) -> QueueService<Arc<ManualClock>> {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let storage: Arc<dyn IndexedStorage> = Arc::new(InMemoryIndexedStorage::new());
    let bus: Arc<ListenerBus<QueueEvent>> = ListenerBus::arc();
    let registry = Arc::new(TaskRegistry::new().with::<OrderUpdateTask>().unwrap());
    let queue = QueueService::new(QueueStore::new(storage).unwrap(), registry, bus, clock);

    for i in 0..items {
        let task = OrderUpdateTask {
            merchant_reference: format!("ORD-{i}"),
            psp_reference: format!("PSP-{i}"),
            event_code: "AUTHORISATION".to_string(),
            payment_method: None,
            success: true,
            reason: None,
        };
        queue.enqueue(&task, EnqueueOptions::new()).unwrap();
    }
    queue
}

fn bench_claim_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_next");

    for items in [100usize, 1_000] {
        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, &items| {
            b.iter_batched(
                || queue_with(items),
                |queue| {
                    while let Some(item) = queue.claim_next().unwrap() {
                        black_box(item);
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_indexed_lookup_vs_scan,
    bench_retention_page,
    bench_claim_throughput
);
criterion_main!(benches);
