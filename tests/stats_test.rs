//! Statistics facade over a live queue
//!
//! The registry only reads; these tests drive the queue and check that the
//! counters it exposes track what reached the store.

use std::sync::Arc;
use write_behind::config::WriteBehindConfig;
use write_behind::operations::{CreationTime, SimulatedClock, SingleOperation};
use write_behind::queue::PendingQueue;
use write_behind::stats::counters::{
    BATCHES_APPLIED, BATCH_ENTRIES, DELETES_QUEUED, FAILURES, OPERATIONS_APPLIED,
    OPERATIONS_SUPERSEDED, PENDING, WRITES_QUEUED,
};
use write_behind::simulator::DeterministicRng;
use write_behind::stats::{StatisticKind, StatisticsRegistry};
use write_behind::store::{InMemoryBackingStore, SimulatedBackingStore, SimulatedStoreConfig};

fn registry_for(queue: &PendingQueue<String, u32, SimulatedClock>) -> StatisticsRegistry {
    StatisticsRegistry::new(queue.cache_alias(), queue.stats(), Arc::new(|| 42u64))
}

fn value(registry: &StatisticsRegistry, name: &str) -> u64 {
    registry
        .sample(name)
        .map(|s| s.value)
        .unwrap_or_else(|| panic!("{} not registered", name))
}

#[test]
fn test_registry_exposes_every_counter() {
    let queue: PendingQueue<String, u32, SimulatedClock> =
        PendingQueue::new(&WriteBehindConfig::test(), SimulatedClock::default());
    let registry = registry_for(&queue);

    assert_eq!(registry.cache_alias(), "test");
    assert_eq!(registry.descriptors().len(), 9);

    let pending = registry
        .descriptors()
        .iter()
        .find(|d| d.name == PENDING)
        .unwrap();
    assert_eq!(pending.kind, StatisticKind::Gauge);
    assert!(registry
        .collect()
        .iter()
        .all(|s| s.value == 0 && s.timestamp_ms == 42));
}

#[tokio::test]
async fn test_counters_follow_queue_activity() {
    let queue = PendingQueue::new(&WriteBehindConfig::test(), SimulatedClock::default());
    let registry = registry_for(&queue);
    let store = InMemoryBackingStore::new();

    queue.push(SingleOperation::write_at("x".to_string(), 1, CreationTime(100)));
    queue.push(SingleOperation::write_at("x".to_string(), 2, CreationTime(200)));
    queue.push(SingleOperation::write_at("y".to_string(), 9, CreationTime(150)));
    queue.push(SingleOperation::delete_at("z".to_string(), CreationTime(160)));

    assert_eq!(value(&registry, WRITES_QUEUED), 3);
    assert_eq!(value(&registry, DELETES_QUEUED), 1);
    assert_eq!(value(&registry, PENDING), 4);

    let outcome = queue.flush_once(&store).await;
    assert!(outcome.is_success());

    assert_eq!(value(&registry, OPERATIONS_SUPERSEDED), 1);
    assert_eq!(value(&registry, BATCHES_APPLIED), 2);
    assert_eq!(value(&registry, BATCH_ENTRIES), 3);
    assert_eq!(value(&registry, OPERATIONS_APPLIED), 4);
    assert_eq!(value(&registry, FAILURES), 0);
    assert_eq!(value(&registry, PENDING), 0);
}

#[tokio::test]
async fn test_failures_counted() {
    let queue = PendingQueue::new(&WriteBehindConfig::test(), SimulatedClock::default());
    let registry = registry_for(&queue);
    let store = SimulatedBackingStore::new(
        InMemoryBackingStore::<String, u32>::new(),
        DeterministicRng::new(3),
        SimulatedStoreConfig {
            bulk_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        },
    );

    queue.enqueue_write("a".to_string(), 1);
    queue.flush_once(&store).await;
    queue.flush_once(&store).await;

    assert_eq!(value(&registry, FAILURES), 2);
    assert_eq!(value(&registry, OPERATIONS_APPLIED), 0);
    assert_eq!(value(&registry, PENDING), 1);

    let json = registry.to_json().unwrap();
    assert!(json.contains("\"cache_alias\":\"test\""));
    assert!(json.contains(FAILURES));
}
