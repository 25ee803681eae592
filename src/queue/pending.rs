//! Pending Operations Queue
//!
//! Minimal owner of queued single operations, in arrival order. It stamps
//! new operations from its clock, hands snapshots to the coalescer, and
//! removes operations once the batch carrying them has been applied.
//! Removal matches by operation identity (kind, key, creation time), so
//! anything enqueued while a flush is in flight survives that flush.
//!
//! Scheduling is not this type's concern: `flush_once` makes one pass and
//! reports what happened. Timers, retry and backoff belong to the caller.

use crate::config::WriteBehindConfig;
use crate::operations::{
    Coalescer, CreationClock, CreationTime, DeleteOperation, FlushPlan, MonotonicClock,
    OperationError, OperationKind, SingleOperation, WriteOperation,
};
use crate::stats::WriteBehindStats;
use crate::store::BackingStore;
use ahash::AHashSet;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one flush pass
#[derive(Debug)]
pub struct FlushOutcome {
    /// Batches (or single-item calls) the store accepted
    pub batches_applied: usize,
    /// Queued operations removed, superseded ones included
    pub acknowledged: usize,
    /// Operations still queued after the pass
    pub remaining: usize,
    /// First failure; later batches of the plan were not attempted
    pub error: Option<OperationError>,
}

impl FlushOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Identity of a queued operation: kind, key and creation time
type OperationId<K> = (OperationKind, K, CreationTime);

fn operation_id<K: Clone, V>(op: &SingleOperation<K, V>) -> OperationId<K> {
    (op.kind(), op.key().clone(), op.creation_time())
}

/// Queued operations in arrival order, indexed by identity
struct PendingState<K, V> {
    ops: Vec<SingleOperation<K, V>>,
    ids: AHashSet<OperationId<K>>,
}

impl<K, V> Default for PendingState<K, V> {
    fn default() -> Self {
        PendingState {
            ops: Vec::new(),
            ids: AHashSet::new(),
        }
    }
}

pub struct PendingQueue<K, V, C = MonotonicClock> {
    pending: Mutex<PendingState<K, V>>,
    /// Held for a whole flush pass; overlapping passes could land a stale batch last
    flush_guard: tokio::sync::Mutex<()>,
    clock: C,
    coalescer: Coalescer,
    stats: Arc<WriteBehindStats>,
    cache_alias: String,
}

impl<K, V> PendingQueue<K, V, MonotonicClock>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Queue stamped by a process-local `MonotonicClock`
    pub fn with_config(config: &WriteBehindConfig) -> Self {
        Self::new(config, MonotonicClock::new())
    }
}

impl<K, V, C> PendingQueue<K, V, C>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
    C: CreationClock,
{
    pub fn new(config: &WriteBehindConfig, clock: C) -> Self {
        PendingQueue {
            pending: Mutex::new(PendingState::default()),
            flush_guard: tokio::sync::Mutex::new(()),
            clock,
            coalescer: Coalescer::new(config.policy()),
            stats: Arc::new(WriteBehindStats::new()),
            cache_alias: config.cache_alias.clone(),
        }
    }

    pub fn cache_alias(&self) -> &str {
        &self.cache_alias
    }

    pub fn stats(&self) -> Arc<WriteBehindStats> {
        self.stats.clone()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Queue a write stamped with the next creation time
    pub fn enqueue_write(&self, key: K, value: V) -> SingleOperation<K, V> {
        let mut pending = self.pending.lock();
        // Stamp under the lock so arrival order matches creation order
        let op: SingleOperation<K, V> = WriteOperation::new(key, value, &self.clock).into();
        self.insert(&mut pending, op.clone());
        op
    }

    /// Queue a delete stamped with the next creation time
    pub fn enqueue_delete(&self, key: K) -> SingleOperation<K, V> {
        let mut pending = self.pending.lock();
        let op: SingleOperation<K, V> = DeleteOperation::new(key, &self.clock).into();
        self.insert(&mut pending, op.clone());
        op
    }

    /// Queue an already-stamped operation. Returns false if an equal
    /// operation is already pending.
    pub fn push(&self, op: SingleOperation<K, V>) -> bool {
        let mut pending = self.pending.lock();
        self.insert(&mut pending, op)
    }

    fn insert(&self, pending: &mut PendingState<K, V>, op: SingleOperation<K, V>) -> bool {
        if !pending.ids.insert(operation_id(&op)) {
            return false;
        }
        self.stats.record_queued(op.kind());
        pending.ops.push(op);
        self.stats.set_pending(pending.ops.len());
        true
    }

    /// Copy of everything pending, in arrival order
    pub fn snapshot(&self) -> Vec<SingleOperation<K, V>> {
        self.pending.lock().ops.clone()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().ops.is_empty()
    }

    /// Remove every pending operation equal to one of `ops`
    pub fn acknowledge<'a, I>(&self, ops: I) -> usize
    where
        I: IntoIterator<Item = &'a SingleOperation<K, V>>,
        K: 'a,
        V: 'a,
    {
        let done: AHashSet<&SingleOperation<K, V>> = ops.into_iter().collect();
        if done.is_empty() {
            return 0;
        }
        let mut pending = self.pending.lock();
        let PendingState { ops, ids } = &mut *pending;
        let before = ops.len();
        ops.retain(|op| {
            if done.contains(op) {
                ids.remove(&operation_id(op));
                false
            } else {
                true
            }
        });
        let removed = before - ops.len();
        self.stats.set_pending(ops.len());
        removed
    }

    /// Plan batches for the current snapshot without applying anything
    pub fn plan(&self) -> FlushPlan<K, V> {
        self.coalescer.plan(&self.snapshot())
    }

    /// One flush pass: snapshot, plan, apply batches in order, acknowledge
    /// what landed. Stops at the first failure.
    ///
    /// Passes are serialized; a second caller waits for the running pass
    /// and then plans from what is still pending.
    pub async fn flush_once<S>(&self, store: &S) -> FlushOutcome
    where
        S: BackingStore<K, V> + ?Sized,
    {
        let _flushing = self.flush_guard.lock().await;

        let plan = self.plan();
        for batch in plan.batches() {
            self.stats.record_batch_built(batch.len());
        }
        let single_item = self.coalescer.policy().max_batch_size <= 1;

        let mut batches_applied = 0;
        let mut acknowledged = 0;
        let mut error = None;

        for planned in plan.batches() {
            let result = if single_item {
                apply_individually(planned.sources(), store).await
            } else {
                planned.batch().apply(store).await
            };

            match result {
                Ok(()) => {
                    let removed = self.acknowledge(planned.acknowledgements());
                    self.stats
                        .record_applied(!single_item, removed, planned.superseded().len());
                    batches_applied += 1;
                    acknowledged += removed;
                }
                Err(e) => {
                    self.stats.record_failure();
                    warn!(
                        cache = %self.cache_alias,
                        kind = %planned.kind(),
                        entries = planned.len(),
                        error = %e,
                        "write-behind batch failed"
                    );
                    error = Some(e);
                    break;
                }
            }
        }

        let remaining = self.len();
        if batches_applied > 0 || error.is_some() {
            info!(
                cache = %self.cache_alias,
                batches = batches_applied,
                acknowledged,
                remaining,
                failed = error.is_some(),
                "write-behind flush"
            );
        } else {
            debug!(cache = %self.cache_alias, "write-behind flush: nothing pending");
        }

        FlushOutcome {
            batches_applied,
            acknowledged,
            remaining,
            error,
        }
    }
}

async fn apply_individually<K, V, S>(
    ops: &[SingleOperation<K, V>],
    store: &S,
) -> Result<(), OperationError>
where
    S: BackingStore<K, V> + ?Sized,
{
    for op in ops {
        op.apply(store).await?;
    }
    Ok(())
}

impl<K, V, C> std::fmt::Debug for PendingQueue<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("cache_alias", &self.cache_alias)
            .field("pending", &self.pending.lock().ops.len())
            .field("policy", &self.coalescer.policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{CreationTime, OperationKind, SimulatedClock};
    use crate::store::{InMemoryBackingStore, StoreCall, StoreError, StoreFuture};

    fn queue(config: WriteBehindConfig) -> PendingQueue<String, u32, SimulatedClock> {
        PendingQueue::new(&config, SimulatedClock::new(100))
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    /// Store that fails every bulk write
    struct BrokenWrites(InMemoryBackingStore<String, u32>);

    impl BackingStore<String, u32> for BrokenWrites {
        fn write<'a>(&'a self, _key: &'a String, _value: &'a u32) -> StoreFuture<'a> {
            Box::pin(async { Err(StoreError::Unavailable("down".to_string())) })
        }

        fn delete<'a>(&'a self, key: &'a String) -> StoreFuture<'a> {
            self.0.delete(key)
        }

        fn write_all<'a>(&'a self, _entries: &'a [(String, u32)]) -> StoreFuture<'a> {
            Box::pin(async { Err(StoreError::Unavailable("down".to_string())) })
        }

        fn delete_all<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a> {
            self.0.delete_all(keys)
        }
    }

    #[test]
    fn test_enqueue_stamps_increasing_times() {
        let q = queue(WriteBehindConfig::test());
        let a = q.enqueue_write(key("x"), 1);
        let b = q.enqueue_write(key("x"), 2);
        let c = q.enqueue_delete(key("x"));

        assert_eq!(a.creation_time(), CreationTime(100));
        assert!(b.creation_time() > a.creation_time());
        assert!(c.creation_time() > b.creation_time());
        assert_eq!(q.len(), 3, "same-key operations stay distinct until flush");
    }

    #[test]
    fn test_push_ignores_equal_operation() {
        let q = queue(WriteBehindConfig::test());
        assert!(q.push(SingleOperation::write_at(key("x"), 1, CreationTime(5))));
        assert!(!q.push(SingleOperation::write_at(key("x"), 2, CreationTime(5))));
        assert!(q.push(SingleOperation::delete_at(key("x"), CreationTime(5))));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_acknowledge_matches_identity() {
        let q = queue(WriteBehindConfig::test());
        let first = q.enqueue_write(key("x"), 1);
        let _second = q.enqueue_write(key("x"), 2);

        // Same key and time, different value: still the same pending request
        let ack = SingleOperation::write_at(key("x"), 99, first.creation_time());
        assert_eq!(q.acknowledge([&ack]), 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.snapshot()[0].value(), Some(&2));
    }

    #[tokio::test]
    async fn test_flush_writes_latest_value_only() {
        let q = queue(WriteBehindConfig::default());
        let store = InMemoryBackingStore::new();

        q.push(SingleOperation::write_at(key("x"), 1, CreationTime(100)));
        q.push(SingleOperation::write_at(key("x"), 2, CreationTime(200)));
        q.push(SingleOperation::write_at(key("y"), 9, CreationTime(150)));

        let outcome = q.flush_once(&store).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.acknowledged, 3);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(store.get(&key("x")), Some(2));
        assert_eq!(store.get(&key("y")), Some(9));
        match &store.calls()[..] {
            [StoreCall::WriteAll(entries)] => {
                assert_eq!(entries.len(), 2);
                assert!(!entries.contains(&(key("x"), 1)));
            }
            calls => panic!("expected one write_all, got {:?}", calls),
        }

        let stats = q.stats().snapshot();
        assert_eq!(stats.operations_superseded, 1);
        assert_eq!(stats.batches_applied, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_flush_write_then_delete_only_deletes() {
        let q = queue(WriteBehindConfig::default());
        let store = InMemoryBackingStore::new();
        store.write(&key("x"), &0).await.unwrap();
        store.clear_calls();

        q.push(SingleOperation::write_at(key("x"), 1, CreationTime(100)));
        q.push(SingleOperation::delete_at(key("x"), CreationTime(200)));

        let outcome = q.flush_once(&store).await;

        assert!(outcome.is_success());
        assert!(!store.contains(&key("x")));
        assert_eq!(store.calls(), vec![StoreCall::DeleteAll(vec![key("x")])]);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_operations_pending() {
        let q = queue(WriteBehindConfig::default());
        let store = BrokenWrites(InMemoryBackingStore::new());

        q.enqueue_write(key("a"), 1);
        q.enqueue_write(key("a"), 2);

        let outcome = q.flush_once(&store).await;

        assert!(!outcome.is_success());
        assert!(matches!(
            outcome.error,
            Some(OperationError::BackingStore {
                kind: OperationKind::Write,
                ..
            })
        ));
        assert_eq!(outcome.acknowledged, 0);
        assert_eq!(q.len(), 2, "nothing removed on failure");
        assert_eq!(q.stats().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_single_item_mode_uses_single_calls() {
        let config = WriteBehindConfig {
            max_batch_size: 1,
            ..WriteBehindConfig::test()
        };
        let q = queue(config);
        let store = InMemoryBackingStore::new();

        q.enqueue_write(key("a"), 1);
        q.enqueue_delete(key("b"));

        let outcome = q.flush_once(&store).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.batches_applied, 2);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Write(key("a"), 1), StoreCall::Delete(key("b"))]
        );
        assert_eq!(q.stats().snapshot().batches_applied, 0);
    }

    #[tokio::test]
    async fn test_operations_enqueued_after_snapshot_survive() {
        let q = queue(WriteBehindConfig::default());
        let store = InMemoryBackingStore::new();

        q.enqueue_write(key("x"), 1);
        let plan = q.plan();

        // Arrives while the plan is in flight
        q.enqueue_write(key("x"), 2);

        for planned in plan.batches() {
            planned.batch().apply(&store).await.unwrap();
            q.acknowledge(planned.acknowledgements());
        }

        assert_eq!(q.len(), 1);
        assert_eq!(q.snapshot()[0].value(), Some(&2));

        q.flush_once(&store).await;
        assert_eq!(store.get(&key("x")), Some(2));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_in_order_mode_preserves_cross_kind_order() {
        let config = WriteBehindConfig {
            coalesce: false,
            ..WriteBehindConfig::default()
        };
        let q = queue(config);
        let store = InMemoryBackingStore::new();

        q.enqueue_write(key("x"), 1);
        q.enqueue_delete(key("x"));
        q.enqueue_write(key("x"), 3);

        let outcome = q.flush_once(&store).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.batches_applied, 3);
        assert_eq!(store.get(&key("x")), Some(3));
    }

    #[tokio::test]
    async fn test_empty_flush() {
        let q = queue(WriteBehindConfig::default());
        let store = InMemoryBackingStore::new();

        let outcome = q.flush_once(&store).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.batches_applied, 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_leaves_counters_alone() {
        let q = queue(WriteBehindConfig::default());
        let store = InMemoryBackingStore::new();
        q.enqueue_write(key("x"), 1);

        q.plan();
        q.plan();
        let stats = q.stats().snapshot();
        assert_eq!(stats.batches_built, 0);
        assert_eq!(stats.batch_entries, 0);

        q.flush_once(&store).await;
        let stats = q.stats().snapshot();
        assert_eq!(stats.batches_built, 1);
        assert_eq!(stats.batch_entries, 1);
        assert_eq!(stats.batches_applied, 1);
    }

    #[test]
    fn test_acknowledged_operation_can_be_pushed_again() {
        let q = queue(WriteBehindConfig::test());
        let op = SingleOperation::write_at(key("x"), 1, CreationTime(7));

        assert!(q.push(op.clone()));
        assert!(!q.push(op.clone()));
        assert_eq!(q.acknowledge([&op]), 1);
        assert!(q.push(op), "identity index forgets acknowledged operations");
        assert_eq!(q.len(), 1);
    }
}
