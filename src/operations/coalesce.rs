//! Coalescing - turning queued operations into batches
//!
//! Input is the owning queue's snapshot in arrival order. With coalescing on,
//! operations are grouped by key and only the one with the greatest creation
//! time survives (equal times: the later arrival). Write/delete conflicts
//! resolve the same way, so a stale write can never land after a later
//! delete and vice versa. Survivors of each kind go into one batch per kind;
//! the kinds touch disjoint keys, so the batches commute.
//!
//! With coalescing off nothing is dropped. The input is cut into maximal runs
//! of one kind and each run becomes a batch, in input order.
//!
//! Either way every batch is capped at `max_batch_size` entries.

use crate::operations::{
    BatchOperation, DeleteOperation, OperationKind, SingleOperation, WriteOperation,
};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use tracing::debug;

/// How a flush turns queued operations into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalescingPolicy {
    /// Keep only the latest operation per key
    pub coalesce: bool,
    /// Upper bound on entries per batch (values below 1 are treated as 1)
    pub max_batch_size: usize,
}

impl Default for CoalescingPolicy {
    fn default() -> Self {
        CoalescingPolicy {
            coalesce: true,
            max_batch_size: 64,
        }
    }
}

/// One batch of a flush plan plus the queued operations it accounts for
#[derive(Debug, Clone)]
pub struct PlannedBatch<K, V> {
    batch: BatchOperation<K, V>,
    /// Operations whose effect the batch carries, in batch order
    sources: Vec<SingleOperation<K, V>>,
    /// Older same-key operations made redundant by `sources`
    superseded: Vec<SingleOperation<K, V>>,
}

impl<K, V> PlannedBatch<K, V> {
    pub fn batch(&self) -> &BatchOperation<K, V> {
        &self.batch
    }

    pub fn sources(&self) -> &[SingleOperation<K, V>] {
        &self.sources
    }

    pub fn superseded(&self) -> &[SingleOperation<K, V>] {
        &self.superseded
    }

    pub fn kind(&self) -> OperationKind {
        self.batch.kind()
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Every queued operation to remove once the batch has been applied
    pub fn acknowledgements(&self) -> impl Iterator<Item = &SingleOperation<K, V>> {
        self.sources.iter().chain(self.superseded.iter())
    }
}

/// Ordered batches produced from one queue snapshot
#[derive(Debug, Clone)]
pub struct FlushPlan<K, V> {
    batches: Vec<PlannedBatch<K, V>>,
}

impl<K, V> FlushPlan<K, V> {
    pub fn batches(&self) -> &[PlannedBatch<K, V>] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<PlannedBatch<K, V>> {
        self.batches
    }

    /// Number of batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Operations that will reach the store
    pub fn effective_count(&self) -> usize {
        self.batches.iter().map(|b| b.sources.len()).sum()
    }

    /// Operations dropped because a later same-key operation wins
    pub fn superseded_count(&self) -> usize {
        self.batches.iter().map(|b| b.superseded.len()).sum()
    }
}

/// Builds flush plans according to a `CoalescingPolicy`
#[derive(Debug, Clone, Copy, Default)]
pub struct Coalescer {
    policy: CoalescingPolicy,
}

impl Coalescer {
    pub fn new(policy: CoalescingPolicy) -> Self {
        Coalescer { policy }
    }

    pub fn policy(&self) -> CoalescingPolicy {
        self.policy
    }

    fn chunk_size(&self) -> usize {
        self.policy.max_batch_size.max(1)
    }

    /// Plan batches for `operations` (arrival order)
    pub fn plan<K, V>(&self, operations: &[SingleOperation<K, V>]) -> FlushPlan<K, V>
    where
        K: Clone + Eq + Hash,
        V: Clone,
    {
        let plan = if self.policy.coalesce {
            self.plan_coalesced(operations)
        } else {
            self.plan_in_order(operations)
        };

        debug!(
            input = operations.len(),
            batches = plan.len(),
            effective = plan.effective_count(),
            superseded = plan.superseded_count(),
            coalesce = self.policy.coalesce,
            "planned flush"
        );
        plan
    }

    fn plan_coalesced<K, V>(&self, operations: &[SingleOperation<K, V>]) -> FlushPlan<K, V>
    where
        K: Clone + Eq + Hash,
        V: Clone,
    {
        // Index of the current winner per key, and the indices it beat
        let mut winners: AHashMap<&K, usize> = AHashMap::with_capacity(operations.len());
        let mut losers: AHashMap<&K, Vec<usize>> = AHashMap::new();

        for (index, op) in operations.iter().enumerate() {
            let key = op.key();
            match winners.get_mut(key) {
                None => {
                    winners.insert(key, index);
                }
                Some(current) => {
                    let loser = if op.creation_time() >= operations[*current].creation_time() {
                        std::mem::replace(current, index)
                    } else {
                        index
                    };
                    losers.entry(key).or_default().push(loser);
                }
            }
        }

        let mut winning: Vec<usize> = winners.values().copied().collect();
        winning.sort_unstable();

        let (writes, deletes): (Vec<usize>, Vec<usize>) = winning
            .into_iter()
            .partition(|&i| operations[i].kind() == OperationKind::Write);

        let mut batches = Vec::new();
        for indices in [writes, deletes] {
            for chunk in indices.chunks(self.chunk_size()) {
                let superseded = chunk
                    .iter()
                    .filter_map(|&i| losers.get(operations[i].key()))
                    .flatten()
                    .map(|&i| operations[i].clone())
                    .collect();
                let sources: Vec<_> = chunk.iter().map(|&i| operations[i].clone()).collect();
                batches.push(planned(sources, superseded));
            }
        }

        FlushPlan { batches }
    }

    fn plan_in_order<K, V>(&self, operations: &[SingleOperation<K, V>]) -> FlushPlan<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let mut batches = Vec::new();
        let mut start = 0;
        while start < operations.len() {
            let kind = operations[start].kind();
            let run_len = operations[start..]
                .iter()
                .take_while(|op| op.kind() == kind)
                .count();
            for chunk in operations[start..start + run_len].chunks(self.chunk_size()) {
                batches.push(planned(chunk.to_vec(), Vec::new()));
            }
            start += run_len;
        }
        FlushPlan { batches }
    }
}

/// Build a planned batch from same-kind `sources` through the kind's own factory
fn planned<K: Clone, V: Clone>(
    sources: Vec<SingleOperation<K, V>>,
    superseded: Vec<SingleOperation<K, V>>,
) -> PlannedBatch<K, V> {
    let batch = match sources.first() {
        Some(SingleOperation::Delete(_)) => {
            let deletes: Vec<DeleteOperation<K>> = sources
                .iter()
                .filter_map(|op| match op {
                    SingleOperation::Delete(delete) => Some(delete.clone()),
                    SingleOperation::Write(_) => None,
                })
                .collect();
            BatchOperation::DeleteAll(DeleteOperation::build_batch(&deletes))
        }
        _ => {
            let writes: Vec<WriteOperation<K, V>> = sources
                .iter()
                .filter_map(|op| match op {
                    SingleOperation::Write(write) => Some(write.clone()),
                    SingleOperation::Delete(_) => None,
                })
                .collect();
            BatchOperation::WriteAll(WriteOperation::build_batch(&writes))
        }
    };
    debug_assert_eq!(batch.len(), sources.len(), "planned batch mixes kinds");

    PlannedBatch {
        batch,
        sources,
        superseded,
    }
}
