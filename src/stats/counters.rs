//! Write-behind counters
//!
//! Lock-free counters bumped by the owning queue as operations move through
//! enqueue → plan → apply. They are the statistics source the management
//! facade reports on; nothing here depends on the facade.

use crate::operations::OperationKind;
use crate::stats::{StatisticDescriptor, StatisticKind, StatisticsSource};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const WRITES_QUEUED: &str = "write_behind.writes_queued";
pub const DELETES_QUEUED: &str = "write_behind.deletes_queued";
pub const OPERATIONS_SUPERSEDED: &str = "write_behind.operations_superseded";
pub const BATCHES_BUILT: &str = "write_behind.batches_built";
pub const BATCH_ENTRIES: &str = "write_behind.batch_entries";
pub const OPERATIONS_APPLIED: &str = "write_behind.operations_applied";
pub const BATCHES_APPLIED: &str = "write_behind.batches_applied";
pub const FAILURES: &str = "write_behind.failures";
pub const PENDING: &str = "write_behind.pending";

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBehindStatsSnapshot {
    pub writes_queued: u64,
    pub deletes_queued: u64,
    pub operations_superseded: u64,
    pub batches_built: u64,
    pub batch_entries: u64,
    pub operations_applied: u64,
    pub batches_applied: u64,
    pub failures: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
pub struct WriteBehindStats {
    writes_queued: AtomicU64,
    deletes_queued: AtomicU64,
    operations_superseded: AtomicU64,
    batches_built: AtomicU64,
    batch_entries: AtomicU64,
    operations_applied: AtomicU64,
    batches_applied: AtomicU64,
    failures: AtomicU64,
    /// Gauge: operations currently queued
    pending: AtomicU64,
}

impl WriteBehindStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self, kind: OperationKind) {
        match kind {
            OperationKind::Write => self.writes_queued.fetch_add(1, Ordering::Relaxed),
            OperationKind::Delete => self.deletes_queued.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_batch_built(&self, entries: usize) {
        self.batches_built.fetch_add(1, Ordering::Relaxed);
        self.batch_entries.fetch_add(entries as u64, Ordering::Relaxed);
    }

    /// A batch (or single-item call when `batched` is false) reached the store.
    /// `acknowledged` counts the queued operations it retired, superseded ones included.
    pub fn record_applied(&self, batched: bool, acknowledged: usize, superseded: usize) {
        if batched {
            self.batches_applied.fetch_add(1, Ordering::Relaxed);
        }
        self.operations_applied
            .fetch_add(acknowledged as u64, Ordering::Relaxed);
        self.operations_superseded
            .fetch_add(superseded as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending.store(pending as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriteBehindStatsSnapshot {
        WriteBehindStatsSnapshot {
            writes_queued: self.writes_queued.load(Ordering::Relaxed),
            deletes_queued: self.deletes_queued.load(Ordering::Relaxed),
            operations_superseded: self.operations_superseded.load(Ordering::Relaxed),
            batches_built: self.batches_built.load(Ordering::Relaxed),
            batch_entries: self.batch_entries.load(Ordering::Relaxed),
            operations_applied: self.operations_applied.load(Ordering::Relaxed),
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

impl StatisticsSource for WriteBehindStats {
    fn known_statistics(&self) -> Vec<StatisticDescriptor> {
        let counters = [
            WRITES_QUEUED,
            DELETES_QUEUED,
            OPERATIONS_SUPERSEDED,
            BATCHES_BUILT,
            BATCH_ENTRIES,
            OPERATIONS_APPLIED,
            BATCHES_APPLIED,
            FAILURES,
        ];
        counters
            .iter()
            .map(|name| StatisticDescriptor::new(name, StatisticKind::Counter))
            .chain(std::iter::once(StatisticDescriptor::new(
                PENDING,
                StatisticKind::Gauge,
            )))
            .collect()
    }

    fn value(&self, name: &str) -> Option<u64> {
        let s = self.snapshot();
        let value = match name {
            WRITES_QUEUED => s.writes_queued,
            DELETES_QUEUED => s.deletes_queued,
            OPERATIONS_SUPERSEDED => s.operations_superseded,
            BATCHES_BUILT => s.batches_built,
            BATCH_ENTRIES => s.batch_entries,
            OPERATIONS_APPLIED => s.operations_applied,
            BATCHES_APPLIED => s.batches_applied,
            FAILURES => s.failures,
            PENDING => s.pending,
            _ => return None,
        };
        Some(value)
    }
}
