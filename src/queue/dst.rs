//! Deterministic Simulation Testing for the write-behind queue
//!
//! Shadow-state harness that drives a `PendingQueue` with a seeded random
//! workload against a fault-injecting backing store:
//! - Writes and deletes over a small key space, so keys collide often
//! - Flushes interleaved at random, some of which fail or half-apply
//! - Invariant checks after every flush
//! - A fault-free drain at the end, after which the store must match the
//!   shadow state exactly
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = WriteBehindDSTHarness::new(WriteBehindDSTConfig::chaos(seed));
//!     harness.run(500).await;
//!     harness.check_invariants().await;  // violations carry the seed
//! }
//! ```

use crate::config::WriteBehindConfig;
use crate::operations::{CoalescingPolicy, SimulatedClock};
use crate::queue::PendingQueue;
use crate::simulator::DeterministicRng;
use crate::store::{
    InMemoryBackingStore, SimulatedBackingStore, SimulatedStoreConfig, SimulatedStoreStats,
};
use crate::stats::WriteBehindStatsSnapshot;
use ahash::AHashSet;
use std::collections::HashMap;
use tracing::debug;

/// Flushes attempted during the final drain before giving up
const MAX_DRAIN_ATTEMPTS: usize = 16;

/// Configuration for write-behind DST
#[derive(Debug, Clone)]
pub struct WriteBehindDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Backing store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Coalescing switch and batch size cap for the queue under test
    pub policy: CoalescingPolicy,
    /// Probability that a step is a flush
    pub flush_probability: f64,
    /// Probability that a non-flush step is a delete rather than a write
    pub delete_probability: f64,
    /// Number of distinct keys the workload touches
    pub key_space: u64,
}

impl Default for WriteBehindDSTConfig {
    fn default() -> Self {
        WriteBehindDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            policy: CoalescingPolicy {
                coalesce: true,
                max_batch_size: 8,
            },
            flush_probability: 0.1,
            delete_probability: 0.2,
            key_space: 32,
        }
    }
}

impl WriteBehindDSTConfig {
    pub fn new(seed: u64) -> Self {
        WriteBehindDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults
    pub fn calm(seed: u64) -> Self {
        WriteBehindDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            flush_probability: 0.2,
            ..Default::default()
        }
    }

    /// Occasional failures
    pub fn moderate(seed: u64) -> Self {
        WriteBehindDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// Frequent failures, timeouts and partial bulk calls
    pub fn chaos(seed: u64) -> Self {
        WriteBehindDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            flush_probability: 0.15,
            key_space: 8,
            ..Default::default()
        }
    }

    /// Same workload with coalescing switched off
    pub fn in_order(mut self) -> Self {
        self.policy.coalesce = false;
        self
    }

    fn queue_config(&self) -> WriteBehindConfig {
        WriteBehindConfig {
            cache_alias: format!("dst-{}", self.seed),
            coalesce: self.policy.coalesce,
            max_batch_size: self.policy.max_batch_size,
        }
    }
}

/// One workload step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadStep {
    Write { key: String, value: String },
    Delete { key: String },
    Flush,
}

/// Workload generator with the shadow state it implies
pub struct WriteBehindWorkload {
    rng: DeterministicRng,
    config: WriteBehindDSTConfig,
    step_counter: u64,
    /// Last enqueued outcome per key: what the store must hold once drained
    expected_state: HashMap<String, Option<String>>,
}

impl WriteBehindWorkload {
    pub fn new(config: WriteBehindDSTConfig) -> Self {
        WriteBehindWorkload {
            rng: DeterministicRng::new(config.seed),
            config,
            step_counter: 0,
            expected_state: HashMap::new(),
        }
    }

    pub fn next_step(&mut self) -> WorkloadStep {
        self.step_counter += 1;

        if self.rng.gen_bool(self.config.flush_probability) {
            return WorkloadStep::Flush;
        }

        let key = format!("key_{:03}", self.rng.gen_range(0, self.config.key_space));
        if self.rng.gen_bool(self.config.delete_probability) {
            WorkloadStep::Delete { key }
        } else {
            let value = format!("value_{}", self.step_counter);
            WorkloadStep::Write { key, value }
        }
    }

    pub fn record_write(&mut self, key: &str, value: &str) {
        self.expected_state
            .insert(key.to_string(), Some(value.to_string()));
    }

    pub fn record_delete(&mut self, key: &str) {
        self.expected_state.insert(key.to_string(), None);
    }

    pub fn expected_state(&self) -> &HashMap<String, Option<String>> {
        &self.expected_state
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct WriteBehindDSTResult {
    pub seed: u64,
    pub writes: u64,
    pub deletes: u64,
    pub flushes: u64,
    /// Flushes that stopped on a store error (expected under faults)
    pub failed_flushes: u64,
    pub store_stats: SimulatedStoreStats,
    pub queue_stats: WriteBehindStatsSnapshot,
    pub invariant_violations: Vec<String>,
}

impl WriteBehindDSTResult {
    pub fn new(seed: u64) -> Self {
        WriteBehindDSTResult {
            seed,
            writes: 0,
            deletes: 0,
            flushes: 0,
            failed_flushes: 0,
            store_stats: SimulatedStoreStats::default(),
            queue_stats: WriteBehindStatsSnapshot::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn total_steps(&self) -> u64 {
        self.writes + self.deletes + self.flushes
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} writes, {} deletes, {} flushes ({} failed), {} superseded, {} violations",
            self.seed,
            self.writes,
            self.deletes,
            self.flushes,
            self.failed_flushes,
            self.queue_stats.operations_superseded,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedBackingStore<InMemoryBackingStore<String, String>>;

/// DST harness for the write-behind queue
pub struct WriteBehindDSTHarness {
    config: WriteBehindDSTConfig,
    store: DSTStore,
    queue: PendingQueue<String, String, SimulatedClock>,
    workload: WriteBehindWorkload,
    result: WriteBehindDSTResult,
}

impl WriteBehindDSTHarness {
    pub fn new(config: WriteBehindDSTConfig) -> Self {
        // Different seed for the store so faults don't track the workload
        let rng = DeterministicRng::new(config.seed.wrapping_add(1));
        let store = SimulatedBackingStore::new(
            InMemoryBackingStore::new(),
            rng,
            config.store_config.clone(),
        );
        let queue = PendingQueue::new(&config.queue_config(), SimulatedClock::new(1));
        let workload = WriteBehindWorkload::new(config.clone());
        let result = WriteBehindDSTResult::new(config.seed);

        WriteBehindDSTHarness {
            config,
            store,
            queue,
            workload,
            result,
        }
    }

    pub async fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            let step = self.workload.next_step();
            self.execute(step).await;
        }
    }

    async fn execute(&mut self, step: WorkloadStep) {
        match step {
            WorkloadStep::Write { key, value } => {
                self.queue.enqueue_write(key.clone(), value.clone());
                self.workload.record_write(&key, &value);
                self.result.writes += 1;
            }
            WorkloadStep::Delete { key } => {
                self.queue.enqueue_delete(key.clone());
                self.workload.record_delete(&key);
                self.result.deletes += 1;
            }
            WorkloadStep::Flush => {
                self.check_plan();
                let outcome = self.queue.flush_once(&self.store).await;
                self.result.flushes += 1;
                if !outcome.is_success() {
                    self.result.failed_flushes += 1;
                } else if outcome.remaining != 0 {
                    // Nothing else enqueues while the harness awaits
                    self.violation(format!(
                        "successful flush left {} operations pending",
                        outcome.remaining
                    ));
                }
            }
        }
        self.check_no_duplicates();
    }

    fn violation(&mut self, message: String) {
        debug!(seed = self.config.seed, %message, "invariant violation");
        self.result
            .invariant_violations
            .push(format!("seed {}: {}", self.config.seed, message));
    }

    fn check_no_duplicates(&mut self) {
        let snapshot = self.queue.snapshot();
        let unique: AHashSet<_> = snapshot.iter().collect();
        if unique.len() != snapshot.len() {
            self.violation(format!(
                "queue holds {} equal duplicates",
                snapshot.len() - unique.len()
            ));
        }
    }

    fn check_plan(&mut self) {
        let pending = self.queue.len();
        let plan = self.queue.plan();

        if plan.effective_count() + plan.superseded_count() != pending {
            self.violation(format!(
                "plan accounts for {} of {} pending operations",
                plan.effective_count() + plan.superseded_count(),
                pending
            ));
        }

        let max = self.config.policy.max_batch_size.max(1);
        if let Some(batch) = plan.batches().iter().find(|b| b.len() > max) {
            self.violation(format!("batch of {} exceeds cap {}", batch.len(), max));
        }

        if self.config.policy.coalesce {
            let mut keys = AHashSet::new();
            let repeated = plan
                .batches()
                .iter()
                .flat_map(|b| b.sources())
                .find(|op| !keys.insert(op.key().clone()))
                .map(|op| op.key().clone());
            if let Some(key) = repeated {
                self.violation(format!("coalesced plan carries {} more than once", key));
            }
        } else if plan.superseded_count() != 0 {
            self.violation("in-order plan superseded operations".to_string());
        }
    }

    /// Drain without faults, then compare the store against the shadow state
    pub async fn check_invariants(&mut self) {
        self.store.set_config(SimulatedStoreConfig::no_faults());

        for _ in 0..MAX_DRAIN_ATTEMPTS {
            if self.queue.is_empty() {
                break;
            }
            self.check_plan();
            self.queue.flush_once(&self.store).await;
        }

        if !self.queue.is_empty() {
            self.violation(format!(
                "{} operations still pending after drain",
                self.queue.len()
            ));
        }

        let actual = self.store.inner().contents();
        let mut mismatches = Vec::new();
        for (key, expected) in self.workload.expected_state() {
            let found = actual.get(key);
            if found != expected.as_ref() {
                mismatches.push(format!(
                    "{}: expected {:?}, store has {:?}",
                    key, expected, found
                ));
            }
        }
        for key in actual.keys() {
            if !self.workload.expected_state().contains_key(key) {
                mismatches.push(format!("{}: never written but present in store", key));
            }
        }
        for mismatch in mismatches {
            self.violation(mismatch);
        }

        self.result.store_stats = self.store.stats();
        self.result.queue_stats = self.queue.stats().snapshot();
    }

    pub fn result(&self) -> &WriteBehindDSTResult {
        &self.result
    }

    pub fn into_result(self) -> WriteBehindDSTResult {
        self.result
    }
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    steps_per_run: usize,
    config_fn: impl Fn(u64) -> WriteBehindDSTConfig,
) -> Vec<WriteBehindDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = WriteBehindDSTHarness::new(config_fn(seed));
        harness.run(steps_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

pub fn summarize_batch(results: &[WriteBehindDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_steps: u64 = results.iter().map(|r| r.total_steps()).sum();
    let total_flushes: u64 = results.iter().map(|r| r.flushes).sum();
    let failed_flushes: u64 = results.iter().map(|r| r.failed_flushes).sum();
    let superseded: u64 = results
        .iter()
        .map(|r| r.queue_stats.operations_superseded)
        .sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} steps, {} flushes ({} failed), {} superseded",
        passed, total, total_steps, total_flushes, failed_flushes, superseded
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
