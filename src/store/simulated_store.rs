//! Simulated Backing Store with Fault Injection
//!
//! DST-compatible wrapper around another `BackingStore` that fails calls
//! with seeded probabilities. Bulk calls can also fail part-way: a prefix of
//! the entries is forwarded to the inner store and the call then reports
//! `StoreError::EntryFailed` for the first entry that was not applied.

use crate::simulator::DeterministicRng;
use crate::store::{BackingStore, StoreError, StoreFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Configuration for simulated fault injection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedStoreConfig {
    /// Probability of a single `write` failing
    pub write_fail_prob: f64,
    /// Probability of a single `delete` failing
    pub delete_fail_prob: f64,
    /// Probability of a bulk call failing before anything is applied
    pub bulk_fail_prob: f64,
    /// Probability of a bulk call applying only a prefix of its entries
    pub partial_bulk_prob: f64,
    /// Probability of any call timing out (nothing applied)
    pub timeout_prob: f64,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.02,   // 2%
            delete_fail_prob: 0.02,  // 2%
            bulk_fail_prob: 0.02,    // 2%
            partial_bulk_prob: 0.02, // 2%
            timeout_prob: 0.005,     // 0.5%
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.10,
            delete_fail_prob: 0.10,
            bulk_fail_prob: 0.10,
            partial_bulk_prob: 0.15,
            timeout_prob: 0.05,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            bulk_fail_prob: 0.0,
            partial_bulk_prob: 0.0,
            timeout_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub write_attempts: u64,
    pub write_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub bulk_attempts: u64,
    pub bulk_failures: u64,
    pub partial_bulks: u64,
    pub timeouts: u64,
}

struct SimulatedStoreInner {
    rng: DeterministicRng,
    config: SimulatedStoreConfig,
    stats: SimulatedStoreStats,
}

/// Fault decided for a bulk call
enum BulkFault {
    None,
    Timeout,
    Fail,
    /// Apply this many entries, then fail
    Partial(usize),
}

/// Simulated backing store that wraps another store and injects faults
pub struct SimulatedBackingStore<S> {
    inner_store: S,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S> SimulatedBackingStore<S> {
    pub fn new(inner_store: S, rng: DeterministicRng, config: SimulatedStoreConfig) -> Self {
        SimulatedBackingStore {
            inner_store,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                config,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Swap the fault configuration, e.g. to drain calmly after a chaos run
    pub fn set_config(&self, config: SimulatedStoreConfig) {
        self.state.lock().config = config;
    }

    /// Decide the outcome of a single-item call. Returns the error to report, if any.
    fn single_fault(&self, is_delete: bool) -> Option<StoreError> {
        let mut s = self.state.lock();
        let fail_prob = if is_delete {
            s.stats.delete_attempts += 1;
            s.config.delete_fail_prob
        } else {
            s.stats.write_attempts += 1;
            s.config.write_fail_prob
        };

        let timeout_prob = s.config.timeout_prob;
        if s.rng.gen_bool(timeout_prob) {
            s.stats.timeouts += 1;
            return Some(StoreError::Timeout);
        }
        if s.rng.gen_bool(fail_prob) {
            if is_delete {
                s.stats.delete_failures += 1;
            } else {
                s.stats.write_failures += 1;
            }
            return Some(StoreError::Unavailable("simulated failure".to_string()));
        }
        None
    }

    fn bulk_fault(&self, len: usize) -> BulkFault {
        let mut s = self.state.lock();
        s.stats.bulk_attempts += 1;

        let timeout_prob = s.config.timeout_prob;
        let bulk_fail_prob = s.config.bulk_fail_prob;
        let partial_prob = s.config.partial_bulk_prob;

        if s.rng.gen_bool(timeout_prob) {
            s.stats.timeouts += 1;
            return BulkFault::Timeout;
        }
        if s.rng.gen_bool(bulk_fail_prob) {
            s.stats.bulk_failures += 1;
            return BulkFault::Fail;
        }
        if len > 0 && s.rng.gen_bool(partial_prob) {
            s.stats.partial_bulks += 1;
            let applied = s.rng.gen_range(0, len as u64) as usize;
            return BulkFault::Partial(applied);
        }
        BulkFault::None
    }
}

impl<S: Clone> Clone for SimulatedBackingStore<S> {
    fn clone(&self) -> Self {
        SimulatedBackingStore {
            inner_store: self.inner_store.clone(),
            state: self.state.clone(),
        }
    }
}

impl<K, V, S> BackingStore<K, V> for SimulatedBackingStore<S>
where
    K: Sync,
    V: Sync,
    S: BackingStore<K, V>,
{
    fn write<'a>(&'a self, key: &'a K, value: &'a V) -> StoreFuture<'a> {
        Box::pin(async move {
            if let Some(err) = self.single_fault(false) {
                return Err(err);
            }
            self.inner_store.write(key, value).await
        })
    }

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a> {
        Box::pin(async move {
            if let Some(err) = self.single_fault(true) {
                return Err(err);
            }
            self.inner_store.delete(key).await
        })
    }

    fn write_all<'a>(&'a self, entries: &'a [(K, V)]) -> StoreFuture<'a> {
        Box::pin(async move {
            match self.bulk_fault(entries.len()) {
                BulkFault::None => self.inner_store.write_all(entries).await,
                BulkFault::Timeout => Err(StoreError::Timeout),
                BulkFault::Fail => Err(StoreError::Unavailable(
                    "simulated bulk failure".to_string(),
                )),
                BulkFault::Partial(applied) => {
                    debug!(applied, total = entries.len(), "simulated partial write_all");
                    if applied > 0 {
                        self.inner_store.write_all(&entries[..applied]).await?;
                    }
                    Err(StoreError::EntryFailed {
                        index: applied,
                        reason: "simulated entry failure".to_string(),
                    })
                }
            }
        })
    }

    fn delete_all<'a>(&'a self, keys: &'a [K]) -> StoreFuture<'a> {
        Box::pin(async move {
            match self.bulk_fault(keys.len()) {
                BulkFault::None => self.inner_store.delete_all(keys).await,
                BulkFault::Timeout => Err(StoreError::Timeout),
                BulkFault::Fail => Err(StoreError::Unavailable(
                    "simulated bulk failure".to_string(),
                )),
                BulkFault::Partial(applied) => {
                    debug!(applied, total = keys.len(), "simulated partial delete_all");
                    if applied > 0 {
                        self.inner_store.delete_all(&keys[..applied]).await?;
                    }
                    Err(StoreError::EntryFailed {
                        index: applied,
                        reason: "simulated entry failure".to_string(),
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBackingStore;

    fn calm_store() -> SimulatedBackingStore<InMemoryBackingStore<String, u32>> {
        SimulatedBackingStore::new(
            InMemoryBackingStore::new(),
            DeterministicRng::new(1),
            SimulatedStoreConfig::no_faults(),
        )
    }

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let store = calm_store();

        store.write(&"a".to_string(), &1).await.unwrap();
        store
            .write_all(&[("b".to_string(), 2), ("c".to_string(), 3)])
            .await
            .unwrap();
        store.delete(&"a".to_string()).await.unwrap();

        assert_eq!(store.inner().len(), 2);
        let stats = store.stats();
        assert_eq!(stats.write_attempts, 1);
        assert_eq!(stats.delete_attempts, 1);
        assert_eq!(stats.bulk_attempts, 1);
        assert_eq!(stats.write_failures + stats.bulk_failures + stats.timeouts, 0);
    }

    #[tokio::test]
    async fn test_always_fail_applies_nothing() {
        let config = SimulatedStoreConfig {
            bulk_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let store = SimulatedBackingStore::new(
            InMemoryBackingStore::<String, u32>::new(),
            DeterministicRng::new(2),
            config,
        );

        let result = store.write_all(&[("a".to_string(), 1)]).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.inner().is_empty());
        assert_eq!(store.stats().bulk_failures, 1);
    }

    #[tokio::test]
    async fn test_partial_bulk_applies_prefix_only() {
        let config = SimulatedStoreConfig {
            partial_bulk_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let store = SimulatedBackingStore::new(
            InMemoryBackingStore::<String, u32>::new(),
            DeterministicRng::new(3),
            config,
        );

        let entries: Vec<(String, u32)> = (0..10).map(|i| (format!("k{}", i), i)).collect();
        match store.write_all(&entries).await {
            Err(StoreError::EntryFailed { index, .. }) => {
                assert!(index < entries.len());
                assert_eq!(store.inner().len(), index);
                for (key, value) in &entries[..index] {
                    assert_eq!(store.inner().get(key), Some(*value));
                }
            }
            other => panic!("expected EntryFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_faults() {
        async fn run(seed: u64) -> Vec<bool> {
            let store = SimulatedBackingStore::new(
                InMemoryBackingStore::<u32, u32>::new(),
                DeterministicRng::new(seed),
                SimulatedStoreConfig::high_chaos(),
            );
            let mut outcomes = Vec::new();
            for i in 0..200u32 {
                outcomes.push(store.write(&i, &i).await.is_ok());
            }
            outcomes
        }

        assert_eq!(run(42).await, run(42).await);
    }

    #[tokio::test]
    async fn test_set_config_switches_to_calm() {
        let store = SimulatedBackingStore::new(
            InMemoryBackingStore::<u32, u32>::new(),
            DeterministicRng::new(5),
            SimulatedStoreConfig {
                write_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );

        assert!(store.write(&1, &1).await.is_err());
        store.set_config(SimulatedStoreConfig::no_faults());
        store.write(&1, &1).await.unwrap();
        assert_eq!(store.inner().get(&1), Some(1));
    }
}
