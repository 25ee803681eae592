//! Backing Store Abstraction
//!
//! The system of record that write-behind operations are eventually applied
//! against. The store is external; this module only pins down the capability
//! the operations need and provides an in-memory implementation for tests.
//!
//! No transactional guarantee is assumed for the bulk calls: a failed
//! `write_all` may have applied any prefix of its entries.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by every backing-store call
pub type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

/// Error type for backing-store calls
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    /// Store refused the request as a whole
    #[error("backing store rejected request: {reason}")]
    Rejected { reason: String },
    /// One entry of a bulk call failed; entries before `index` may have been applied
    #[error("bulk entry {index} failed: {reason}")]
    EntryFailed { index: usize, reason: String },
    /// Call did not complete in time
    #[error("backing store call timed out")]
    Timeout,
    /// I/O error
    #[error("backing store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backing store capability consumed by single and batch operations
pub trait BackingStore<K, V>: Send + Sync {
    /// Persist one entry
    fn write<'a>(&'a self, key: &'a K, value: &'a V) -> StoreFuture<'a>;

    /// Remove one key
    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a>;

    /// Persist entries in order
    fn write_all<'a>(&'a self, entries: &'a [(K, V)]) -> StoreFuture<'a>;

    /// Remove keys in order
    fn delete_all<'a>(&'a self, keys: &'a [K]) -> StoreFuture<'a>;
}

impl<K, V, S> BackingStore<K, V> for Arc<S>
where
    S: BackingStore<K, V> + ?Sized,
{
    fn write<'a>(&'a self, key: &'a K, value: &'a V) -> StoreFuture<'a> {
        (**self).write(key, value)
    }

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a> {
        (**self).delete(key)
    }

    fn write_all<'a>(&'a self, entries: &'a [(K, V)]) -> StoreFuture<'a> {
        (**self).write_all(entries)
    }

    fn delete_all<'a>(&'a self, keys: &'a [K]) -> StoreFuture<'a> {
        (**self).delete_all(keys)
    }
}

// ============================================================================
// InMemoryBackingStore - For tests and DST
// ============================================================================

/// A call observed by `InMemoryBackingStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall<K, V> {
    Write(K, V),
    Delete(K),
    WriteAll(Vec<(K, V)>),
    DeleteAll(Vec<K>),
}

/// In-memory backing store that records every call it receives
#[derive(Debug)]
pub struct InMemoryBackingStore<K, V> {
    data: Arc<RwLock<HashMap<K, V>>>,
    calls: Arc<RwLock<Vec<StoreCall<K, V>>>>,
}

impl<K, V> InMemoryBackingStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        InMemoryBackingStore {
            data: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy of the current contents
    pub fn contents(&self) -> HashMap<K, V> {
        self.data.read().clone()
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<StoreCall<K, V>> {
        self.calls.read().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    fn record(&self, call: StoreCall<K, V>) {
        self.calls.write().push(call);
    }
}

impl<K, V> Default for InMemoryBackingStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for InMemoryBackingStore<K, V> {
    fn clone(&self) -> Self {
        InMemoryBackingStore {
            data: Arc::clone(&self.data),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<K, V> BackingStore<K, V> for InMemoryBackingStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn write<'a>(&'a self, key: &'a K, value: &'a V) -> StoreFuture<'a> {
        Box::pin(async move {
            self.record(StoreCall::Write(key.clone(), value.clone()));
            self.data.write().insert(key.clone(), value.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a> {
        Box::pin(async move {
            self.record(StoreCall::Delete(key.clone()));
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn write_all<'a>(&'a self, entries: &'a [(K, V)]) -> StoreFuture<'a> {
        Box::pin(async move {
            self.record(StoreCall::WriteAll(entries.to_vec()));
            let mut data = self.data.write();
            for (key, value) in entries {
                data.insert(key.clone(), value.clone());
            }
            Ok(())
        })
    }

    fn delete_all<'a>(&'a self, keys: &'a [K]) -> StoreFuture<'a> {
        Box::pin(async move {
            self.record(StoreCall::DeleteAll(keys.to_vec()));
            let mut data = self.data.write();
            for key in keys {
                data.remove(key);
            }
            Ok(())
        })
    }
}
