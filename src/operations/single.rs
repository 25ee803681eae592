//! Single Operations
//!
//! One queued mutation intent for one key at one logical time. Each concrete
//! kind applies itself through the matching single-item store call and
//! builds its own batch kind from a list of same-kind operations.
//!
//! ## Identity
//!
//! Two operations are the same pending request iff they are the same kind
//! with equal key and equal creation time. The value takes no part: two
//! writes to one key at different times are distinct entries, and
//! last-writer-wins deduplication is a separate step (see `coalesce`).

use crate::operations::batch::{DeleteAllOperation, WriteAllOperation};
use crate::operations::{BatchOperation, CreationClock, CreationTime, OperationError};
use crate::store::BackingStore;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Kind of mutation an operation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Write,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity shared by every pending mutation
pub trait KeyedOperation<K> {
    /// Cache key the operation targets
    fn key(&self) -> &K;

    /// Logical time the operation was queued
    fn creation_time(&self) -> CreationTime;
}

// ============================================================================
// WriteOperation
// ============================================================================

/// Pending write of `value` under `key`
#[derive(Debug, Clone)]
pub struct WriteOperation<K, V> {
    key: K,
    value: V,
    creation_time: CreationTime,
}

impl<K, V> WriteOperation<K, V> {
    /// Stamp a new write with the clock's next reading
    pub fn new<C: CreationClock + ?Sized>(key: K, value: V, clock: &C) -> Self {
        Self::with_creation_time(key, value, clock.now())
    }

    pub fn with_creation_time(key: K, value: V, creation_time: CreationTime) -> Self {
        WriteOperation {
            key,
            value,
            creation_time,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn creation_time(&self) -> CreationTime {
        self.creation_time
    }

    /// Persist this entry through the store's single-item `write`
    pub async fn apply<S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        store
            .write(&self.key, &self.value)
            .await
            .map_err(|e| OperationError::store(OperationKind::Write, e))
    }
}

impl<K: Clone, V: Clone> WriteOperation<K, V> {
    pub fn entry(&self) -> (K, V) {
        (self.key.clone(), self.value.clone())
    }

    /// Build one `WriteAllOperation` from `operations`, in input order.
    ///
    /// Does not deduplicate by key. The entries are copied, so the source
    /// list may change afterwards without touching the batch.
    pub fn build_batch(operations: &[WriteOperation<K, V>]) -> WriteAllOperation<K, V> {
        WriteAllOperation::new(operations.iter().map(WriteOperation::entry).collect())
    }
}

impl<K, V> KeyedOperation<K> for WriteOperation<K, V> {
    fn key(&self) -> &K {
        &self.key
    }

    fn creation_time(&self) -> CreationTime {
        self.creation_time
    }
}

impl<K: PartialEq, V> PartialEq for WriteOperation<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.creation_time == other.creation_time && self.key == other.key
    }
}

impl<K: Eq, V> Eq for WriteOperation<K, V> {}

impl<K: Hash, V> Hash for WriteOperation<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.creation_time.hash(state);
        self.key.hash(state);
    }
}

// ============================================================================
// DeleteOperation
// ============================================================================

/// Pending removal of `key`
#[derive(Debug, Clone)]
pub struct DeleteOperation<K> {
    key: K,
    creation_time: CreationTime,
}

impl<K> DeleteOperation<K> {
    pub fn new<C: CreationClock + ?Sized>(key: K, clock: &C) -> Self {
        Self::with_creation_time(key, clock.now())
    }

    pub fn with_creation_time(key: K, creation_time: CreationTime) -> Self {
        DeleteOperation { key, creation_time }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn creation_time(&self) -> CreationTime {
        self.creation_time
    }

    /// Remove the key through the store's single-item `delete`
    pub async fn apply<V, S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        store
            .delete(&self.key)
            .await
            .map_err(|e| OperationError::store(OperationKind::Delete, e))
    }
}

impl<K: Clone> DeleteOperation<K> {
    /// Build one `DeleteAllOperation` from `operations`, in input order
    pub fn build_batch(operations: &[DeleteOperation<K>]) -> DeleteAllOperation<K> {
        DeleteAllOperation::new(operations.iter().map(|op| op.key.clone()).collect())
    }
}

impl<K> KeyedOperation<K> for DeleteOperation<K> {
    fn key(&self) -> &K {
        &self.key
    }

    fn creation_time(&self) -> CreationTime {
        self.creation_time
    }
}

impl<K: PartialEq> PartialEq for DeleteOperation<K> {
    fn eq(&self, other: &Self) -> bool {
        self.creation_time == other.creation_time && self.key == other.key
    }
}

impl<K: Eq> Eq for DeleteOperation<K> {}

impl<K: Hash> Hash for DeleteOperation<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.creation_time.hash(state);
        self.key.hash(state);
    }
}

// ============================================================================
// SingleOperation
// ============================================================================

/// Any single pending mutation
#[derive(Debug, Clone)]
pub enum SingleOperation<K, V> {
    Write(WriteOperation<K, V>),
    Delete(DeleteOperation<K>),
}

impl<K, V> SingleOperation<K, V> {
    pub fn write_at(key: K, value: V, creation_time: CreationTime) -> Self {
        SingleOperation::Write(WriteOperation::with_creation_time(key, value, creation_time))
    }

    pub fn delete_at(key: K, creation_time: CreationTime) -> Self {
        SingleOperation::Delete(DeleteOperation::with_creation_time(key, creation_time))
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            SingleOperation::Write(_) => OperationKind::Write,
            SingleOperation::Delete(_) => OperationKind::Delete,
        }
    }

    pub fn key(&self) -> &K {
        match self {
            SingleOperation::Write(op) => op.key(),
            SingleOperation::Delete(op) => op.key(),
        }
    }

    pub fn creation_time(&self) -> CreationTime {
        match self {
            SingleOperation::Write(op) => op.creation_time(),
            SingleOperation::Delete(op) => op.creation_time(),
        }
    }

    /// Payload of a write, `None` for a delete
    pub fn value(&self) -> Option<&V> {
        match self {
            SingleOperation::Write(op) => Some(op.value()),
            SingleOperation::Delete(_) => None,
        }
    }

    pub async fn apply<S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        match self {
            SingleOperation::Write(op) => op.apply(store).await,
            SingleOperation::Delete(op) => op.apply::<V, S>(store).await,
        }
    }
}

impl<K: Clone, V: Clone> SingleOperation<K, V> {
    /// Build the batch kind matching this operation from `operations`.
    ///
    /// Every element must be of this operation's kind; the first mismatch is
    /// reported as `InvalidBatchInput`. Callers holding a typed list should
    /// use `WriteOperation::build_batch` / `DeleteOperation::build_batch`,
    /// where the mismatch cannot be expressed.
    pub fn build_batch(
        &self,
        operations: &[SingleOperation<K, V>],
    ) -> Result<BatchOperation<K, V>, OperationError> {
        let expected = self.kind();
        match expected {
            OperationKind::Write => {
                let mut entries = Vec::with_capacity(operations.len());
                for (index, op) in operations.iter().enumerate() {
                    match op {
                        SingleOperation::Write(write) => entries.push(write.entry()),
                        SingleOperation::Delete(_) => {
                            return Err(OperationError::InvalidBatchInput {
                                expected,
                                found: op.kind(),
                                index,
                            })
                        }
                    }
                }
                Ok(BatchOperation::WriteAll(WriteAllOperation::new(entries)))
            }
            OperationKind::Delete => {
                let mut keys = Vec::with_capacity(operations.len());
                for (index, op) in operations.iter().enumerate() {
                    match op {
                        SingleOperation::Delete(delete) => keys.push(delete.key().clone()),
                        SingleOperation::Write(_) => {
                            return Err(OperationError::InvalidBatchInput {
                                expected,
                                found: op.kind(),
                                index,
                            })
                        }
                    }
                }
                Ok(BatchOperation::DeleteAll(DeleteAllOperation::new(keys)))
            }
        }
    }
}

impl<K, V> KeyedOperation<K> for SingleOperation<K, V> {
    fn key(&self) -> &K {
        SingleOperation::key(self)
    }

    fn creation_time(&self) -> CreationTime {
        SingleOperation::creation_time(self)
    }
}

impl<K, V> From<WriteOperation<K, V>> for SingleOperation<K, V> {
    fn from(op: WriteOperation<K, V>) -> Self {
        SingleOperation::Write(op)
    }
}

impl<K, V> From<DeleteOperation<K>> for SingleOperation<K, V> {
    fn from(op: DeleteOperation<K>) -> Self {
        SingleOperation::Delete(op)
    }
}

impl<K: PartialEq, V> PartialEq for SingleOperation<K, V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SingleOperation::Write(a), SingleOperation::Write(b)) => a == b,
            (SingleOperation::Delete(a), SingleOperation::Delete(b)) => a == b,
            _ => false,
        }
    }
}

impl<K: Eq, V> Eq for SingleOperation<K, V> {}

impl<K: Hash, V> Hash for SingleOperation<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Kind is left out; a write and a delete sharing key and time may
        // collide but never compare equal.
        match self {
            SingleOperation::Write(op) => op.hash(state),
            SingleOperation::Delete(op) => op.hash(state),
        }
    }
}
