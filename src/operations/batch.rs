//! Batch Operations
//!
//! A batch is a fixed, ordered collection of same-kind mutations built once
//! from single operations and applied through one bulk store call. Batches
//! are one-shot values: no retry, no locking, and applying one does not
//! change it, so a second `apply` issues an identical call.
//!
//! A failed bulk call is surfaced as-is. Working out which entries of a
//! partially failed batch still need to go out is the caller's job.

use crate::operations::{OperationError, OperationKind, SingleOperation};
use crate::store::BackingStore;
use tracing::debug;

/// Bulk write of `(key, value)` entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAllOperation<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> WriteAllOperation<K, V> {
    pub fn new(entries: Vec<(K, V)>) -> Self {
        WriteAllOperation { entries }
    }

    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn apply<S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        debug!(entries = self.entries.len(), "applying write_all batch");
        store
            .write_all(&self.entries)
            .await
            .map_err(|e| OperationError::store(OperationKind::Write, e))
    }
}

/// Bulk removal of keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteAllOperation<K> {
    keys: Vec<K>,
}

impl<K> DeleteAllOperation<K> {
    pub fn new(keys: Vec<K>) -> Self {
        DeleteAllOperation { keys }
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub async fn apply<V, S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        debug!(keys = self.keys.len(), "applying delete_all batch");
        store
            .delete_all(&self.keys)
            .await
            .map_err(|e| OperationError::store(OperationKind::Delete, e))
    }
}

/// Any batch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation<K, V> {
    WriteAll(WriteAllOperation<K, V>),
    DeleteAll(DeleteAllOperation<K>),
}

impl<K, V> BatchOperation<K, V> {
    pub fn kind(&self) -> OperationKind {
        match self {
            BatchOperation::WriteAll(_) => OperationKind::Write,
            BatchOperation::DeleteAll(_) => OperationKind::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchOperation::WriteAll(batch) => batch.len(),
            BatchOperation::DeleteAll(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn apply<S>(&self, store: &S) -> Result<(), OperationError>
    where
        S: BackingStore<K, V> + ?Sized,
    {
        match self {
            BatchOperation::WriteAll(batch) => batch.apply(store).await,
            BatchOperation::DeleteAll(batch) => batch.apply::<V, S>(store).await,
        }
    }
}

impl<K: Clone, V: Clone> BatchOperation<K, V> {
    /// Build a batch from a list that is not typed by kind.
    ///
    /// The first operation fixes the kind; any later operation of another
    /// kind fails the call with `InvalidBatchInput`.
    pub fn from_singles(operations: &[SingleOperation<K, V>]) -> Result<Self, OperationError> {
        let first = operations.first().ok_or(OperationError::EmptyBatch)?;
        first.build_batch(operations)
    }
}

impl<K, V> From<WriteAllOperation<K, V>> for BatchOperation<K, V> {
    fn from(batch: WriteAllOperation<K, V>) -> Self {
        BatchOperation::WriteAll(batch)
    }
}

impl<K, V> From<DeleteAllOperation<K>> for BatchOperation<K, V> {
    fn from(batch: DeleteAllOperation<K>) -> Self {
        BatchOperation::DeleteAll(batch)
    }
}
