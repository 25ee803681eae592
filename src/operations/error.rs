//! Operation errors
//!
//! Nothing in this layer retries or swallows a failure; every error goes back
//! to the caller, which owns retry and dead-letter policy.

use crate::operations::OperationKind;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperationError {
    /// The backing store failed a single or bulk call
    #[error("backing store failed {kind} operation: {source}")]
    BackingStore {
        kind: OperationKind,
        #[source]
        source: StoreError,
    },
    /// Dynamic batch construction was handed operations of more than one kind
    #[error("invalid batch input at index {index}: expected {expected} operation, found {found}")]
    InvalidBatchInput {
        expected: OperationKind,
        found: OperationKind,
        index: usize,
    },
    /// Dynamic batch construction was handed no operations
    #[error("invalid batch input: no operations")]
    EmptyBatch,
}

impl OperationError {
    pub(crate) fn store(kind: OperationKind, source: StoreError) -> Self {
        OperationError::BackingStore { kind, source }
    }

    /// The store error behind this failure, if the store caused it
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            OperationError::BackingStore { source, .. } => Some(source),
            _ => None,
        }
    }
}
