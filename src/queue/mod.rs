//! Pending write-behind queue
//!
//! `PendingQueue` owns queued operations and runs single flush passes
//! against a backing store. `dst` drives it under seeded fault injection.

pub mod dst;
pub mod pending;

pub use dst::{
    run_dst_batch, summarize_batch, WorkloadStep, WriteBehindDSTConfig, WriteBehindDSTHarness,
    WriteBehindDSTResult, WriteBehindWorkload,
};
pub use pending::{FlushOutcome, PendingQueue};
