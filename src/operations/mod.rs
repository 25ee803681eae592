//! Write-Behind Operation Model
//!
//! In-memory representation of mutations waiting to reach the backing store,
//! and the logic that consolidates them into bulk calls.
//!
//! ## Data flow
//!
//! ```text
//! enqueue → [SingleOperation ...] → Coalescer → FlushPlan → BatchOperation → BackingStore
//!              (arrival order)       (dedup by key,           (one bulk call
//!                                     latest wins)             per batch)
//! ```
//!
//! Single and batch operations are immutable values with no internal
//! synchronization; they hold no references into the queue that produced
//! them and can be applied from any worker thread.

pub mod batch;
pub mod clock;
pub mod coalesce;
pub mod error;
pub mod single;

pub use batch::{BatchOperation, DeleteAllOperation, WriteAllOperation};
pub use clock::{CreationClock, CreationTime, MonotonicClock, SimulatedClock};
pub use coalesce::{Coalescer, CoalescingPolicy, FlushPlan, PlannedBatch};
pub use error::OperationError;
pub use single::{DeleteOperation, KeyedOperation, OperationKind, SingleOperation, WriteOperation};
