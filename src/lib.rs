pub mod config;
pub mod operations;
pub mod queue;
pub mod simulator;
pub mod stats;
pub mod store;

pub use config::{ConfigError, WriteBehindConfig};
pub use operations::{
    BatchOperation, Coalescer, CoalescingPolicy, CreationClock, CreationTime, DeleteAllOperation,
    DeleteOperation, FlushPlan, MonotonicClock, OperationError, OperationKind, SimulatedClock,
    SingleOperation, WriteAllOperation, WriteOperation,
};
pub use queue::{FlushOutcome, PendingQueue};
pub use stats::{StatisticsRegistry, WriteBehindStats};
pub use store::{BackingStore, InMemoryBackingStore, StoreError};
