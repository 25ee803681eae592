//! Backing store capability and test implementations
//!
//! - `InMemoryBackingStore`: records calls, for unit tests and DST
//! - `SimulatedBackingStore`: seeded fault injection around any store

pub mod backing_store;
pub mod simulated_store;

pub use backing_store::{BackingStore, InMemoryBackingStore, StoreCall, StoreError, StoreFuture};
pub use simulated_store::{SimulatedBackingStore, SimulatedStoreConfig, SimulatedStoreStats};
