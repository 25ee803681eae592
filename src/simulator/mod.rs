//! Deterministic simulation support
//!
//! Seed-driven randomness for fault injection and workload generation.
//! Given the same seed, a simulation run replays exactly.

pub mod rng;

pub use rng::DeterministicRng;
