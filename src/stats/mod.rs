//! Write-behind statistics
//!
//! `WriteBehindStats` counts what the queue does; `StatisticsRegistry`
//! exposes any `StatisticsSource` read-only under a cache alias.

pub mod counters;
pub mod registry;

pub use counters::{WriteBehindStats, WriteBehindStatsSnapshot};
pub use registry::{
    system_time_millis, StatisticDescriptor, StatisticKind, StatisticSample, StatisticsRegistry,
    StatisticsSource, TimeSource,
};
