//! Statistics registry
//!
//! Read-only management facade over a statistics source. Given a cache alias
//! and a source, it registers every statistic the source knows about and
//! answers queries with timestamped samples. It does no coalescing or
//! batching of its own.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatisticKind {
    /// Monotonically increasing count
    Counter,
    /// Point-in-time value
    Gauge,
}

/// Name and kind of one exposed statistic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticDescriptor {
    pub name: String,
    pub kind: StatisticKind,
}

impl StatisticDescriptor {
    pub fn new(name: &str, kind: StatisticKind) -> Self {
        StatisticDescriptor {
            name: name.to_string(),
            kind,
        }
    }
}

/// Anything that maintains named statistics
pub trait StatisticsSource: Send + Sync {
    /// Every statistic this source can report
    fn known_statistics(&self) -> Vec<StatisticDescriptor>;

    /// Current value of `name`, `None` if unknown
    fn value(&self, name: &str) -> Option<u64>;
}

/// A value read through the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticSample {
    pub cache_alias: String,
    pub name: String,
    pub kind: StatisticKind,
    pub value: u64,
    pub timestamp_ms: u64,
}

/// Millisecond time source for sample timestamps
pub type TimeSource = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall-clock milliseconds since the Unix epoch
pub fn system_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct StatisticsRegistry {
    cache_alias: String,
    source: Arc<dyn StatisticsSource>,
    descriptors: Vec<StatisticDescriptor>,
    time_source: TimeSource,
}

impl StatisticsRegistry {
    /// Register every statistic `source` knows about under `cache_alias`
    pub fn new(
        cache_alias: impl Into<String>,
        source: Arc<dyn StatisticsSource>,
        time_source: TimeSource,
    ) -> Self {
        let descriptors = source.known_statistics();
        StatisticsRegistry {
            cache_alias: cache_alias.into(),
            source,
            descriptors,
            time_source,
        }
    }

    /// Registry stamping samples with wall-clock time
    pub fn with_system_time(
        cache_alias: impl Into<String>,
        source: Arc<dyn StatisticsSource>,
    ) -> Self {
        Self::new(cache_alias, source, Arc::new(system_time_millis))
    }

    pub fn cache_alias(&self) -> &str {
        &self.cache_alias
    }

    pub fn descriptors(&self) -> &[StatisticDescriptor] {
        &self.descriptors
    }

    /// Read one registered statistic
    pub fn sample(&self, name: &str) -> Option<StatisticSample> {
        let descriptor = self.descriptors.iter().find(|d| d.name == name)?;
        let value = self.source.value(name)?;
        Some(StatisticSample {
            cache_alias: self.cache_alias.clone(),
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            value,
            timestamp_ms: (self.time_source)(),
        })
    }

    /// Read every registered statistic, in registration order
    pub fn collect(&self) -> Vec<StatisticSample> {
        self.descriptors
            .iter()
            .filter_map(|d| self.sample(&d.name))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.collect())
    }
}

impl std::fmt::Debug for StatisticsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsRegistry")
            .field("cache_alias", &self.cache_alias)
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}
