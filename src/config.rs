//! Engine and per-index configuration
//!
//! Every tunable lives in an explicit struct with a `Default` impl; the whole
//! tree is validated once when the engine is constructed.

use chrono::Duration;

use crate::error::{MemoryError, Result};

/// Context index tuning
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// FIFO capacity; one eviction per insert past this bound
    pub max_entries: usize,
    /// Minimum overlap score for a search hit, in [0, 1]
    pub relevance_threshold: f64,
    /// Never-accessed entries older than this are dropped on consolidation
    pub retention: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            relevance_threshold: 0.3,
            retention: Duration::hours(72),
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(MemoryError::config("context max_entries must be positive"));
        }
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(MemoryError::config(
                "context relevance_threshold must be within [0, 1]",
            ));
        }
        if self.retention < Duration::zero() {
            return Err(MemoryError::config("context retention must not be negative"));
        }
        Ok(())
    }
}

/// Concept graph tuning
#[derive(Debug, Clone)]
pub struct ConceptConfig {
    /// Node capacity; the lowest-frequency decile is swept past this bound
    pub max_concepts: usize,
    /// Minimum score for a search hit
    pub relevance_threshold: f64,
    /// Graph size past which clustering kicks in
    pub cluster_trigger: usize,
    /// Members per cluster
    pub cluster_size: usize,
    /// Retained cluster history length
    pub cluster_history: usize,
    /// Nodes below this frequency are consolidation candidates
    pub min_frequency: u64,
    /// Consolidation removes candidates not seen for this long
    pub prune_age: Duration,
}

impl Default for ConceptConfig {
    fn default() -> Self {
        Self {
            max_concepts: 500,
            relevance_threshold: 0.5,
            cluster_trigger: 50,
            cluster_size: 8,
            cluster_history: 20,
            min_frequency: 2,
            prune_age: Duration::days(7),
        }
    }
}

impl ConceptConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concepts == 0 {
            return Err(MemoryError::config("concept max_concepts must be positive"));
        }
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(MemoryError::config(
                "concept relevance_threshold must be within [0, 1]",
            ));
        }
        if self.cluster_size < 2 {
            return Err(MemoryError::config("concept cluster_size must be at least 2"));
        }
        if self.cluster_history == 0 {
            return Err(MemoryError::config(
                "concept cluster_history must be positive",
            ));
        }
        if self.prune_age < Duration::zero() {
            return Err(MemoryError::config("concept prune_age must not be negative"));
        }
        Ok(())
    }
}

/// Temporal index tuning
#[derive(Debug, Clone)]
pub struct TemporalConfig {
    /// Live event capacity; overflow moves the oldest event to the archive
    pub max_events: usize,
    /// Pattern detection looks at this many most-recent events
    pub recent_window: usize,
    /// Relations are derived against same-timeline events within this window
    pub relation_window: Duration,
    /// Events older than this are archived and compressed on consolidation
    pub compression_age: Duration,
    /// Target compression; batch size is ceil(1 / ratio)
    pub compression_ratio: f64,
    /// Search results below this relevance are discarded
    pub relevance_floor: f64,
    /// Patterns older than this are pruned
    pub pattern_retention: Duration,
    /// Hard bound on retained patterns, oldest dropped first
    pub max_patterns: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            recent_window: 20,
            relation_window: Duration::hours(1),
            compression_age: Duration::days(7),
            compression_ratio: 0.1,
            relevance_floor: 0.3,
            pattern_retention: Duration::days(30),
            max_patterns: 1000,
        }
    }
}

impl TemporalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_events == 0 {
            return Err(MemoryError::config("temporal max_events must be positive"));
        }
        if self.recent_window == 0 {
            return Err(MemoryError::config(
                "temporal recent_window must be positive",
            ));
        }
        if self.relation_window <= Duration::zero() {
            return Err(MemoryError::config(
                "temporal relation_window must be positive",
            ));
        }
        if !(self.compression_ratio > 0.0 && self.compression_ratio <= 1.0) {
            return Err(MemoryError::config(
                "temporal compression_ratio must be within (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.relevance_floor) {
            return Err(MemoryError::config(
                "temporal relevance_floor must be within [0, 1]",
            ));
        }
        if self.max_patterns == 0 {
            return Err(MemoryError::config("temporal max_patterns must be positive"));
        }
        Ok(())
    }
}

/// Retrieval cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Hard bound on cached responses
    pub max_responses: usize,
    /// Response lifetime; doubles as the cache key's time-bucket width
    pub response_ttl: Duration,
    /// LRU capacity for extracted query features
    pub query_features: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_responses: 256,
            response_ttl: Duration::minutes(5),
            query_features: 128,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_responses == 0 {
            return Err(MemoryError::config("cache max_responses must be positive"));
        }
        if self.response_ttl <= Duration::zero() {
            return Err(MemoryError::config("cache response_ttl must be positive"));
        }
        if self.query_features == 0 {
            return Err(MemoryError::config("cache query_features must be positive"));
        }
        Ok(())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub context: ContextConfig,
    pub concept: ConceptConfig,
    pub temporal: TemporalConfig,
    pub cache: CacheConfig,
    /// Background consolidation cadence
    pub consolidation_interval: std::time::Duration,
    /// Utilization at which ingestion nudges the consolidation task, in (0, 1]
    pub pressure_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            concept: ConceptConfig::default(),
            temporal: TemporalConfig::default(),
            cache: CacheConfig::default(),
            consolidation_interval: std::time::Duration::from_secs(60),
            pressure_threshold: 0.8,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        self.concept.validate()?;
        self.temporal.validate()?;
        self.cache.validate()?;
        if self.consolidation_interval.is_zero() {
            return Err(MemoryError::config(
                "consolidation_interval must be positive",
            ));
        }
        if !(self.pressure_threshold > 0.0 && self.pressure_threshold <= 1.0) {
            return Err(MemoryError::config(
                "pressure_threshold must be within (0, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig {
            context: ContextConfig {
                max_entries: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = ConceptConfig {
            relevance_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compression_ratio_bounds() {
        let config = TemporalConfig {
            compression_ratio: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TemporalConfig {
            compression_ratio: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pressure_threshold_rejected_above_one() {
        let config = EngineConfig {
            pressure_threshold: 1.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
