//! Recency-bounded working set of observations
//!
//! Strict FIFO capacity: one eviction per insert past the bound. Searches
//! score under a read lock and bump access stats of the returned hits under
//! a short write lock, so concurrent reads are never serialized for scoring.

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ContextConfig;
use crate::error::Result;
use crate::features::{Metadata, SemanticFeatures};

/// A single ingested record
///
/// Owned exclusively by the index; `access_count` and `last_accessed` are
/// bumped on every search hit, and consolidation survival is governed by
/// recency of use, not of creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub text: String,
    pub features: SemanticFeatures,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

/// A search hit with its overlap score
#[derive(Debug, Clone)]
pub struct ScoredObservation {
    pub observation: Observation,
    pub relevance: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextState {
    entries: VecDeque<Observation>,
}

/// FIFO-bounded recent-observation store
pub struct ContextIndex {
    config: ContextConfig,
    state: RwLock<ContextState>,
}

impl ContextIndex {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ContextState::default()),
        }
    }

    /// Append an observation, evicting the single oldest entry past capacity
    pub fn add(&self, text: &str, features: SemanticFeatures, metadata: Metadata) -> Observation {
        let now = Utc::now();
        let observation = Observation {
            id: Uuid::new_v4(),
            text: text.to_string(),
            features,
            metadata,
            created_at: now,
            access_count: 0,
            last_accessed: now,
        };

        let mut state = self.state.write();
        state.entries.push_back(observation.clone());
        if state.entries.len() > self.config.max_entries {
            state.entries.pop_front();
        }
        observation
    }

    /// Overlap search: hits at or above the relevance threshold, ordered by
    /// relevance then by more recent creation
    pub fn search(&self, query: &SemanticFeatures, limit: usize) -> Vec<ScoredObservation> {
        let mut hits: Vec<ScoredObservation> = {
            let state = self.state.read();
            state
                .entries
                .iter()
                .filter_map(|entry| {
                    let relevance = query.content_similarity(&entry.features);
                    (relevance >= self.config.relevance_threshold).then(|| ScoredObservation {
                        observation: entry.clone(),
                        relevance,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.observation.created_at.cmp(&a.observation.created_at))
        });
        hits.truncate(limit);

        if !hits.is_empty() {
            let now = Utc::now();
            let mut state = self.state.write();
            for hit in &mut hits {
                if let Some(entry) = state
                    .entries
                    .iter_mut()
                    .find(|entry| entry.id == hit.observation.id)
                {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    hit.observation.access_count = entry.access_count;
                    hit.observation.last_accessed = now;
                }
            }
        }

        hits
    }

    /// Drop never-accessed entries older than the retention window
    ///
    /// Entries read at least once survive regardless of age. Returns the
    /// number of entries removed.
    pub fn consolidate(&self) -> usize {
        let cutoff = Utc::now() - self.config.retention;
        let mut state = self.state.write();
        let before = state.entries.len();
        state
            .entries
            .retain(|entry| entry.access_count > 0 || entry.created_at >= cutoff);
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "context consolidation dropped stale entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    /// Fill level in [0, 1]
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.config.max_entries as f64
    }

    /// Serialize the full index state as an opaque blob
    pub fn export(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.state.read())?)
    }

    /// Replace the index state from a previously exported blob
    pub fn import(&self, blob: &[u8]) -> Result<()> {
        let restored: ContextState = bincode::deserialize(blob)?;
        *self.state.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Keyword;
    use chrono::Duration;

    fn features(words: &[&str]) -> SemanticFeatures {
        SemanticFeatures {
            tokens: words.iter().map(|w| w.to_string()).collect(),
            keywords: words
                .iter()
                .map(|w| Keyword {
                    word: w.to_string(),
                    freq: 1,
                })
                .collect(),
            concepts: words.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        }
    }

    fn index(max_entries: usize) -> ContextIndex {
        ContextIndex::new(ContextConfig {
            max_entries,
            relevance_threshold: 0.3,
            retention: Duration::hours(72),
        })
    }

    #[test]
    fn test_fifo_eviction_drops_oldest() {
        let index = index(2);
        let a = index.add("a", features(&["alpha"]), Metadata::new());
        let b = index.add("b", features(&["beta"]), Metadata::new());
        let c = index.add("c", features(&["gamma"]), Metadata::new());

        assert_eq!(index.len(), 2);
        let alpha_hits = index.search(&features(&["alpha"]), 10);
        assert!(alpha_hits.is_empty(), "oldest entry should be evicted");
        assert_eq!(index.search(&features(&["beta"]), 10)[0].observation.id, b.id);
        assert_eq!(index.search(&features(&["gamma"]), 10)[0].observation.id, c.id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let index = index(5);
        for i in 0..50 {
            index.add(&format!("text {i}"), features(&["word"]), Metadata::new());
            assert!(index.len() <= 5);
        }
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_search_filters_below_threshold() {
        let index = index(10);
        index.add("about ai", features(&["ai", "model"]), Metadata::new());
        index.add("unrelated", features(&["garden", "plants"]), Metadata::new());

        let hits = index.search(&features(&["ai", "model"]), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation.text, "about ai");
        assert!(hits[0].relevance >= 0.3);
    }

    #[test]
    fn test_search_ranks_by_relevance_then_recency() {
        let index = index(10);
        index.add("partial", features(&["ai", "other"]), Metadata::new());
        index.add("exact", features(&["ai", "model"]), Metadata::new());
        let newer_partial = index.add("partial newer", features(&["ai", "other"]), Metadata::new());

        let hits = index.search(&features(&["ai", "model"]), 10);
        assert_eq!(hits[0].observation.text, "exact");
        // Equal relevance ties break toward the more recent entry.
        assert_eq!(hits[1].observation.id, newer_partial.id);
    }

    #[test]
    fn test_search_bumps_access_stats() {
        let index = index(10);
        index.add("hit", features(&["ai"]), Metadata::new());

        let first = index.search(&features(&["ai"]), 10);
        assert_eq!(first[0].observation.access_count, 1);
        let second = index.search(&features(&["ai"]), 10);
        assert_eq!(second[0].observation.access_count, 2);
    }

    #[test]
    fn test_consolidate_spares_accessed_entries() {
        let index = ContextIndex::new(ContextConfig {
            max_entries: 10,
            relevance_threshold: 0.3,
            retention: Duration::zero(),
        });
        index.add("read me", features(&["kept"]), Metadata::new());
        index.add("never read", features(&["dropped"]), Metadata::new());

        // Access the first entry so retention cannot touch it.
        assert_eq!(index.search(&features(&["kept"]), 10).len(), 1);

        let removed = index.consolidate();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&features(&["kept"]), 10).len(), 1);
    }

    #[test]
    fn test_consolidate_is_idempotent() {
        let index = ContextIndex::new(ContextConfig {
            max_entries: 10,
            relevance_threshold: 0.3,
            retention: Duration::zero(),
        });
        for i in 0..4 {
            index.add(&format!("text {i}"), features(&["word"]), Metadata::new());
        }
        assert_eq!(index.consolidate(), 4);
        assert_eq!(index.consolidate(), 0);
    }

    #[test]
    fn test_export_import_round_trip() {
        let index = index(10);
        index.add("first", features(&["ai", "model"]), Metadata::new());
        index.add("second", features(&["slow", "computers"]), Metadata::new());

        let blob = index.export().unwrap();
        let restored = index_with_defaults();
        restored.import(&blob).unwrap();

        let query = features(&["ai", "model"]);
        let original_hits: Vec<Uuid> = index
            .search(&query, 10)
            .into_iter()
            .map(|h| h.observation.id)
            .collect();
        let restored_hits: Vec<Uuid> = restored
            .search(&query, 10)
            .into_iter()
            .map(|h| h.observation.id)
            .collect();
        assert_eq!(original_hits, restored_hits);
        assert_eq!(restored.len(), 2);
    }

    fn index_with_defaults() -> ContextIndex {
        index(10)
    }

    #[test]
    fn test_utilization() {
        let index = index(4);
        index.add("one", features(&["a"]), Metadata::new());
        assert!((index.utilization() - 0.25).abs() < 1e-9);
    }
}
