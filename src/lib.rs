//! Engram Memory Store
//!
//! Bounded, multi-layer in-memory store for semantically annotated text
//! observations, retrievable by approximate relevance across three
//! differently-shaped indices.
//!
//! ## Layers
//!
//! - **Context index** - FIFO-bounded working set with recency and overlap
//!   scoring
//! - **Concept graph** - frequency-tracked concept nodes, co-occurrence
//!   edges, and coarse clustering
//! - **Temporal index** - sequenced event log with per-timeline relations
//!   and recurring / sequential / frequency-anomaly pattern detection
//!
//! The [`MemoryEngine`] fans ingested observations out to all three layers,
//! fuses their search results with layer weights on retrieval, and runs a
//! background consolidation task that compacts each layer and persists its
//! exported state through a [`SnapshotStore`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use engram::{EngineConfig, MemoryEngine, MemorySnapshotStore, RetrieveOptions};
//!
//! let engine = MemoryEngine::new(
//!     EngineConfig::default(),
//!     feature_supplier,                        // your Arc<dyn FeatureExtractor>
//!     Arc::new(MemorySnapshotStore::new()),
//! )?;
//! engine.start()?;
//!
//! let receipt = engine.ingest("The new AI model is great", metadata).await?;
//! let results = engine.retrieve("AI model", RetrieveOptions::default()).await?;
//! ```

pub mod cache;
pub mod concept;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod features;
pub mod snapshot;
pub mod temporal;

// Re-exports for convenience
pub use cache::CacheStats;
pub use concept::{ConceptCluster, ConceptGraph, ConceptNode, ScoredConcept};
pub use config::{CacheConfig, ConceptConfig, ContextConfig, EngineConfig, TemporalConfig};
pub use context::{ContextIndex, Observation, ScoredObservation};
pub use engine::{
    ConfidenceSummary, ConsolidationReport, EngineStatus, IngestReceipt, LayerStatus,
    MemoryEngine, Retrieval, RetrievedItem, RetrievedSource, RetrieveOptions,
};
pub use error::{MemoryError, Result};
pub use features::{
    Entity, FeatureExtractor, Keyword, Metadata, SemanticFeatures, Sentiment, SentimentLabel,
};
pub use snapshot::{Layer, MemorySnapshotStore, SnapshotStore};
pub use temporal::{
    CompressedEvent, Event, PatternKind, RelationKind, ScoredEvent, TemporalIndex,
    TemporalPattern, TemporalRelation, Timeline,
};
