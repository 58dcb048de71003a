//! Memory engine
//!
//! Orchestrates the three indices: ingestion fans an observation out to all
//! of them, retrieval queries them independently and fuses the ranked
//! results, and a background task periodically consolidates each index and
//! persists its exported state through the snapshot store.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CacheStats, RetrievalCache};
use crate::concept::{ConceptGraph, ConceptNode};
use crate::config::EngineConfig;
use crate::context::{ContextIndex, Observation};
use crate::error::{MemoryError, Result};
use crate::features::{FeatureExtractor, Metadata, SemanticFeatures};
use crate::snapshot::{Layer, SnapshotStore};
use crate::temporal::{Event, TemporalIndex};

/// Fused-ranking layer weights; each index already scales its own scores
const CONTEXT_WEIGHT: f64 = 1.0;
const CONCEPT_WEIGHT: f64 = 0.8;
const TEMPORAL_WEIGHT: f64 = 0.6;

/// Options for [`MemoryEngine::retrieve`]
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub limit: usize,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            time_range: None,
        }
    }
}

/// Where a fused result came from
#[derive(Debug, Clone)]
pub enum RetrievedSource {
    Observation(Observation),
    Concept(ConceptNode),
    Event(Event),
}

impl RetrievedSource {
    pub fn layer(&self) -> Layer {
        match self {
            RetrievedSource::Observation(_) => Layer::Context,
            RetrievedSource::Concept(_) => Layer::Concept,
            RetrievedSource::Event(_) => Layer::Temporal,
        }
    }
}

/// One fused, layer-weighted result
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub relevance: f64,
    pub source: RetrievedSource,
}

/// Per-call quality summary
///
/// `degraded` lists layers that failed during the call and contributed no
/// results; degradation is reported here rather than escalated.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceSummary {
    pub context_hits: usize,
    pub concept_hits: usize,
    pub temporal_hits: usize,
    pub mean_relevance: f64,
    pub degraded: Vec<Layer>,
}

/// A fused retrieval outcome
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub items: Vec<RetrievedItem>,
    pub confidence: ConfidenceSummary,
}

/// Outcome of one ingestion
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// Deterministic content fingerprint for idempotent external reference
    pub fingerprint: String,
    /// Id of the observation stored in the context index
    pub observation: Uuid,
    /// Layers actually updated, in fan-out order
    pub layers: Vec<Layer>,
}

/// Outcome of one engine-wide consolidation pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationReport {
    pub context_removed: usize,
    pub concepts_removed: usize,
    pub events_archived: usize,
    pub events_compressed: usize,
    pub patterns_pruned: usize,
    /// Live plus summary entries over all events ever represented
    pub compression_ratio: f64,
    /// False when any snapshot export or save failed this pass
    pub persisted: bool,
}

/// Size and fill level of one layer
#[derive(Debug, Clone, Copy)]
pub struct LayerStatus {
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
}

/// Engine-wide status snapshot
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub context: LayerStatus,
    pub concept: LayerStatus,
    pub temporal: LayerStatus,
    pub patterns: usize,
    pub clusters: usize,
    pub compressed_events: usize,
    pub cache: CacheStats,
    pub ingests: u64,
    pub retrievals: u64,
    pub cache_hits: u64,
    pub consolidations: u64,
}

/// Engine counters; atomics so no call path takes a lock to bump them
#[derive(Debug, Default)]
struct EngineMetrics {
    ingests: AtomicU64,
    retrievals: AtomicU64,
    cache_hits: AtomicU64,
    consolidations: AtomicU64,
}

/// The multi-layer memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    extractor: Arc<dyn FeatureExtractor>,
    snapshots: Arc<dyn SnapshotStore>,
    context: ContextIndex,
    concepts: ConceptGraph,
    temporal: TemporalIndex,
    cache: RetrievalCache,
    metrics: EngineMetrics,
    initialized: AtomicBool,
    running: AtomicBool,
    pressure: Notify,
}

impl MemoryEngine {
    /// Build an engine; the configuration is validated here, state is
    /// restored later by [`start`](Self::start)
    pub fn new(
        config: EngineConfig,
        extractor: Arc<dyn FeatureExtractor>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            context: ContextIndex::new(config.context.clone()),
            concepts: ConceptGraph::new(config.concept.clone()),
            temporal: TemporalIndex::new(config.temporal.clone()),
            cache: RetrievalCache::new(config.cache.clone()),
            config,
            extractor,
            snapshots,
            metrics: EngineMetrics::default(),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            pressure: Notify::new(),
        })
    }

    /// Restore persisted layer snapshots and open the engine for traffic
    ///
    /// A missing snapshot is a cold start; an unreadable one is logged and
    /// skipped, never a startup failure.
    pub fn start(&self) -> Result<()> {
        for layer in Layer::ALL {
            match self.snapshots.load(layer) {
                Ok(Some(blob)) => {
                    let restored = match layer {
                        Layer::Context => self.context.import(&blob),
                        Layer::Concept => self.concepts.import(&blob),
                        Layer::Temporal => self.temporal.import(&blob),
                    };
                    match restored {
                        Ok(()) => {
                            tracing::info!(%layer, bytes = blob.len(), "restored layer snapshot")
                        }
                        Err(error) => {
                            tracing::warn!(%layer, %error, "skipping unreadable snapshot")
                        }
                    }
                }
                Ok(None) => tracing::debug!(%layer, "no snapshot, cold start"),
                Err(error) => tracing::warn!(%layer, %error, "snapshot load failed"),
            }
        }
        self.initialized.store(true, AtomicOrdering::SeqCst);
        tracing::info!("memory engine started");
        Ok(())
    }

    /// Ingest one observation with no deadline
    pub async fn ingest(&self, text: &str, metadata: Metadata) -> Result<IngestReceipt> {
        self.ingest_within(text, metadata, None).await
    }

    /// Ingest one observation, fanning it out to all three indices
    ///
    /// The feature supplier runs exactly once; a supplier failure aborts the
    /// call before any index is touched. The deadline is checked between
    /// fan-out legs: each index write is atomic on its own, so expiry leaves
    /// the layers listed in the error fully applied and the rest untouched.
    pub async fn ingest_within(
        &self,
        text: &str,
        metadata: Metadata,
        deadline: Option<Duration>,
    ) -> Result<IngestReceipt> {
        self.ensure_initialized()?;
        if text.trim().is_empty() {
            return Err(MemoryError::invalid_input("empty text"));
        }
        let started = Instant::now();

        let features = self.extractor.extract(text)?;

        let mut applied: Vec<Layer> = Vec::with_capacity(3);
        check_deadline(started, deadline, &applied)?;
        let observation = self
            .context
            .add(text, features.clone(), metadata.clone());
        applied.push(Layer::Context);

        check_deadline(started, deadline, &applied)?;
        self.concepts.ingest(&features.concepts, text);
        self.concepts.update_relationships(&features.concepts);
        applied.push(Layer::Concept);

        check_deadline(started, deadline, &applied)?;
        self.temporal.record(features.clone(), metadata);
        applied.push(Layer::Temporal);

        let fingerprint = fingerprint(text, &features, observation.created_at);
        self.metrics.ingests.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::debug!(%fingerprint, "ingested observation");

        if self.max_utilization() >= self.config.pressure_threshold {
            // Consolidation never runs inline; nudge the background task.
            self.pressure.notify_one();
        }

        Ok(IngestReceipt {
            fingerprint,
            observation: observation.id,
            layers: applied,
        })
    }

    /// Retrieve with no deadline
    pub async fn retrieve(&self, query: &str, options: RetrieveOptions) -> Result<Retrieval> {
        self.retrieve_within(query, options, None).await
    }

    /// Fused retrieval across all three indices
    ///
    /// Served from the response cache when possible. A failing layer
    /// degrades to zero results and is reported in the confidence summary,
    /// never escalated. Zero qualifying results is a success.
    pub async fn retrieve_within(
        &self,
        query: &str,
        options: RetrieveOptions,
        deadline: Option<Duration>,
    ) -> Result<Retrieval> {
        self.ensure_initialized()?;
        if query.trim().is_empty() {
            return Err(MemoryError::invalid_input("empty query"));
        }
        if options.limit == 0 {
            return Err(MemoryError::invalid_input("limit must be positive"));
        }
        let started = Instant::now();

        let key = self
            .cache
            .response_key(query, options.limit, options.time_range);
        if let Some(hit) = self.cache.get_response(key) {
            self.metrics.cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
            self.metrics.retrievals.fetch_add(1, AtomicOrdering::Relaxed);
            return Ok(hit);
        }

        let features = match self.cache.get_query_features(query) {
            Some(features) => features,
            None => {
                let features = self.extractor.extract(query)?;
                self.cache.set_query_features(query, &features);
                features
            }
        };

        let mut confidence = ConfidenceSummary::default();
        let mut items: Vec<RetrievedItem> = Vec::new();

        check_deadline(started, deadline, &[])?;
        let context_hits = self.context.search(&features, options.limit);
        confidence.context_hits = context_hits.len();
        items.extend(context_hits.into_iter().map(|hit| RetrievedItem {
            relevance: hit.relevance * CONTEXT_WEIGHT,
            source: RetrievedSource::Observation(hit.observation),
        }));

        check_deadline(started, deadline, &[])?;
        let concept_hits = self.concepts.search(&features.concepts, options.limit);
        confidence.concept_hits = concept_hits.len();
        items.extend(concept_hits.into_iter().map(|hit| RetrievedItem {
            relevance: hit.relevance * CONCEPT_WEIGHT,
            source: RetrievedSource::Concept(hit.concept),
        }));

        check_deadline(started, deadline, &[])?;
        match self
            .temporal
            .search(&features, options.time_range, options.limit)
        {
            Ok(event_hits) => {
                confidence.temporal_hits = event_hits.len();
                items.extend(event_hits.into_iter().map(|hit| RetrievedItem {
                    relevance: hit.relevance * TEMPORAL_WEIGHT,
                    source: RetrievedSource::Event(hit.event),
                }));
            }
            Err(error) => {
                tracing::warn!(%error, "temporal layer degraded during retrieve");
                confidence.degraded.push(Layer::Temporal);
            }
        }

        items.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
        });
        items.truncate(options.limit);
        confidence.mean_relevance = if items.is_empty() {
            0.0
        } else {
            items.iter().map(|item| item.relevance).sum::<f64>() / items.len() as f64
        };

        let retrieval = Retrieval { items, confidence };
        // Degraded outcomes are not worth a TTL of repetition.
        if retrieval.confidence.degraded.is_empty() {
            self.cache.set_response(key, retrieval.clone());
        }
        self.metrics.retrievals.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(retrieval)
    }

    /// Run one consolidation pass across all layers and persist snapshots
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        self.ensure_initialized()?;
        let mut report = ConsolidationReport {
            context_removed: self.context.consolidate(),
            concepts_removed: self.concepts.consolidate(),
            ..Default::default()
        };
        let temporal = self.temporal.consolidate();
        report.events_archived = temporal.archived;
        report.events_compressed = temporal.compressed_events;
        report.patterns_pruned = temporal.patterns_pruned;
        report.compression_ratio = self.approximate_compression_ratio();
        report.persisted = self.persist_snapshots();
        self.metrics
            .consolidations
            .fetch_add(1, AtomicOrdering::Relaxed);
        tracing::info!(
            context_removed = report.context_removed,
            concepts_removed = report.concepts_removed,
            events_compressed = report.events_compressed,
            persisted = report.persisted,
            "consolidation pass complete"
        );
        Ok(report)
    }

    /// Per-layer sizes, utilization and counters
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            context: LayerStatus {
                size: self.context.len(),
                capacity: self.context.capacity(),
                utilization: self.context.utilization(),
            },
            concept: LayerStatus {
                size: self.concepts.len(),
                capacity: self.concepts.capacity(),
                utilization: self.concepts.utilization(),
            },
            temporal: LayerStatus {
                size: self.temporal.len(),
                capacity: self.temporal.capacity(),
                utilization: self.temporal.utilization(),
            },
            patterns: self.temporal.pattern_count(),
            clusters: self.concepts.cluster_count(),
            compressed_events: self.temporal.compressed_count(),
            cache: self.cache.stats(),
            ingests: self.metrics.ingests.load(AtomicOrdering::Relaxed),
            retrievals: self.metrics.retrievals.load(AtomicOrdering::Relaxed),
            cache_hits: self.metrics.cache_hits.load(AtomicOrdering::Relaxed),
            consolidations: self.metrics.consolidations.load(AtomicOrdering::Relaxed),
        }
    }

    /// Spawn the periodic consolidation task
    ///
    /// Runs until [`shutdown`](Self::shutdown); wakes on the configured
    /// interval or on a capacity-pressure nudge from ingestion. A failed
    /// pass is logged and retried on the next wake-up.
    pub fn spawn_consolidation(engine: Arc<MemoryEngine>) -> JoinHandle<()> {
        engine.running.store(true, AtomicOrdering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.consolidation_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; swallow it.
            ticker.tick().await;
            while engine.running.load(AtomicOrdering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = engine.pressure.notified() => {
                        tracing::debug!("woken by capacity pressure");
                    }
                }
                if !engine.running.load(AtomicOrdering::SeqCst) {
                    break;
                }
                if let Err(error) = engine.consolidate().await {
                    tracing::warn!(%error, "scheduled consolidation failed");
                }
            }
            tracing::debug!("consolidation task stopped");
        })
    }

    /// Stop the background task and run one final consolidation/persist
    pub async fn shutdown(&self) {
        self.running.store(false, AtomicOrdering::SeqCst);
        self.pressure.notify_one();
        if self.initialized.load(AtomicOrdering::SeqCst) {
            if let Err(error) = self.consolidate().await {
                tracing::warn!(%error, "final consolidation failed during shutdown");
            }
        }
    }

    /// Context index accessor
    pub fn context(&self) -> &ContextIndex {
        &self.context
    }

    /// Concept graph accessor
    pub fn concepts(&self) -> &ConceptGraph {
        &self.concepts
    }

    /// Temporal index accessor
    pub fn temporal(&self) -> &TemporalIndex {
        &self.temporal
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::NotInitialized)
        }
    }

    fn max_utilization(&self) -> f64 {
        self.context
            .utilization()
            .max(self.concepts.utilization())
            .max(self.temporal.utilization())
    }

    /// Live plus summary entries over all events ever represented
    fn approximate_compression_ratio(&self) -> f64 {
        let live = self.temporal.len() as f64;
        let summaries = self.temporal.compressed_count() as f64;
        let original = live + self.temporal.compressed_original_count() as f64;
        if original == 0.0 {
            1.0
        } else {
            (live + summaries) / original
        }
    }

    /// Export and save each layer; failures are absorbed and the engine
    /// keeps serving from memory until the next pass retries
    fn persist_snapshots(&self) -> bool {
        let mut persisted = true;
        for layer in Layer::ALL {
            let blob = match layer {
                Layer::Context => self.context.export(),
                Layer::Concept => self.concepts.export(),
                Layer::Temporal => self.temporal.export(),
            };
            match blob {
                Ok(blob) => {
                    if let Err(error) = self.snapshots.save(layer, &blob) {
                        tracing::warn!(%layer, %error, "snapshot save failed, continuing in memory");
                        persisted = false;
                    }
                }
                Err(error) => {
                    tracing::warn!(%layer, %error, "layer export failed");
                    persisted = false;
                }
            }
        }
        persisted
    }
}

fn check_deadline(started: Instant, deadline: Option<Duration>, applied: &[Layer]) -> Result<()> {
    if let Some(limit) = deadline {
        if started.elapsed() >= limit {
            return Err(MemoryError::Timeout {
                applied: applied.to_vec(),
            });
        }
    }
    Ok(())
}

/// Deterministic content fingerprint
///
/// Hashes whitespace-normalized lowercased text, the sorted keyword and
/// concept sets, and the minute-truncated timestamp.
fn fingerprint(text: &str, features: &SemanticFeatures, at: DateTime<Utc>) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut keywords: Vec<&str> = features.keywords.iter().map(|k| k.word.as_str()).collect();
    keywords.sort_unstable();
    keywords.dedup();
    let mut concepts: Vec<&str> = features.concepts.iter().map(String::as_str).collect();
    concepts.sort_unstable();
    concepts.dedup();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    for keyword in keywords {
        hasher.update([0u8]);
        hasher.update(keyword.as_bytes());
    }
    for concept in concepts {
        hasher.update([1u8]);
        hasher.update(concept.as_bytes());
    }
    hasher.update((at.timestamp() / 60).to_le_bytes());
    format!("{:x}", hasher.finalize())
}
