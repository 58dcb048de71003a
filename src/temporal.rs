//! Time-ordered event log with relationship derivation and pattern mining
//!
//! Events carry a monotonic sequence number and are bucketed into named
//! timelines. On every insert the index derives pairwise relations against
//! nearby events of the same timeline and runs three deterministic pattern
//! detectors over a bounded recent window. Consolidation archives old events
//! and compresses them batch-wise into synthetic summary events.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TemporalConfig;
use crate::error::{MemoryError, Result};
use crate::features::{self, Metadata, SemanticFeatures};

/// Metadata key that overrides the default daily timeline bucket
const TIMELINE_KEY: &str = "timeline";

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// How two nearby events relate in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Less than a minute apart
    Concurrent,
    /// Less than five minutes apart
    Sequential,
    /// Less than an hour apart
    Related,
    Distant,
}

/// A derived link between two events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalRelation {
    pub other: Uuid,
    pub kind: RelationKind,
    /// Proximity + content + metadata overlap, clamped to [0, 1]
    pub strength: f64,
}

/// One recorded occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub features: SemanticFeatures,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    /// Insertion order within this index
    pub sequence: u64,
    pub relations: Vec<TemporalRelation>,
}

/// A search hit with its fused score
#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub event: Event,
    pub relevance: f64,
}

/// Synthetic summary of a contiguous group of archived events
///
/// Keeps the concepts present in at least half the group, a representative
/// mid-group timestamp, and the original ids for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedEvent {
    pub id: Uuid,
    pub concepts: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub original_ids: Vec<Uuid>,
    pub original_count: usize,
}

/// A named time-bucketed grouping of live events; purely derived state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub name: String,
    pub event_ids: Vec<Uuid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The regularity a pattern describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternKind {
    /// Near-constant interval between similar events
    Recurring {
        mean_interval_ms: i64,
        /// Coefficient of variation of the inter-arrival intervals
        variation: f64,
    },
    /// A length-3 concept subsequence recurring later
    Sequential { similarity: f64 },
    /// Recent same-topic rate deviating from the historical rate
    Frequency {
        /// Events in the trailing 24 hours
        recent_rate: f64,
        /// Events per day over the full observed span
        historical_rate: f64,
    },
}

/// A detected temporal regularity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub id: Uuid,
    pub kind: PatternKind,
    pub confidence: f64,
    pub concepts: Vec<String>,
    pub event_ids: Vec<Uuid>,
    pub detected_at: DateTime<Utc>,
}

impl TemporalPattern {
    pub fn is_recurring(&self) -> bool {
        matches!(self.kind, PatternKind::Recurring { .. })
    }
}

/// Outcome of one consolidation pass
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalConsolidation {
    pub archived: usize,
    pub compressed_groups: usize,
    pub compressed_events: usize,
    pub patterns_pruned: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemporalState {
    events: VecDeque<Event>,
    /// Overflow and age-expired events waiting for compression
    archive: VecDeque<Event>,
    compressed: Vec<CompressedEvent>,
    timelines: HashMap<String, Timeline>,
    patterns: VecDeque<TemporalPattern>,
    next_sequence: u64,
}

/// Event timeline index with pattern detection
pub struct TemporalIndex {
    config: TemporalConfig,
    state: RwLock<TemporalState>,
}

impl TemporalIndex {
    pub fn new(config: TemporalConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TemporalState::default()),
        }
    }

    /// Record an event stamped with the current time
    pub fn record(&self, features: SemanticFeatures, metadata: Metadata) -> Event {
        self.record_at(features, metadata, Utc::now())
    }

    /// Record an event with an explicit timestamp (replay/backfill path)
    pub fn record_at(
        &self,
        features: SemanticFeatures,
        metadata: Metadata,
        timestamp: DateTime<Utc>,
    ) -> Event {
        let mut state = self.state.write();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let mut event = Event {
            id: Uuid::new_v4(),
            features,
            metadata,
            timestamp,
            sequence,
            relations: Vec::new(),
        };

        let key = timeline_key(&event);
        let window_ms = self.config.relation_window.num_milliseconds();
        let mut back_relations: Vec<(Uuid, TemporalRelation)> = Vec::new();
        for other in state.events.iter() {
            if timeline_key(other) != key {
                continue;
            }
            let gap_ms = (event.timestamp - other.timestamp).num_milliseconds().abs();
            if gap_ms > window_ms {
                continue;
            }
            let kind = classify_gap(gap_ms);
            let strength = relation_strength(gap_ms, window_ms, &event, other);
            event.relations.push(TemporalRelation {
                other: other.id,
                kind,
                strength,
            });
            back_relations.push((
                other.id,
                TemporalRelation {
                    other: event.id,
                    kind,
                    strength,
                },
            ));
        }
        for (id, relation) in back_relations {
            if let Some(other) = state.events.iter_mut().find(|e| e.id == id) {
                other.relations.push(relation);
            }
        }

        let detected = self.detect_patterns(&state, &event);
        for pattern in detected {
            tracing::debug!(
                kind = ?pattern.kind,
                confidence = pattern.confidence,
                "temporal pattern detected"
            );
            state.patterns.push_back(pattern);
        }
        while state.patterns.len() > self.config.max_patterns {
            state.patterns.pop_front();
        }

        Self::index_into_timeline(&mut state, key, &event);
        state.events.push_back(event.clone());
        if state.events.len() > self.config.max_events {
            if let Some(oldest) = state.events.pop_front() {
                Self::remove_from_timeline(&mut state, &oldest);
                state.archive.push_back(oldest);
            }
        }

        event
    }

    /// Weighted search over live events
    ///
    /// `0.4 × content + 0.3 × temporal + 0.3 × pattern`; the temporal term
    /// peaks at the range midpoint (or at the present, when no range is
    /// given); the pattern term is the best confidence among recurring
    /// patterns that reference the event and share a concept with the query.
    /// Results below the configured floor are discarded. Compressed events
    /// are archival and never ranked.
    pub fn search(
        &self,
        query: &SemanticFeatures,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<ScoredEvent>> {
        if let Some((start, end)) = time_range {
            if start > end {
                return Err(MemoryError::invalid_input(
                    "time range start is after its end",
                ));
            }
        }

        let query_concepts = query.concept_set();
        let mut hits: Vec<ScoredEvent> = {
            let state = self.state.read();
            state
                .events
                .iter()
                .filter_map(|event| {
                    if let Some((start, end)) = time_range {
                        if event.timestamp < start || event.timestamp > end {
                            return None;
                        }
                    }
                    let content = query.content_similarity(&event.features);
                    let temporal = temporal_relevance(event.timestamp, time_range);
                    let pattern = Self::pattern_relevance(&state, event, &query_concepts);
                    let relevance = 0.4 * content + 0.3 * temporal + 0.3 * pattern;
                    (relevance >= self.config.relevance_floor).then(|| ScoredEvent {
                        event: event.clone(),
                        relevance,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.event.timestamp.cmp(&a.event.timestamp))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Archive events past the compression age and compress the archive in
    /// fixed-size batches
    ///
    /// Each full batch becomes one [`CompressedEvent`]; a leftover smaller
    /// than a batch stays queued so that repeating the pass with no new
    /// writes changes nothing. The write lock is taken per batch, never for
    /// the whole sweep.
    pub fn consolidate(&self) -> TemporalConsolidation {
        let mut report = TemporalConsolidation::default();
        let cutoff = Utc::now() - self.config.compression_age;
        let batch_size = (1.0 / self.config.compression_ratio).ceil() as usize;

        {
            let mut state = self.state.write();
            let mut live = VecDeque::with_capacity(state.events.len());
            while let Some(event) = state.events.pop_front() {
                if event.timestamp < cutoff {
                    state.archive.push_back(event);
                    report.archived += 1;
                } else {
                    live.push_back(event);
                }
            }
            state.events = live;
            if report.archived > 0 {
                Self::rebuild_timelines(&mut state);
            }
        }

        loop {
            let mut state = self.state.write();
            if state.archive.len() < batch_size {
                break;
            }
            let group: Vec<Event> = state.archive.drain(..batch_size).collect();
            let compressed = compress_group(&group);
            report.compressed_groups += 1;
            report.compressed_events += group.len();
            state.compressed.push(compressed);
        }

        {
            let mut state = self.state.write();
            let pattern_cutoff = Utc::now() - self.config.pattern_retention;
            let before = state.patterns.len();
            state
                .patterns
                .retain(|pattern| pattern.detected_at >= pattern_cutoff);
            report.patterns_pruned = before - state.patterns.len();
        }

        if report.archived > 0 || report.compressed_groups > 0 {
            tracing::debug!(
                archived = report.archived,
                groups = report.compressed_groups,
                "temporal consolidation compacted events"
            );
        }
        report
    }

    /// Look up a live event by id
    pub fn event(&self, id: Uuid) -> Option<Event> {
        self.state
            .read()
            .events
            .iter()
            .find(|event| event.id == id)
            .cloned()
    }

    /// Look up a timeline bucket by name
    pub fn timeline(&self, name: &str) -> Option<Timeline> {
        self.state.read().timelines.get(name).cloned()
    }

    /// Currently retained patterns, oldest first
    pub fn patterns(&self) -> Vec<TemporalPattern> {
        self.state.read().patterns.iter().cloned().collect()
    }

    /// Compressed summary events produced by consolidation
    pub fn compressed_events(&self) -> Vec<CompressedEvent> {
        self.state.read().compressed.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_events
    }

    pub fn archived_count(&self) -> usize {
        self.state.read().archive.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.state.read().patterns.len()
    }

    pub fn timeline_count(&self) -> usize {
        self.state.read().timelines.len()
    }

    pub fn compressed_count(&self) -> usize {
        self.state.read().compressed.len()
    }

    /// Total original events represented by compressed summaries
    pub fn compressed_original_count(&self) -> usize {
        self.state
            .read()
            .compressed
            .iter()
            .map(|c| c.original_count)
            .sum()
    }

    /// Fill level in [0, 1]
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.config.max_events as f64
    }

    /// Serialize the full index state as an opaque blob
    pub fn export(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.state.read())?)
    }

    /// Replace the index state from a previously exported blob
    pub fn import(&self, blob: &[u8]) -> Result<()> {
        let restored: TemporalState = bincode::deserialize(blob)?;
        *self.state.write() = restored;
        Ok(())
    }

    /// Run all three detectors over the bounded recent window
    fn detect_patterns(&self, state: &TemporalState, event: &Event) -> Vec<TemporalPattern> {
        let start = state.events.len().saturating_sub(self.config.recent_window);
        let recent: Vec<&Event> = state.events.iter().skip(start).collect();

        let mut found = Vec::new();
        if let Some(pattern) = self.detect_recurring(&recent, event) {
            found.push(pattern);
        }
        if let Some(pattern) = Self::detect_sequence(&recent, event) {
            found.push(pattern);
        }
        if let Some(pattern) = Self::detect_frequency_shift(state, event) {
            found.push(pattern);
        }
        found
    }

    /// Near-constant spacing between similar events
    ///
    /// Needs at least two similar prior events; flags when the coefficient
    /// of variation of the inter-arrival intervals is under 0.2, with
    /// confidence `1 − CoV`.
    fn detect_recurring(&self, recent: &[&Event], event: &Event) -> Option<TemporalPattern> {
        let similar: Vec<&Event> = recent
            .iter()
            .copied()
            .filter(|other| other.features.content_similarity(&event.features) > 0.3)
            .collect();
        if similar.len() < 2 {
            return None;
        }

        let mut times: Vec<DateTime<Utc>> = similar.iter().map(|e| e.timestamp).collect();
        times.push(event.timestamp);
        times.sort();
        let intervals: Vec<f64> = times
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64)
            .collect();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let variance = intervals
            .iter()
            .map(|interval| (interval - mean).powi(2))
            .sum::<f64>()
            / intervals.len() as f64;
        let variation = variance.sqrt() / mean;
        if variation >= 0.2 {
            return None;
        }

        let mut event_ids: Vec<Uuid> = similar.iter().map(|e| e.id).collect();
        event_ids.push(event.id);
        Some(TemporalPattern {
            id: Uuid::new_v4(),
            kind: PatternKind::Recurring {
                mean_interval_ms: mean.round() as i64,
                variation,
            },
            confidence: 1.0 - variation,
            concepts: sorted_concepts(event),
            event_ids,
            detected_at: Utc::now(),
        })
    }

    /// A length-3 concept subsequence recurring later in the window
    ///
    /// Compares the window ending at the new event against every earlier
    /// non-overlapping window; flags when the mean per-position Jaccard
    /// similarity exceeds 0.7.
    fn detect_sequence(recent: &[&Event], event: &Event) -> Option<TemporalPattern> {
        let mut items: Vec<(Uuid, HashSet<&str>)> = recent
            .iter()
            .map(|e| (e.id, e.features.concept_set()))
            .collect();
        items.push((event.id, event.features.concept_set()));
        if items.len() < 6 {
            return None;
        }

        let latest = &items[items.len() - 3..];
        for start in 0..=(items.len() - 6) {
            let earlier = &items[start..start + 3];
            let similarity = (0..3)
                .map(|i| features::jaccard(&earlier[i].1, &latest[i].1))
                .sum::<f64>()
                / 3.0;
            if similarity > 0.7 {
                let mut concepts: Vec<String> = latest
                    .iter()
                    .flat_map(|(_, set)| set.iter().map(|c| c.to_string()))
                    .collect();
                concepts.sort();
                concepts.dedup();
                let event_ids = earlier
                    .iter()
                    .chain(latest.iter())
                    .map(|(id, _)| *id)
                    .collect();
                return Some(TemporalPattern {
                    id: Uuid::new_v4(),
                    kind: PatternKind::Sequential { similarity },
                    confidence: similarity,
                    concepts,
                    event_ids,
                    detected_at: Utc::now(),
                });
            }
        }
        None
    }

    /// Same-topic rate in the trailing 24 hours versus the historical rate
    ///
    /// Flags when the ratio exceeds 2 or falls under 0.5.
    fn detect_frequency_shift(state: &TemporalState, event: &Event) -> Option<TemporalPattern> {
        let concepts = event.features.concept_set();
        if concepts.is_empty() {
            return None;
        }
        let same_topic: Vec<&Event> = state
            .events
            .iter()
            .filter(|other| {
                other
                    .features
                    .concept_set()
                    .intersection(&concepts)
                    .next()
                    .is_some()
            })
            .collect();
        // The new event itself always counts.
        let total = same_topic.len() + 1;
        if total < 4 {
            return None;
        }

        let now = event.timestamp;
        let recent = same_topic
            .iter()
            .filter(|other| (now - other.timestamp).num_milliseconds() <= MILLIS_PER_DAY)
            .count()
            + 1;
        let first = same_topic
            .iter()
            .map(|other| other.timestamp)
            .min()
            .unwrap_or(now);
        let span_days = ((now - first).num_milliseconds() as f64 / MILLIS_PER_DAY as f64).max(1.0);
        let historical_rate = total as f64 / span_days;
        let recent_rate = recent as f64;
        let ratio = recent_rate / historical_rate;
        if !(ratio > 2.0 || ratio < 0.5) {
            return None;
        }

        let mut event_ids: Vec<Uuid> = same_topic.iter().map(|e| e.id).collect();
        event_ids.push(event.id);
        Some(TemporalPattern {
            id: Uuid::new_v4(),
            kind: PatternKind::Frequency {
                recent_rate,
                historical_rate,
            },
            confidence: (1.0 - ratio.min(1.0 / ratio)).clamp(0.0, 1.0),
            concepts: sorted_concepts(event),
            event_ids,
            detected_at: Utc::now(),
        })
    }

    /// Best confidence among recurring patterns that reference the event and
    /// share a concept with the query
    fn pattern_relevance(
        state: &TemporalState,
        event: &Event,
        query_concepts: &HashSet<&str>,
    ) -> f64 {
        state
            .patterns
            .iter()
            .filter(|pattern| pattern.is_recurring())
            .filter(|pattern| pattern.event_ids.contains(&event.id))
            .filter(|pattern| {
                pattern
                    .concepts
                    .iter()
                    .any(|c| query_concepts.contains(c.as_str()))
            })
            .map(|pattern| pattern.confidence)
            .fold(0.0, f64::max)
    }

    fn index_into_timeline(state: &mut TemporalState, key: String, event: &Event) {
        let timeline = state
            .timelines
            .entry(key.clone())
            .or_insert_with(|| Timeline {
                name: key,
                event_ids: Vec::new(),
                start: event.timestamp,
                end: event.timestamp,
            });
        timeline.event_ids.push(event.id);
        timeline.start = timeline.start.min(event.timestamp);
        timeline.end = timeline.end.max(event.timestamp);
    }

    fn remove_from_timeline(state: &mut TemporalState, event: &Event) {
        let key = timeline_key(event);
        if let Some(timeline) = state.timelines.get_mut(&key) {
            timeline.event_ids.retain(|id| *id != event.id);
            if timeline.event_ids.is_empty() {
                state.timelines.remove(&key);
            }
        }
    }

    /// Timelines are derived state; recompute them from the live events
    fn rebuild_timelines(state: &mut TemporalState) {
        let mut timelines: HashMap<String, Timeline> = HashMap::new();
        for event in &state.events {
            let key = timeline_key(event);
            let timeline = timelines.entry(key.clone()).or_insert_with(|| Timeline {
                name: key,
                event_ids: Vec::new(),
                start: event.timestamp,
                end: event.timestamp,
            });
            timeline.event_ids.push(event.id);
            timeline.start = timeline.start.min(event.timestamp);
            timeline.end = timeline.end.max(event.timestamp);
        }
        state.timelines = timelines;
    }
}

/// Timeline bucket for an event: explicit metadata key or the UTC day
fn timeline_key(event: &Event) -> String {
    event
        .metadata
        .get(TIMELINE_KEY)
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| event.timestamp.format("%Y-%m-%d").to_string())
}

/// The event's concepts, sorted and deduplicated
fn sorted_concepts(event: &Event) -> Vec<String> {
    let mut concepts: Vec<String> = event
        .features
        .concept_set()
        .iter()
        .map(|c| c.to_string())
        .collect();
    concepts.sort();
    concepts.dedup();
    concepts
}

fn classify_gap(gap_ms: i64) -> RelationKind {
    if gap_ms < 60_000 {
        RelationKind::Concurrent
    } else if gap_ms < 300_000 {
        RelationKind::Sequential
    } else if gap_ms < MILLIS_PER_HOUR {
        RelationKind::Related
    } else {
        RelationKind::Distant
    }
}

fn relation_strength(gap_ms: i64, window_ms: i64, a: &Event, b: &Event) -> f64 {
    let proximity = (1.0 - gap_ms as f64 / window_ms as f64).max(0.0);
    let content = a.features.content_similarity(&b.features);
    let keys = features::key_overlap(&a.metadata, &b.metadata);
    (0.2 * proximity + 0.5 * content + 0.3 * keys).clamp(0.0, 1.0)
}

/// Midpoint closeness when a range is given, otherwise recency over a day
fn temporal_relevance(
    timestamp: DateTime<Utc>,
    time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> f64 {
    match time_range {
        Some((start, end)) => {
            let midpoint = start + (end - start) / 2;
            let half_span_ms = ((end - start).num_milliseconds() / 2).max(1) as f64;
            let offset_ms = (timestamp - midpoint).num_milliseconds().abs() as f64;
            (1.0 - offset_ms / half_span_ms).clamp(0.0, 1.0)
        }
        None => {
            let age_ms = (Utc::now() - timestamp).num_milliseconds().max(0) as f64;
            (1.0 - age_ms / MILLIS_PER_DAY as f64).clamp(0.0, 1.0)
        }
    }
}

/// Summarize one batch: concepts present in at least half the group and a
/// representative mid-group timestamp
fn compress_group(group: &[Event]) -> CompressedEvent {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for event in group {
        for concept in event.features.concept_set() {
            *counts.entry(concept).or_insert(0) += 1;
        }
    }
    let mut concepts: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| count * 2 >= group.len())
        .map(|(concept, _)| concept.to_string())
        .collect();
    concepts.sort();

    CompressedEvent {
        id: Uuid::new_v4(),
        concepts,
        timestamp: group[group.len() / 2].timestamp,
        original_ids: group.iter().map(|event| event.id).collect(),
        original_count: group.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Keyword;
    use chrono::Duration;

    fn features(concepts: &[&str]) -> SemanticFeatures {
        SemanticFeatures {
            tokens: concepts.iter().map(|c| c.to_string()).collect(),
            keywords: vec![],
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn rich_features(words: &[&str]) -> SemanticFeatures {
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

    fn index() -> TemporalIndex {
        TemporalIndex::new(TemporalConfig::default())
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let index = index();
        let first = index.record(features(&["a"]), Metadata::new());
        let second = index.record(features(&["b"]), Metadata::new());
        let third = index.record(features(&["c"]), Metadata::new());
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(third.sequence, 2);
    }

    #[test]
    fn test_overflow_archives_oldest() {
        let index = TemporalIndex::new(TemporalConfig {
            max_events: 3,
            ..Default::default()
        });
        let first = index.record(features(&["a"]), Metadata::new());
        for name in ["b", "c", "d", "e"] {
            index.record(features(&[name]), Metadata::new());
        }
        assert_eq!(index.len(), 3);
        assert_eq!(index.archived_count(), 2);
        assert!(index.event(first.id).is_none());
    }

    #[test]
    fn test_relations_classified_by_gap() {
        let index = index();
        // Fixed mid-day base so every event lands in the same daily bucket.
        let base: DateTime<Utc> = "2024-05-10T10:00:00Z".parse().unwrap();
        let a = index.record_at(features(&["x"]), Metadata::new(), base);
        let b = index.record_at(features(&["x"]), Metadata::new(), base + Duration::seconds(30));
        let c = index.record_at(features(&["x"]), Metadata::new(), base + Duration::minutes(3));
        let d = index.record_at(features(&["x"]), Metadata::new(), base + Duration::minutes(30));

        let b_to_a = b.relations.iter().find(|r| r.other == a.id).unwrap();
        assert_eq!(b_to_a.kind, RelationKind::Concurrent);

        let c_to_a = c.relations.iter().find(|r| r.other == a.id).unwrap();
        assert_eq!(c_to_a.kind, RelationKind::Sequential);

        let d_to_a = d.relations.iter().find(|r| r.other == a.id).unwrap();
        assert_eq!(d_to_a.kind, RelationKind::Related);
        assert!(d_to_a.strength > 0.0 && d_to_a.strength <= 1.0);

        // Back-link recorded on the earlier event as well.
        let stored_a = index.event(a.id).unwrap();
        assert!(stored_a.relations.iter().any(|r| r.other == b.id));
    }

    #[test]
    fn test_relations_respect_timeline_buckets() {
        let index = index();
        let base = Utc::now() - Duration::hours(1);
        let mut session = Metadata::new();
        session.insert(TIMELINE_KEY.into(), serde_json::json!("session-1"));

        let a = index.record_at(features(&["x"]), session.clone(), base);
        let outside = index.record_at(features(&["x"]), Metadata::new(), base + Duration::seconds(5));
        let b = index.record_at(features(&["x"]), session, base + Duration::seconds(10));

        assert!(b.relations.iter().any(|r| r.other == a.id));
        assert!(b.relations.iter().all(|r| r.other != outside.id));
        assert_eq!(index.timeline("session-1").unwrap().event_ids.len(), 2);
    }

    #[test]
    fn test_recurring_detected_for_constant_spacing() {
        let index = index();
        let base = Utc::now() - Duration::hours(5);
        for i in 0..5 {
            index.record_at(
                features(&["backup", "nightly"]),
                Metadata::new(),
                base + Duration::milliseconds(3_600_000 * i),
            );
        }

        let recurring: Vec<TemporalPattern> = index
            .patterns()
            .into_iter()
            .filter(|p| p.is_recurring())
            .collect();
        assert!(!recurring.is_empty());
        let best = recurring
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
            .unwrap();
        assert!(best.confidence > 0.95);
        match best.kind {
            PatternKind::Recurring {
                mean_interval_ms, ..
            } => assert_eq!(mean_interval_ms, 3_600_000),
            _ => panic!("expected recurring kind"),
        }
    }

    #[test]
    fn test_recurring_not_detected_for_irregular_spacing() {
        let index = index();
        let base = Utc::now() - Duration::hours(8);
        // Coefficient of variation of these gaps is well above 0.2.
        let offsets_min = [0, 30, 210, 220, 340];
        for offset in offsets_min {
            index.record_at(
                features(&["backup", "nightly"]),
                Metadata::new(),
                base + Duration::minutes(offset),
            );
        }

        assert!(index.patterns().iter().all(|p| !p.is_recurring()));
    }

    #[test]
    fn test_sequential_pattern_detected() {
        let index = index();
        let base = Utc::now() - Duration::hours(3);
        let script = ["build", "test", "deploy", "build", "test", "deploy"];
        for (i, step) in script.into_iter().enumerate() {
            index.record_at(
                features(&[step]),
                Metadata::new(),
                base + Duration::minutes(10 * i as i64),
            );
        }

        let sequential: Vec<TemporalPattern> = index
            .patterns()
            .into_iter()
            .filter(|p| matches!(p.kind, PatternKind::Sequential { .. }))
            .collect();
        assert!(!sequential.is_empty());
        assert!(sequential[0].confidence > 0.7);
        assert_eq!(sequential[0].event_ids.len(), 6);
    }

    #[test]
    fn test_frequency_anomaly_detected_on_burst() {
        let index = index();
        let now = Utc::now();
        for day in 2..11 {
            index.record_at(
                features(&["deploy"]),
                Metadata::new(),
                now - Duration::days(day),
            );
        }
        for _ in 0..3 {
            index.record_at(features(&["deploy"]), Metadata::new(), now);
        }

        let frequency: Vec<TemporalPattern> = index
            .patterns()
            .into_iter()
            .filter(|p| matches!(p.kind, PatternKind::Frequency { .. }))
            .collect();
        assert!(!frequency.is_empty());
        match frequency.last().unwrap().kind {
            PatternKind::Frequency {
                recent_rate,
                historical_rate,
            } => assert!(recent_rate / historical_rate > 2.0),
            _ => panic!("expected frequency kind"),
        }
    }

    #[test]
    fn test_search_ranks_matching_events_higher() {
        let index = index();
        index.record(rich_features(&["ai", "model"]), Metadata::new());
        index.record(rich_features(&["garden", "plants"]), Metadata::new());

        let hits = index
            .search(&rich_features(&["ai", "model"]), None, 10)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].event.features.concepts[0], "ai");
        if hits.len() > 1 {
            assert!(hits[0].relevance > hits[1].relevance);
        }
    }

    #[test]
    fn test_search_time_range_filters_and_rejects_inverted() {
        let index = index();
        let now = Utc::now();
        index.record_at(rich_features(&["old", "entry"]), Metadata::new(), now - Duration::days(3));
        index.record_at(rich_features(&["new", "entry"]), Metadata::new(), now);

        let range = Some((now - Duration::hours(1), now + Duration::hours(1)));
        let hits = index.search(&rich_features(&["entry"]), range, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].event.features.concepts.contains(&"new".to_string()));

        let inverted = Some((now, now - Duration::hours(1)));
        assert!(index.search(&rich_features(&["entry"]), inverted, 10).is_err());
    }

    #[test]
    fn test_consolidation_compresses_in_batches() {
        let index = TemporalIndex::new(TemporalConfig {
            compression_age: Duration::days(7),
            compression_ratio: 0.1,
            ..Default::default()
        });
        let base = Utc::now() - Duration::days(8);
        for i in 0..20 {
            index.record_at(
                features(&["archived", "job"]),
                Metadata::new(),
                base + Duration::minutes(i),
            );
        }

        let report = index.consolidate();
        assert_eq!(report.archived, 20);
        assert_eq!(report.compressed_groups, 2);
        assert_eq!(report.compressed_events, 20);
        assert_eq!(index.len(), 0);

        let compressed = index.compressed_events();
        assert_eq!(compressed.len(), 2);
        let total: usize = compressed.iter().map(|c| c.original_count).sum();
        assert_eq!(total, 20);
        for group in &compressed {
            assert_eq!(group.original_ids.len(), group.original_count);
            assert!(group.concepts.contains(&"archived".to_string()));
        }
    }

    #[test]
    fn test_consolidation_keeps_leftovers_queued() {
        let index = TemporalIndex::new(TemporalConfig {
            compression_age: Duration::days(7),
            compression_ratio: 0.1,
            ..Default::default()
        });
        let base = Utc::now() - Duration::days(8);
        for i in 0..13 {
            index.record_at(features(&["job"]), Metadata::new(), base + Duration::minutes(i));
        }

        let report = index.consolidate();
        assert_eq!(report.compressed_groups, 1);
        assert_eq!(index.archived_count(), 3);
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let index = TemporalIndex::new(TemporalConfig {
            compression_age: Duration::days(7),
            compression_ratio: 0.1,
            ..Default::default()
        });
        let base = Utc::now() - Duration::days(8);
        for i in 0..20 {
            index.record_at(features(&["job"]), Metadata::new(), base + Duration::minutes(i));
        }
        index.record(features(&["fresh"]), Metadata::new());

        index.consolidate();
        let before = (
            index.len(),
            index.archived_count(),
            index.compressed_count(),
            index.pattern_count(),
        );
        let second = index.consolidate();
        assert_eq!(second.archived, 0);
        assert_eq!(second.compressed_groups, 0);
        let after = (
            index.len(),
            index.archived_count(),
            index.compressed_count(),
            index.pattern_count(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_default_timeline_is_daily() {
        let index = index();
        let day_one: DateTime<Utc> = "2024-03-01T08:00:00Z".parse().unwrap();
        index.record_at(features(&["a"]), Metadata::new(), day_one);
        index.record_at(features(&["b"]), Metadata::new(), day_one + Duration::hours(1));
        index.record_at(features(&["c"]), Metadata::new(), day_one + Duration::days(1));

        assert_eq!(index.timeline_count(), 2);
        let key = day_one.format("%Y-%m-%d").to_string();
        assert_eq!(index.timeline(&key).unwrap().event_ids.len(), 2);
    }

    #[test]
    fn test_export_import_round_trip() {
        let index = index();
        index.record(rich_features(&["ai", "model"]), Metadata::new());
        index.record(rich_features(&["slow", "computers"]), Metadata::new());

        let blob = index.export().unwrap();
        let restored = TemporalIndex::new(TemporalConfig::default());
        restored.import(&blob).unwrap();

        let query = rich_features(&["ai", "model"]);
        let original: Vec<Uuid> = index
            .search(&query, None, 10)
            .unwrap()
            .into_iter()
            .map(|h| h.event.id)
            .collect();
        let recovered: Vec<Uuid> = restored
            .search(&query, None, 10)
            .unwrap()
            .into_iter()
            .map(|h| h.event.id)
            .collect();
        assert_eq!(original, recovered);
        assert_eq!(restored.len(), 2);
        // Sequence numbering continues after the imported events.
        let next = restored.record(features(&["next"]), Metadata::new());
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn test_pattern_store_is_bounded() {
        let index = TemporalIndex::new(TemporalConfig {
            max_patterns: 5,
            ..Default::default()
        });
        let base = Utc::now() - Duration::hours(20);
        for i in 0..40 {
            index.record_at(
                features(&["tick"]),
                Metadata::new(),
                base + Duration::minutes(30 * i),
            );
        }
        assert!(index.pattern_count() <= 5);
    }
}
