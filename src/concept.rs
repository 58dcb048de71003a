//! Concept co-occurrence graph with coarse clustering
//!
//! Nodes are concept names with running frequencies; edges are co-occurrence
//! counts keyed by the lexicographically ordered name pair, so either
//! argument order resolves to the same weight. Adjacency sets are kept
//! symmetric with the weight table.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ConceptConfig;
use crate::error::Result;

/// Source-text snippets retained per concept for explainability
const SNIPPET_CAPACITY: usize = 10;

/// A tracked concept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    pub name: String,
    /// Number of ingestions whose concepts included this name
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
    /// Names of directly connected concepts (undirected)
    pub connections: BTreeSet<String>,
    /// Ring of recent source snippets, newest last
    pub snippets: VecDeque<String>,
}

/// A search hit with its score
#[derive(Debug, Clone)]
pub struct ScoredConcept {
    pub concept: ConceptNode,
    pub relevance: f64,
}

/// A bounded group of closely co-occurring concepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptCluster {
    pub concepts: Vec<String>,
    /// Mean pairwise edge weight across members
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphState {
    concepts: HashMap<String, ConceptNode>,
    relationships: HashMap<(String, String), u64>,
    clusters: VecDeque<ConceptCluster>,
}

/// Frequency-tracked concept graph
pub struct ConceptGraph {
    config: ConceptConfig,
    state: RwLock<GraphState>,
}

/// Canonical undirected edge key: lexicographically smaller name first
fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl ConceptGraph {
    pub fn new(config: ConceptConfig) -> Self {
        Self {
            config,
            state: RwLock::new(GraphState::default()),
        }
    }

    /// Register or update nodes for one ingestion batch
    ///
    /// Duplicate names within the batch count once. Returns the list of
    /// names processed. Capacity sweeps and clustering run afterwards.
    pub fn ingest(&self, concepts: &[String], snippet: &str) -> Vec<String> {
        if concepts.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let mut processed: Vec<String> = Vec::with_capacity(concepts.len());
        {
            let mut state = self.state.write();
            for name in concepts {
                if processed.contains(name) {
                    continue;
                }
                let node = state
                    .concepts
                    .entry(name.clone())
                    .or_insert_with(|| ConceptNode {
                        name: name.clone(),
                        frequency: 0,
                        last_seen: now,
                        connections: BTreeSet::new(),
                        snippets: VecDeque::new(),
                    });
                node.frequency += 1;
                node.last_seen = now;
                if node.snippets.len() == SNIPPET_CAPACITY {
                    node.snippets.pop_front();
                }
                node.snippets.push_back(snippet.to_string());
                processed.push(name.clone());
            }
        }
        self.enforce_capacity();
        self.maybe_cluster();
        processed
    }

    /// All-pairs co-occurrence increment for one ingestion batch
    ///
    /// O(n²) in the batch size, which is one observation's concept list.
    pub fn update_relationships(&self, concepts: &[String]) {
        let mut unique: Vec<&String> = Vec::with_capacity(concepts.len());
        for concept in concepts {
            if !unique.contains(&concept) {
                unique.push(concept);
            }
        }
        if unique.len() < 2 {
            return;
        }

        let mut state = self.state.write();
        for i in 0..unique.len() {
            for j in (i + 1)..unique.len() {
                let key = edge_key(unique[i], unique[j]);
                *state.relationships.entry(key).or_insert(0) += 1;
                if let Some(node) = state.concepts.get_mut(unique[i].as_str()) {
                    node.connections.insert(unique[j].clone());
                }
                if let Some(node) = state.concepts.get_mut(unique[j].as_str()) {
                    node.connections.insert(unique[i].clone());
                }
            }
        }
    }

    /// Co-occurrence weight between two concepts, insensitive to order
    pub fn relationship_weight(&self, a: &str, b: &str) -> u64 {
        self.state
            .read()
            .relationships
            .get(&edge_key(a, b))
            .copied()
            .unwrap_or(0)
    }

    /// Score every node against the query concepts
    ///
    /// +1.0 for an exact name match, +0.5 per connected query concept, plus
    /// `cluster.strength × 0.2` when the node shares a cluster with a query
    /// concept. Hits below the relevance threshold are discarded.
    pub fn search(&self, query: &[String], limit: usize) -> Vec<ScoredConcept> {
        let query_set: HashSet<&str> = query.iter().map(String::as_str).collect();
        let mut hits: Vec<ScoredConcept> = {
            let state = self.state.read();
            state
                .concepts
                .values()
                .filter_map(|node| {
                    let mut relevance = 0.0;
                    if query_set.contains(node.name.as_str()) {
                        relevance += 1.0;
                    }
                    for q in &query_set {
                        if node.connections.contains(*q) {
                            relevance += 0.5;
                        }
                    }
                    let mut cluster_bonus = 0.0_f64;
                    for cluster in &state.clusters {
                        let has_node = cluster.concepts.iter().any(|c| c == &node.name);
                        let has_query =
                            cluster.concepts.iter().any(|c| query_set.contains(c.as_str()));
                        if has_node && has_query {
                            cluster_bonus = cluster_bonus.max(cluster.strength * 0.2);
                        }
                    }
                    relevance += cluster_bonus;
                    (relevance >= self.config.relevance_threshold).then(|| ScoredConcept {
                        concept: node.clone(),
                        relevance,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.concept.frequency.cmp(&a.concept.frequency))
                .then_with(|| a.concept.name.cmp(&b.concept.name))
        });
        hits.truncate(limit);
        hits
    }

    /// Remove stale low-frequency nodes, cascading their edges
    ///
    /// A node goes only when its frequency is below the configured minimum
    /// AND it has not been seen within the prune window. Returns the number
    /// of nodes removed.
    pub fn consolidate(&self) -> usize {
        let cutoff = Utc::now() - self.config.prune_age;
        let mut state = self.state.write();
        let stale: Vec<String> = state
            .concepts
            .values()
            .filter(|node| node.frequency < self.config.min_frequency && node.last_seen < cutoff)
            .map(|node| node.name.clone())
            .collect();
        for name in &stale {
            Self::remove_node(&mut state, name);
        }
        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "concept consolidation pruned nodes");
        }
        stale.len()
    }

    /// Build one cluster from the highest-connectivity nodes once the graph
    /// passes the trigger size; cluster history is bounded, oldest dropped
    pub fn maybe_cluster(&self) {
        let mut state = self.state.write();
        if state.concepts.len() <= self.config.cluster_trigger {
            return;
        }

        let mut by_degree: Vec<(String, usize)> = state
            .concepts
            .values()
            .map(|node| (node.name.clone(), node.connections.len()))
            .collect();
        by_degree.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let members: Vec<String> = by_degree
            .into_iter()
            .take(self.config.cluster_size)
            .map(|(name, _)| name)
            .collect();
        if members.len() < 2 {
            return;
        }

        let mut total = 0u64;
        let mut pairs = 0u64;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                total += state
                    .relationships
                    .get(&edge_key(&members[i], &members[j]))
                    .copied()
                    .unwrap_or(0);
                pairs += 1;
            }
        }
        let strength = if pairs == 0 {
            0.0
        } else {
            total as f64 / pairs as f64
        };

        state.clusters.push_back(ConceptCluster {
            concepts: members,
            strength,
            created_at: Utc::now(),
        });
        while state.clusters.len() > self.config.cluster_history {
            state.clusters.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().concepts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concepts
    }

    pub fn cluster_count(&self) -> usize {
        self.state.read().clusters.len()
    }

    /// Fill level in [0, 1]
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.config.max_concepts as f64
    }

    /// Serialize the full graph state as an opaque blob
    pub fn export(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.state.read())?)
    }

    /// Replace the graph state from a previously exported blob
    pub fn import(&self, blob: &[u8]) -> Result<()> {
        let restored: GraphState = bincode::deserialize(blob)?;
        *self.state.write() = restored;
        Ok(())
    }

    /// Past capacity, sweep the lowest-frequency decile with cascading
    /// edge removal
    fn enforce_capacity(&self) {
        let mut state = self.state.write();
        if state.concepts.len() <= self.config.max_concepts {
            return;
        }

        let mut by_frequency: Vec<(String, u64)> = state
            .concepts
            .values()
            .map(|node| (node.name.clone(), node.frequency))
            .collect();
        by_frequency.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let victims = (state.concepts.len() / 10).max(1);
        let removed: Vec<String> = by_frequency
            .into_iter()
            .take(victims)
            .map(|(name, _)| name)
            .collect();
        for name in &removed {
            Self::remove_node(&mut state, name);
        }
        tracing::debug!(removed = removed.len(), "concept capacity sweep");
    }

    fn remove_node(state: &mut GraphState, name: &str) {
        state.concepts.remove(name);
        state
            .relationships
            .retain(|(a, b), _| a != name && b != name);
        for node in state.concepts.values_mut() {
            node.connections.remove(name);
        }
        for cluster in state.clusters.iter_mut() {
            cluster.concepts.retain(|c| c != name);
        }
    }
}
