//! Semantic feature model and the feature-supplier seam
//!
//! Features are produced by an external supplier and consumed as-is; the
//! store never re-derives them. Similarity is deterministic set overlap,
//! not a learned embedding.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Arbitrary caller metadata attached to observations and events
pub type Metadata = HashMap<String, serde_json::Value>;

/// Coarse sentiment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Sentiment score with its label
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sentiment {
    /// Signed score, negative for negative sentiment
    pub score: f64,
    pub label: SentimentLabel,
}

impl Default for Sentiment {
    fn default() -> Self {
        Self {
            score: 0.0,
            label: SentimentLabel::Neutral,
        }
    }
}

/// A keyword with its in-text frequency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub word: String,
    pub freq: u32,
}

/// A named entity extracted from text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity type, e.g. "person" or "org"
    pub kind: String,
    pub value: String,
}

/// Semantic features of one piece of text, as handed in by the supplier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticFeatures {
    pub tokens: Vec<String>,
    pub keywords: Vec<Keyword>,
    pub concepts: Vec<String>,
    pub sentiment: Sentiment,
    pub entities: Vec<Entity>,
}

impl SemanticFeatures {
    /// Keyword words as a set
    pub fn keyword_set(&self) -> HashSet<&str> {
        self.keywords.iter().map(|k| k.word.as_str()).collect()
    }

    /// Concepts as a set
    pub fn concept_set(&self) -> HashSet<&str> {
        self.concepts.iter().map(String::as_str).collect()
    }

    /// Mean of keyword-set and concept-set Jaccard overlap, in [0, 1]
    ///
    /// This is the one similarity measure shared by all three indices.
    pub fn content_similarity(&self, other: &SemanticFeatures) -> f64 {
        let keywords = jaccard(&self.keyword_set(), &other.keyword_set());
        let concepts = jaccard(&self.concept_set(), &other.concept_set());
        (keywords + concepts) / 2.0
    }
}

/// |A ∩ B| / |A ∪ B|; two empty sets score 0
pub fn jaccard<'a>(a: &HashSet<&'a str>, b: &HashSet<&'a str>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Jaccard overlap of two metadata key sets
pub fn key_overlap(a: &Metadata, b: &Metadata) -> f64 {
    let a_keys: HashSet<&str> = a.keys().map(String::as_str).collect();
    let b_keys: HashSet<&str> = b.keys().map(String::as_str).collect();
    jaccard(&a_keys, &b_keys)
}

/// External feature supplier
///
/// Implementations must be pure and stateless from the engine's perspective:
/// the same text always yields the same features, with no hidden dependency
/// on engine state. Failures abort the calling operation before any index is
/// touched, so implementations should return
/// [`MemoryError::FeatureExtraction`](crate::error::MemoryError::FeatureExtraction).
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Result<SemanticFeatures>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(keywords: &[&str], concepts: &[&str]) -> SemanticFeatures {
        SemanticFeatures {
            tokens: vec![],
            keywords: keywords
                .iter()
                .map(|w| Keyword {
                    word: w.to_string(),
                    freq: 1,
                })
                .collect(),
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            sentiment: Sentiment::default(),
            entities: vec![],
        }
    }

    #[test]
    fn test_jaccard_identical() {
        let a: HashSet<&str> = ["x", "y"].into_iter().collect();
        assert!((jaccard(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaccard_disjoint() {
        let a: HashSet<&str> = ["x"].into_iter().collect();
        let b: HashSet<&str> = ["y"].into_iter().collect();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn test_jaccard_empty_sets() {
        let a: HashSet<&str> = HashSet::new();
        assert_eq!(jaccard(&a, &a), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        let a: HashSet<&str> = ["x", "y", "z"].into_iter().collect();
        let b: HashSet<&str> = ["y", "z", "w"].into_iter().collect();
        // 2 shared out of 4 distinct
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_content_similarity_averages_both_overlaps() {
        let a = features(&["ai", "model"], &["ai", "model"]);
        let b = features(&["ai", "model"], &["slow", "computers"]);
        // keywords identical (1.0), concepts disjoint (0.0)
        assert!((a.content_similarity(&b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_key_overlap() {
        let mut a = Metadata::new();
        a.insert("session".into(), serde_json::json!("s1"));
        a.insert("source".into(), serde_json::json!("chat"));
        let mut b = Metadata::new();
        b.insert("session".into(), serde_json::json!("s2"));
        assert!((key_overlap(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_features_serialization() {
        let features = features(&["ai"], &["ai", "model"]);
        let json = serde_json::to_string(&features).unwrap();
        let back: SemanticFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back.concepts, features.concepts);
        assert_eq!(back.keywords, features.keywords);
    }
}
