//! Retrieval caching
//!
//! Two caches with different shapes: a time-bucketed response cache whose
//! expiry is checked on read (and pruned on insert, never by a background
//! scan), and a small LRU of extracted query features so repeated queries
//! hit the feature supplier once per distinct text.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::engine::Retrieval;
use crate::features::SemanticFeatures;

struct CachedResponse {
    retrieval: Retrieval,
    stored_at: DateTime<Utc>,
}

/// Caches for the retrieval path
pub struct RetrievalCache {
    /// Responses keyed by query/options/time-bucket hash
    responses: DashMap<u64, CachedResponse>,

    /// LRU of extracted query features
    query_features: Mutex<LruCache<String, SemanticFeatures>>,

    config: CacheConfig,
}

/// Cache statistics
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub responses: usize,
    pub query_features: usize,
}

impl RetrievalCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.query_features)
            .unwrap_or_else(|| NonZeroUsize::new(64).expect("64 is non-zero"));
        Self {
            responses: DashMap::new(),
            query_features: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Response cache key over query text, options and the containing
    /// time bucket
    ///
    /// The bucket width equals the response TTL, so a key can never outlive
    /// its bucket by more than one TTL.
    pub fn response_key(
        &self,
        query: &str,
        limit: usize,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> u64 {
        let bucket = Utc::now().timestamp() / self.config.response_ttl.num_seconds().max(1);
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update((limit as u64).to_le_bytes());
        if let Some((start, end)) = time_range {
            hasher.update(start.timestamp_millis().to_le_bytes());
            hasher.update(end.timestamp_millis().to_le_bytes());
        }
        hasher.update(bucket.to_le_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }

    /// Get a cached response; expiry is checked here
    pub fn get_response(&self, key: u64) -> Option<Retrieval> {
        let expired = match self.responses.get(&key) {
            Some(entry) if Utc::now() - entry.stored_at < self.config.response_ttl => {
                return Some(entry.retrieval.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.responses.remove(&key);
        }
        None
    }

    /// Store a response, pruning first when the cache is at its bound
    pub fn set_response(&self, key: u64, retrieval: Retrieval) {
        if self.responses.len() >= self.config.max_responses {
            self.prune();
        }
        self.responses.insert(
            key,
            CachedResponse {
                retrieval,
                stored_at: Utc::now(),
            },
        );
    }

    /// Get cached query features
    pub fn get_query_features(&self, query: &str) -> Option<SemanticFeatures> {
        self.query_features.lock().get(query).cloned()
    }

    /// Store extracted query features
    pub fn set_query_features(&self, query: &str, features: &SemanticFeatures) {
        self.query_features
            .lock()
            .put(query.to_string(), features.clone());
    }

    /// Drop everything
    pub fn clear(&self) {
        self.responses.clear();
        self.query_features.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            responses: self.responses.len(),
            query_features: self.query_features.lock().len(),
        }
    }

    /// Drop expired entries; if the cache is still at its bound, drop the
    /// oldest entries until it is not
    fn prune(&self) {
        let now = Utc::now();
        self.responses
            .retain(|_, entry| now - entry.stored_at < self.config.response_ttl);
        while self.responses.len() >= self.config.max_responses {
            let oldest = self
                .responses
                .iter()
                .min_by_key(|entry| entry.value().stored_at)
                .map(|entry| *entry.key());
            match oldest {
                Some(key) => {
                    self.responses.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConfidenceSummary, Retrieval};
    use chrono::Duration;

    fn empty_retrieval() -> Retrieval {
        Retrieval {
            items: vec![],
            confidence: ConfidenceSummary::default(),
        }
    }

    fn cache(config: CacheConfig) -> RetrievalCache {
        RetrievalCache::new(config)
    }

    #[test]
    fn test_response_miss_then_hit() {
        let cache = cache(CacheConfig::default());
        let key = cache.response_key("ai model", 10, None);
        assert!(cache.get_response(key).is_none());

        cache.set_response(key, empty_retrieval());
        assert!(cache.get_response(key).is_some());
    }

    #[test]
    fn test_response_key_varies_with_options() {
        let cache = cache(CacheConfig::default());
        let a = cache.response_key("ai model", 10, None);
        let b = cache.response_key("ai model", 5, None);
        let c = cache.response_key("other query", 10, None);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Same inputs within one bucket produce the same key.
        assert_eq!(a, cache.response_key("ai model", 10, None));
    }

    #[test]
    fn test_expired_response_dropped_on_read() {
        let cache = cache(CacheConfig {
            response_ttl: Duration::milliseconds(1),
            ..Default::default()
        });
        let key = cache.response_key("query", 10, None);
        cache.set_response(key, empty_retrieval());
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(cache.get_response(key).is_none());
        assert_eq!(cache.stats().responses, 0);
    }

    #[test]
    fn test_response_cache_is_bounded() {
        let cache = cache(CacheConfig {
            max_responses: 4,
            ..Default::default()
        });
        for i in 0..20 {
            let key = cache.response_key(&format!("query {i}"), 10, None);
            cache.set_response(key, empty_retrieval());
        }
        assert!(cache.stats().responses <= 4);
    }

    #[test]
    fn test_query_feature_lru_evicts() {
        let cache = cache(CacheConfig {
            query_features: 2,
            ..Default::default()
        });
        let features = SemanticFeatures::default();
        cache.set_query_features("first", &features);
        cache.set_query_features("second", &features);
        cache.set_query_features("third", &features);

        assert!(cache.get_query_features("first").is_none());
        assert!(cache.get_query_features("second").is_some());
        assert!(cache.get_query_features("third").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = cache(CacheConfig::default());
        let key = cache.response_key("query", 10, None);
        cache.set_response(key, empty_retrieval());
        cache.set_query_features("query", &SemanticFeatures::default());

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.responses, 0);
        assert_eq!(stats.query_features, 0);
    }
}
