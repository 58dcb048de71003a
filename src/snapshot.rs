//! Snapshot routing for durable layer state
//!
//! Each index exports its state as an opaque blob; a [`SnapshotStore`] is the
//! external collaborator that persists those blobs. The engine only routes
//! bytes; schema and durability are the store's concern.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identifies one of the three memory layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Context,
    Concept,
    Temporal,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Context, Layer::Concept, Layer::Temporal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Context => "context",
            Layer::Concept => "concept",
            Layer::Temporal => "temporal",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable load/save of exported layer state
///
/// Implementations own their error detail and schema evolution; the engine
/// treats blobs as opaque and absorbs failures (it keeps serving from
/// memory and retries persistence on the next consolidation pass).
pub trait SnapshotStore: Send + Sync {
    fn save(&self, layer: Layer, blob: &[u8]) -> anyhow::Result<()>;

    /// `Ok(None)` means no snapshot exists yet (a cold start, not an error)
    fn load(&self, layer: Layer) -> anyhow::Result<Option<Vec<u8>>>;
}

/// In-memory snapshot store
///
/// The default when no durable backend is wired in, and the fixture used by
/// tests. Blobs survive engine restarts that share the store instance.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    blobs: DashMap<Layer, Vec<u8>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, layer: Layer, blob: &[u8]) -> anyhow::Result<()> {
        self.blobs.insert(layer, blob.to_vec());
        Ok(())
    }

    fn load(&self, layer: Layer) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(&layer).map(|entry| entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_snapshot_is_none() {
        let store = MemorySnapshotStore::new();
        assert!(store.load(Layer::Context).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = MemorySnapshotStore::new();
        store.save(Layer::Concept, b"blob").unwrap();
        assert_eq!(store.load(Layer::Concept).unwrap().as_deref(), Some(&b"blob"[..]));
    }

    #[test]
    fn test_save_overwrites() {
        let store = MemorySnapshotStore::new();
        store.save(Layer::Temporal, b"old").unwrap();
        store.save(Layer::Temporal, b"new").unwrap();
        assert_eq!(
            store.load(Layer::Temporal).unwrap().as_deref(),
            Some(&b"new"[..])
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_layers_are_independent() {
        let store = MemorySnapshotStore::new();
        store.save(Layer::Context, b"ctx").unwrap();
        assert!(store.load(Layer::Temporal).unwrap().is_none());
    }

    #[test]
    fn test_layer_display() {
        assert_eq!(Layer::Context.to_string(), "context");
        assert_eq!(Layer::ALL.len(), 3);
    }
}
