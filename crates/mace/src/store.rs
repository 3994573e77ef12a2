//! Result Store
//!
//! Holds the latest committed consensus per schema. Readers take an
//! `Arc<ResultSnapshot>` and keep reading it for as long as they like; a
//! commit builds a new snapshot and swaps the pointer, so a reader never
//! sees one schema's predictions next to another run's competence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mace_core::SchemaConsensus;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One committed schema result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaceResult {
    pub consensus: SchemaConsensus,
    /// Store version this result was committed under (set by `commit`)
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    /// Annotations the schema had received when the run started
    pub annotations_seen: u64,
}

impl MaceResult {
    pub fn new(consensus: SchemaConsensus, annotations_seen: u64) -> Self {
        Self {
            consensus,
            version: 0,
            computed_at: Utc::now(),
            annotations_seen,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.consensus.schema_name
    }
}

/// Immutable view of every committed result
#[derive(Debug, Clone, Default)]
pub struct ResultSnapshot {
    /// Bumped on every commit; 0 means nothing has been committed
    pub version: u64,
    pub results: BTreeMap<String, Arc<MaceResult>>,
}

impl ResultSnapshot {
    pub fn get(&self, schema: &str) -> Option<&Arc<MaceResult>> {
        self.results.get(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.results.keys().cloned().collect()
    }
}

/// Storage seam for committed results.
///
/// Implementations must make `commit` atomic with respect to `current`:
/// a snapshot either contains the new result or it does not.
pub trait ResultStore: Send + Sync {
    /// Latest snapshot. Never blocks on a running computation.
    fn current(&self) -> Arc<ResultSnapshot>;

    /// Replace the result for `result`'s schema wholesale.
    ///
    /// Returns the new store version, which is also stamped on the result.
    fn commit(&self, result: MaceResult) -> u64;
}

/// In-memory result store.
///
/// The snapshot pointer sits behind a `parking_lot::RwLock` that is only
/// held long enough to clone or swap the `Arc`.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    snapshot: RwLock<Arc<ResultSnapshot>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn current(&self) -> Arc<ResultSnapshot> {
        self.snapshot.read().clone()
    }

    fn commit(&self, mut result: MaceResult) -> u64 {
        let mut guard = self.snapshot.write();
        let version = guard.version + 1;
        result.version = version;

        let mut results = guard.results.clone();
        results.insert(result.schema_name().to_string(), Arc::new(result));
        *guard = Arc::new(ResultSnapshot { version, results });
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mace_core::MatrixStats;
    use pretty_assertions::assert_eq;

    fn consensus(schema: &str) -> SchemaConsensus {
        SchemaConsensus {
            schema_name: schema.to_string(),
            labels: vec!["a".into(), "b".into()],
            multi: false,
            items: BTreeMap::new(),
            annotator_competence: BTreeMap::new(),
            diagnostics: Vec::new(),
            stats: MatrixStats::default(),
        }
    }

    #[test]
    fn starts_empty() {
        let store = MemoryResultStore::new();
        let snapshot = store.current();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.is_empty());
        assert!(snapshot.get("s").is_none());
    }

    #[test]
    fn commit_bumps_version_and_stamps_result() {
        let store = MemoryResultStore::new();
        assert_eq!(store.commit(MaceResult::new(consensus("s1"), 4)), 1);
        assert_eq!(store.commit(MaceResult::new(consensus("s2"), 9)), 2);

        let snapshot = store.current();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.get("s1").unwrap().version, 1);
        assert_eq!(snapshot.get("s2").unwrap().annotations_seen, 9);
        assert_eq!(snapshot.schema_names(), vec!["s1", "s2"]);
    }

    #[test]
    fn held_snapshot_is_unaffected_by_later_commits() {
        let store = MemoryResultStore::new();
        store.commit(MaceResult::new(consensus("s"), 1));
        let before = store.current();

        store.commit(MaceResult::new(consensus("s"), 2));

        assert_eq!(before.get("s").unwrap().annotations_seen, 1);
        assert_eq!(store.current().get("s").unwrap().annotations_seen, 2);
        assert_eq!(store.current().results.len(), 1);
    }
}
