//! Observation source seam
//!
//! The engine never persists raw labels. It asks the annotation-storage
//! collaborator for the full observation set of a schema when a run starts.

use mace_core::AnnotationObservation;
use parking_lot::RwLock;

use crate::error::Result;

/// Supplies every observation recorded so far for a schema.
pub trait ObservationSource: Send + Sync {
    fn observations(&self, schema: &str) -> Result<Vec<AnnotationObservation>>;
}

/// In-memory observation source for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryObservationSource {
    observations: RwLock<Vec<AnnotationObservation>>,
}

impl MemoryObservationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: Vec<AnnotationObservation>) -> Self {
        Self {
            observations: RwLock::new(observations),
        }
    }

    pub fn push(&self, observation: AnnotationObservation) {
        self.observations.write().push(observation);
    }

    pub fn extend(&self, observations: impl IntoIterator<Item = AnnotationObservation>) {
        self.observations.write().extend(observations);
    }

    pub fn len(&self) -> usize {
        self.observations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.read().is_empty()
    }
}

impl ObservationSource for MemoryObservationSource {
    fn observations(&self, schema: &str) -> Result<Vec<AnnotationObservation>> {
        Ok(self
            .observations
            .read()
            .iter()
            .filter(|o| o.schema_name == schema)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filters_by_schema_in_insertion_order() {
        let source = MemoryObservationSource::new();
        source.push(AnnotationObservation::new("i1", "u1", "a", 0));
        source.push(AnnotationObservation::new("i1", "u1", "b", 1));
        source.extend([AnnotationObservation::new("i2", "u2", "a", 1)]);

        let got = source.observations("a").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].item_id, "i1");
        assert_eq!(got[1].item_id, "i2");
        assert_eq!(source.len(), 3);
        assert!(source.observations("missing").unwrap().is_empty());
    }
}
