//! Annotation observations
//!
//! One observation is one categorical judgement by one annotator on one
//! item. For multiselect schemas each selected option is its own
//! observation; the options an annotator did not select on an item they
//! annotated are read as "not selected".

use serde::{Deserialize, Serialize};

/// A single recorded label, immutable once produced upstream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationObservation {
    pub item_id: String,
    pub annotator_id: String,
    pub schema_name: String,
    pub observed_label_index: usize,
}

impl AnnotationObservation {
    pub fn new(
        item_id: impl Into<String>,
        annotator_id: impl Into<String>,
        schema_name: impl Into<String>,
        observed_label_index: usize,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            annotator_id: annotator_id.into(),
            schema_name: schema_name.into(),
            observed_label_index,
        }
    }
}
