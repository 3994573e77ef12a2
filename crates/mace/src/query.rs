//! Query surface types
//!
//! Everything the dashboard and adjudication collaborators read. Callers
//! always get either a committed result with its freshness, or an explicit
//! status saying why there is none.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mace_core::{Eligibility, PredictedLabel};
use serde::{Deserialize, Serialize};

use crate::store::MaceResult;
use crate::trigger::TriggerPhase;

/// How current a committed result is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    /// Annotations received for the schema since the run started
    pub annotations_since_run: u64,
}

impl Freshness {
    pub fn of(result: &MaceResult, total_annotations: u64) -> Self {
        Self {
            version: result.version,
            computed_at: result.computed_at,
            annotations_since_run: total_annotations.saturating_sub(result.annotations_seen),
        }
    }
}

/// Competence of one annotator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatorCompetence {
    /// Mean over the schemas the annotator appears in
    pub overall: f64,
    pub per_schema: BTreeMap<String, f64>,
}

/// Trigger and result status of one schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaStatus {
    pub name: String,
    pub phase: TriggerPhase,
    pub annotations_since_last_run: u64,
    pub annotations_until_next_run: u64,
    pub eligible_items: usize,
    pub freshness: Option<Freshness>,
}

/// Engine overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub enabled: bool,
    pub has_results: bool,
    pub processed_schemas: Vec<String>,
    pub annotator_competence: BTreeMap<String, AnnotatorCompetence>,
    pub total_annotations: u64,
    /// Smallest gap across schemas; `None` when disabled or no schema is configured
    pub annotations_until_next_run: Option<u64>,
    pub schemas: Vec<SchemaStatus>,
}

/// Consensus for one item, ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPrediction {
    pub item_id: String,
    pub predicted_label: PredictedLabel,
    pub label_names: Vec<String>,
    pub label_entropy: f64,
    pub distribution: Vec<f64>,
}

/// Answer to a predictions query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionsResponse {
    /// Eligible but no run has completed yet
    NotComputed { schema: String },
    /// Too few eligible items for a run
    InsufficientData {
        schema: String,
        eligibility: Eligibility,
    },
    Ready {
        schema: String,
        freshness: Freshness,
        items: Vec<ItemPrediction>,
    },
}

/// Outcome of one schema's run attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Result committed under `version`
    Completed { version: u64 },
    /// Eligibility gate not met; nothing ran
    InsufficientData {
        eligible_items: usize,
        min_items: usize,
        annotations_needed: u64,
    },
    /// Another run held the schema; a re-run is pending
    Coalesced,
    /// The run broke; the previous result is untouched
    Failed { reason: String },
    /// Engine is disabled
    Disabled,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl From<Eligibility> for RunStatus {
    fn from(e: Eligibility) -> Self {
        Self::InsufficientData {
            eligible_items: e.eligible_items,
            min_items: e.min_items,
            annotations_needed: e.annotations_needed,
        }
    }
}

/// Run status of one schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRunReport {
    pub schema: String,
    #[serde(flatten)]
    pub status: RunStatus,
}

/// Result of a manual trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schemas: Vec<SchemaRunReport>,
}

impl RunReport {
    /// Schemas that committed a new result
    pub fn processed(&self) -> Vec<&str> {
        self.schemas
            .iter()
            .filter(|r| r.status.is_completed())
            .map(|r| r.schema.as_str())
            .collect()
    }

    pub fn status(&self, schema: &str) -> Option<&RunStatus> {
        self.schemas
            .iter()
            .find(|r| r.schema == schema)
            .map(|r| &r.status)
    }
}
