//! Per-schema consensus pipeline
//!
//! Matrix builder -> restart selector -> prediction, with multiselect
//! schemas fanned out per option and merged back. Pure and synchronous:
//! the hosting runtime decides when and where this runs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MaceConfig;
use crate::error::Result;
use crate::estimator::Deadline;
use crate::matrix::{Eligibility, MatrixBuilder, MatrixStats, ObservationMatrix, SchemaMatrices};
use crate::multilabel;
use crate::observation::AnnotationObservation;
use crate::prediction::{Consensus, FitDiagnostics};
use crate::restart::RestartSelector;
use crate::schema::CategoricalSchema;

/// Predicted label of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedLabel {
    /// Label index for radio/likert/select schemas
    Single(usize),
    /// Selected option indices for multiselect schemas
    Set(Vec<usize>),
}

impl PredictedLabel {
    /// Label indices, one for single-choice and zero or more for multiselect
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Self::Single(idx) => vec![*idx],
            Self::Set(indices) => indices.clone(),
        }
    }
}

/// Consensus for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub predicted_label: PredictedLabel,
    /// Nats; for multiselect the mean over options
    pub label_entropy: f64,
    /// Posterior over labels, or per-option P(selected) for multiselect
    pub distribution: Vec<f64>,
}

/// Everything one schema run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConsensus {
    pub schema_name: String,
    pub labels: Vec<String>,
    pub multi: bool,
    pub items: BTreeMap<String, ItemResult>,
    /// Per annotator, in [0, 1]
    pub annotator_competence: BTreeMap<String, f64>,
    /// One entry per solved matrix (one per option for multiselect)
    pub diagnostics: Vec<FitDiagnostics>,
    pub stats: MatrixStats,
}

impl SchemaConsensus {
    pub fn predicted_label(&self, item_id: &str) -> Option<&PredictedLabel> {
        self.items.get(item_id).map(|i| &i.predicted_label)
    }

    pub fn label_entropy(&self, item_id: &str) -> Option<f64> {
        self.items.get(item_id).map(|i| i.label_entropy)
    }

    /// Label names for a predicted label
    pub fn label_names(&self, label: &PredictedLabel) -> Vec<String> {
        label
            .indices()
            .into_iter()
            .filter_map(|idx| self.labels.get(idx).cloned())
            .collect()
    }
}

/// Runs the full consensus computation for one schema
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: MaceConfig,
    builder: MatrixBuilder,
}

impl Pipeline {
    /// Create a pipeline, validating the configuration.
    pub fn new(config: MaceConfig) -> Result<Self> {
        config.validate()?;
        let builder = MatrixBuilder::from_config(&config);
        Ok(Self { config, builder })
    }

    pub fn config(&self) -> &MaceConfig {
        &self.config
    }

    /// Deadline for one full run under the configured ceiling
    pub fn deadline(&self) -> Deadline {
        Deadline::after(Duration::from_secs(self.config.max_run_seconds))
    }

    /// How far `schema` is from `min_items` eligible items
    pub fn eligibility(
        &self,
        schema: &CategoricalSchema,
        observations: &[AnnotationObservation],
    ) -> Eligibility {
        self.builder.eligibility(schema, observations)
    }

    /// Compute consensus for `schema`.
    ///
    /// Fails with `InsufficientData` before any fitting when too few items
    /// are eligible, and with `RunFailure` / `DeadlineExceeded` when no
    /// usable model comes out of the restarts.
    pub fn run(
        &self,
        schema: &CategoricalSchema,
        observations: &[AnnotationObservation],
        deadline: &Deadline,
    ) -> Result<SchemaConsensus> {
        let built = self.builder.build(schema, observations)?;

        let (items, annotator_competence, diagnostics) = match &built.matrices {
            SchemaMatrices::Single(matrix) => {
                let consensus = self.solve(matrix, 0, deadline)?;
                let items = consensus
                    .items
                    .into_iter()
                    .map(|(id, item)| {
                        (
                            id,
                            ItemResult {
                                predicted_label: PredictedLabel::Single(item.label),
                                label_entropy: item.entropy,
                                distribution: item.distribution,
                            },
                        )
                    })
                    .collect();
                (items, consensus.competence, vec![consensus.diagnostics])
            }
            SchemaMatrices::Multi(matrices) => {
                let per_option = matrices
                    .iter()
                    .enumerate()
                    .map(|(option, matrix)| self.solve(matrix, option, deadline))
                    .collect::<Result<Vec<_>>>()?;
                let merged = multilabel::merge(&per_option);
                let items = merged
                    .items
                    .into_iter()
                    .map(|(id, item)| {
                        (
                            id,
                            ItemResult {
                                predicted_label: PredictedLabel::Set(item.selected),
                                label_entropy: item.entropy,
                                distribution: item.selection_probability,
                            },
                        )
                    })
                    .collect();
                let diagnostics = per_option.into_iter().map(|c| c.diagnostics).collect();
                (items, merged.competence, diagnostics)
            }
        };

        Ok(SchemaConsensus {
            schema_name: schema.name().to_string(),
            labels: schema.labels().to_vec(),
            multi: schema.is_multi(),
            items,
            annotator_competence,
            diagnostics,
            stats: built.stats,
        })
    }

    /// Solve one matrix; `subproblem` separates the seed sequences of options.
    fn solve(
        &self,
        matrix: &ObservationMatrix,
        subproblem: usize,
        deadline: &Deadline,
    ) -> Result<Consensus> {
        if let Some(label) = matrix.unanimous_label() {
            return Ok(Consensus::unanimous(matrix, label));
        }
        let seed = self.config.seed.wrapping_add((subproblem as u64) << 32);
        let selector =
            RestartSelector::new(self.config.estimator(), self.config.num_restarts, seed);
        let selection = selector.select(matrix, deadline)?;
        Ok(Consensus::from_selection(matrix, &selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaceError;
    use crate::schema::SchemaConfig;
    use pretty_assertions::assert_eq;

    fn config() -> MaceConfig {
        MaceConfig {
            enabled: true,
            min_items: 2,
            num_restarts: 3,
            ..Default::default()
        }
    }

    fn obs(item: &str, annotator: &str, schema: &str, label: usize) -> AnnotationObservation {
        AnnotationObservation::new(item, annotator, schema, label)
    }

    #[test]
    fn rejects_invalid_config() {
        let err = Pipeline::new(MaceConfig {
            min_annotations_per_item: 1,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, MaceError::Config(_)));
    }

    #[test]
    fn single_choice_run_reports_every_eligible_item() {
        let schema = CategoricalSchema::from_config(
            &SchemaConfig::new("sentiment", "radio").labels(["pos", "neg"]),
        )
        .unwrap();
        let mut observations = Vec::new();
        for item in 0..4 {
            let id = format!("i{}", item);
            for annotator in ["a", "b", "c"] {
                observations.push(obs(&id, annotator, "sentiment", item % 2));
            }
        }
        // below min_annotations_per_item
        observations.push(obs("lonely", "a", "sentiment", 0));

        let pipeline = Pipeline::new(config()).unwrap();
        let result = pipeline
            .run(&schema, &observations, &Deadline::none())
            .unwrap();

        assert_eq!(result.items.len(), 4);
        assert!(!result.items.contains_key("lonely"));
        assert_eq!(result.predicted_label("i0"), Some(&PredictedLabel::Single(0)));
        assert_eq!(result.predicted_label("i1"), Some(&PredictedLabel::Single(1)));
        assert_eq!(result.stats.excluded_items, 1);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(
            result.label_names(&PredictedLabel::Single(1)),
            vec!["neg".to_string()]
        );
    }

    #[test]
    fn multiselect_run_merges_options() {
        let schema = CategoricalSchema::from_config(
            &SchemaConfig::new("topics", "multiselect").labels(["x", "y", "z"]),
        )
        .unwrap();
        let mut observations = Vec::new();
        for item in ["i1", "i2", "i3"] {
            for annotator in ["a", "b", "c"] {
                observations.push(obs(item, annotator, "topics", 0));
                observations.push(obs(item, annotator, "topics", 2));
            }
        }

        let pipeline = Pipeline::new(config()).unwrap();
        let result = pipeline
            .run(&schema, &observations, &Deadline::none())
            .unwrap();

        assert!(result.multi);
        assert_eq!(result.diagnostics.len(), 3);
        assert_eq!(result.predicted_label("i2"), Some(&PredictedLabel::Set(vec![0, 2])));
        assert_eq!(result.label_entropy("i2"), Some(0.0));
        assert_eq!(result.annotator_competence["a"], 1.0);
    }

    #[test]
    fn too_few_items_is_insufficient_data() {
        let schema = CategoricalSchema::from_config(
            &SchemaConfig::new("s", "select").labels(["a", "b"]),
        )
        .unwrap();
        let observations = vec![
            obs("i1", "a", "s", 0),
            obs("i1", "b", "s", 0),
            obs("i1", "c", "s", 1),
        ];
        let pipeline = Pipeline::new(config()).unwrap();
        let err = pipeline
            .run(&schema, &observations, &Deadline::none())
            .unwrap_err();
        assert!(err.is_insufficient_data());

        let eligibility = pipeline.eligibility(&schema, &observations);
        assert_eq!(eligibility.eligible_items, 1);
        assert_eq!(eligibility.annotations_needed, 3);
    }
}
