//! Consensus labels, entropies and annotator competence
//!
//! Derived from the winning restart of one observation matrix. Entropy is
//! reported in nats, matching the natural-log objective. Predicted labels
//! take the posterior argmax with ties going to the lowest label index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::estimator::{argmax, entropy};
use crate::matrix::ObservationMatrix;
use crate::restart::Selection;

/// Consensus for one item of one matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConsensus {
    pub label: usize,
    /// Entropy of `distribution`, in nats
    pub entropy: f64,
    /// Posterior over the matrix vocabulary
    pub distribution: Vec<f64>,
}

/// How a consensus was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub name: String,
    /// Objective of the winning restart; `None` when EM was skipped
    pub objective: Option<f64>,
    pub restart: Option<usize>,
    pub iterations: usize,
    pub converged: bool,
    pub diverged_restarts: usize,
    /// Every observation carried the same label, so EM was skipped
    pub unanimous: bool,
}

/// Per-item consensus and per-annotator competence for one matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub items: BTreeMap<String, ItemConsensus>,
    pub competence: BTreeMap<String, f64>,
    pub diagnostics: FitDiagnostics,
}

impl Consensus {
    /// Read predictions and competence off a fitted model.
    pub fn from_selection(matrix: &ObservationMatrix, selection: &Selection) -> Self {
        let model = &selection.model;

        let items = matrix
            .items()
            .iter()
            .zip(&model.label_posteriors)
            .map(|(item, posterior)| {
                (
                    item.clone(),
                    ItemConsensus {
                        label: argmax(posterior),
                        entropy: entropy(posterior),
                        distribution: posterior.clone(),
                    },
                )
            })
            .collect();

        let competence = matrix
            .annotators()
            .iter()
            .zip(model.competence())
            .filter_map(|(annotator, c)| c.map(|c| (annotator.clone(), c)))
            .collect();

        Self {
            items,
            competence,
            diagnostics: FitDiagnostics {
                name: matrix.name().to_string(),
                objective: Some(model.objective),
                restart: Some(selection.restart),
                iterations: model.iterations,
                converged: model.converged,
                diverged_restarts: selection.diverged.len(),
                unanimous: false,
            },
        }
    }

    /// Consensus for a matrix whose observations all carry `label`.
    ///
    /// The competence model is unidentifiable here, so EM is skipped: every
    /// item takes `label` with zero entropy and every annotator scores 1.
    pub fn unanimous(matrix: &ObservationMatrix, label: usize) -> Self {
        let mut distribution = vec![0.0; matrix.num_labels()];
        distribution[label] = 1.0;

        let items = matrix
            .items()
            .iter()
            .map(|item| {
                (
                    item.clone(),
                    ItemConsensus {
                        label,
                        entropy: 0.0,
                        distribution: distribution.clone(),
                    },
                )
            })
            .collect();

        let competence = matrix
            .annotators()
            .iter()
            .map(|annotator| (annotator.clone(), 1.0))
            .collect();

        Self {
            items,
            competence,
            diagnostics: FitDiagnostics {
                name: matrix.name().to_string(),
                objective: None,
                restart: None,
                iterations: 0,
                converged: true,
                diverged_restarts: 0,
                unanimous: true,
            },
        }
    }
}
