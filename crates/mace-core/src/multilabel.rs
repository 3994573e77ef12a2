//! Multiselect merging
//!
//! A multiselect schema is decomposed by the matrix builder into one binary
//! "selected / not selected" matrix per option, each solved independently.
//! This module recombines the per-option consensus:
//!
//! - predicted label set: options whose sub-problem predicts "selected"
//! - item entropy: mean of the per-option entropies
//! - annotator competence: mean of the annotator's per-option competences,
//!   over every option they took part in

use std::collections::BTreeMap;

use crate::matrix::SELECTED;
use crate::prediction::Consensus;

/// Merged consensus for one item of a multiselect schema
#[derive(Debug, Clone, PartialEq)]
pub struct MergedItem {
    /// Selected option indices, ascending
    pub selected: Vec<usize>,
    /// Mean per-option entropy, in nats
    pub entropy: f64,
    /// Per option: posterior probability of "selected"
    pub selection_probability: Vec<f64>,
}

/// Merged consensus for a multiselect schema
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConsensus {
    pub items: BTreeMap<String, MergedItem>,
    pub competence: BTreeMap<String, f64>,
}

/// Merge per-option consensus, given in option order.
pub fn merge(per_option: &[Consensus]) -> MergedConsensus {
    let num_options = per_option.len();
    let mut items: BTreeMap<String, MergedItem> = BTreeMap::new();

    for (option, consensus) in per_option.iter().enumerate() {
        for (item_id, item) in &consensus.items {
            let merged = items.entry(item_id.clone()).or_insert_with(|| MergedItem {
                selected: Vec::new(),
                entropy: 0.0,
                selection_probability: vec![0.0; num_options],
            });
            if item.label == SELECTED {
                merged.selected.push(option);
            }
            merged.entropy += item.entropy;
            merged.selection_probability[option] =
                item.distribution.get(SELECTED).copied().unwrap_or(0.0);
        }
    }
    if num_options > 0 {
        for item in items.values_mut() {
            item.entropy /= num_options as f64;
        }
    }

    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for consensus in per_option {
        for (annotator, &c) in &consensus.competence {
            let entry = sums.entry(annotator.clone()).or_insert((0.0, 0));
            entry.0 += c;
            entry.1 += 1;
        }
    }
    let competence = sums
        .into_iter()
        .map(|(annotator, (sum, n))| (annotator, sum / n as f64))
        .collect();

    MergedConsensus { items, competence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::{FitDiagnostics, ItemConsensus};
    use pretty_assertions::assert_eq;

    fn option(
        name: &str,
        items: &[(&str, usize, f64)],
        competence: &[(&str, f64)],
        unanimous: bool,
    ) -> Consensus {
        Consensus {
            items: items
                .iter()
                .map(|&(id, label, entropy)| {
                    let p_selected = if label == SELECTED { 0.9 } else { 0.1 };
                    (
                        id.to_string(),
                        ItemConsensus {
                            label,
                            entropy,
                            distribution: vec![1.0 - p_selected, p_selected],
                        },
                    )
                })
                .collect(),
            competence: competence
                .iter()
                .map(|&(a, c)| (a.to_string(), c))
                .collect(),
            diagnostics: FitDiagnostics {
                name: name.to_string(),
                objective: None,
                restart: None,
                iterations: 0,
                converged: true,
                diverged_restarts: 0,
                unanimous,
            },
        }
    }

    #[test]
    fn merges_selected_sets_and_mean_entropy() {
        let per_option = vec![
            option("t[a]", &[("i1", 1, 0.2), ("i2", 0, 0.0)], &[("u1", 0.8)], false),
            option("t[b]", &[("i1", 0, 0.4), ("i2", 1, 0.2)], &[("u1", 0.6)], false),
        ];
        let merged = merge(&per_option);
        assert_eq!(merged.items["i1"].selected, vec![0]);
        assert_eq!(merged.items["i2"].selected, vec![1]);
        assert!((merged.items["i1"].entropy - 0.3).abs() < 1e-12);
        assert!((merged.items["i2"].entropy - 0.1).abs() < 1e-12);
        assert!((merged.competence["u1"] - 0.7).abs() < 1e-12);
        assert_eq!(merged.items["i1"].selection_probability, vec![0.9, 0.1]);
    }

    #[test]
    fn competence_averages_every_option() {
        let per_option = vec![
            option("t[x]", &[("i1", 1, 0.0)], &[("u1", 0.1), ("u2", 0.9)], false),
            option("t[y]", &[("i1", 0, 0.0)], &[("u1", 1.0), ("u2", 1.0)], true),
            option("t[z]", &[("i1", 0, 0.0)], &[("u1", 1.0)], true),
        ];
        let merged = merge(&per_option);
        assert!((merged.competence["u1"] - 0.7).abs() < 1e-12);
        // u2 never took part in option z
        assert!((merged.competence["u2"] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn all_unanimous_options_still_report_competence() {
        let per_option = vec![
            option("t[a]", &[("i1", 1, 0.0)], &[("u1", 1.0)], true),
            option("t[b]", &[("i1", 0, 0.0)], &[("u1", 1.0)], true),
        ];
        let merged = merge(&per_option);
        assert_eq!(merged.competence["u1"], 1.0);
        assert_eq!(merged.items["i1"].selected, vec![0]);
        assert_eq!(merged.items["i1"].entropy, 0.0);
    }
}
