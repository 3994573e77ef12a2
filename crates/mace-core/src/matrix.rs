//! Observation matrices
//!
//! Converts raw observations for one schema into sparse items x annotators
//! matrices. Single-choice schemas yield one matrix over the schema's
//! labels; multiselect schemas yield one binary matrix per option.
//!
//! Items with fewer than `min_annotations_per_item` distinct annotators are
//! dropped, and the build fails with `InsufficientData` when fewer than
//! `min_items` items remain.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::MaceConfig;
use crate::error::{MaceError, Result};
use crate::observation::AnnotationObservation;
use crate::schema::CategoricalSchema;

/// Binary vocabulary index for "option not selected"
pub const NOT_SELECTED: usize = 0;
/// Binary vocabulary index for "option selected"
pub const SELECTED: usize = 1;

/// Sparse mapping item -> {annotator -> observed label}, scoped to one
/// schema or one binary option sub-problem.
///
/// Items and annotators are kept in sorted order and addressed by dense
/// indices, which is what the estimator iterates over.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMatrix {
    name: String,
    num_labels: usize,
    items: Vec<String>,
    annotators: Vec<String>,
    /// Per item: (annotator index, label index), sorted by annotator
    rows: Vec<Vec<(usize, usize)>>,
}

impl ObservationMatrix {
    /// Build a matrix from (item, annotator, label) triples.
    ///
    /// Later triples for the same (item, annotator) pair replace earlier
    /// ones. Labels are not range-checked here; the builder does that.
    pub fn from_entries<I, S1, S2>(name: impl Into<String>, num_labels: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = (S1, S2, usize)>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let mut cells: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for (item, annotator, label) in entries {
            cells
                .entry(item.into())
                .or_default()
                .insert(annotator.into(), label);
        }
        Self::from_cells(name.into(), num_labels, cells)
    }

    fn from_cells(
        name: String,
        num_labels: usize,
        cells: BTreeMap<String, BTreeMap<String, usize>>,
    ) -> Self {
        let annotators: Vec<String> = cells
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let annotator_index: BTreeMap<&str, usize> = annotators
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();

        let mut items = Vec::with_capacity(cells.len());
        let mut rows = Vec::with_capacity(cells.len());
        for (item, row) in &cells {
            items.push(item.clone());
            rows.push(
                row.iter()
                    .map(|(annotator, &label)| (annotator_index[annotator.as_str()], label))
                    .collect(),
            );
        }

        Self {
            name,
            num_labels,
            items,
            annotators,
            rows,
        }
    }

    /// Schema name, or `schema[option]` for a multiselect sub-problem
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_annotators(&self) -> usize {
        self.annotators.len()
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn annotators(&self) -> &[String] {
        &self.annotators
    }

    /// Observations for the item at `item_idx` as (annotator index, label)
    pub fn row(&self, item_idx: usize) -> &[(usize, usize)] {
        &self.rows[item_idx]
    }

    /// Total number of observations
    pub fn num_observations(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Look up the label an annotator gave an item
    pub fn get(&self, item_id: &str, annotator_id: &str) -> Option<usize> {
        let item_idx = self.items.binary_search_by(|i| i.as_str().cmp(item_id)).ok()?;
        let annotator_idx = self
            .annotators
            .binary_search_by(|a| a.as_str().cmp(annotator_id))
            .ok()?;
        self.rows[item_idx]
            .iter()
            .find(|(a, _)| *a == annotator_idx)
            .map(|(_, label)| *label)
    }

    /// The single label carried by every observation, if the matrix is unanimous
    pub fn unanimous_label(&self) -> Option<usize> {
        let mut labels = self.rows.iter().flatten().map(|(_, label)| *label);
        let first = labels.next()?;
        labels.all(|label| label == first).then_some(first)
    }
}

/// Diagnostics collected while building matrices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixStats {
    /// Observations that landed in a retained item
    pub observations_used: usize,
    /// Observations whose label index is outside the schema vocabulary
    pub skipped_out_of_range: usize,
    /// Observations replaced by a later one for the same (item, annotator)
    pub duplicates_overridden: usize,
    /// Items dropped for having too few annotators
    pub excluded_items: usize,
    /// Items kept
    pub eligible_items: usize,
}

/// Matrices for one schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMatrices {
    Single(ObservationMatrix),
    /// One binary matrix per option, in option order
    Multi(Vec<ObservationMatrix>),
}

/// Output of a successful build
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltMatrices {
    pub matrices: SchemaMatrices,
    pub stats: MatrixStats,
}

/// How close a schema is to being computable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible_items: usize,
    pub min_items: usize,
    /// Fewest further annotations that could make the schema eligible
    pub annotations_needed: u64,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        self.eligible_items >= self.min_items
    }
}

/// Turns raw observations into observation matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixBuilder {
    min_annotations_per_item: usize,
    min_items: usize,
}

/// Per-item annotations before filtering: annotator -> selected labels
type Grouped = BTreeMap<String, BTreeMap<String, BTreeSet<usize>>>;

impl MatrixBuilder {
    pub fn new(min_annotations_per_item: usize, min_items: usize) -> Self {
        Self {
            min_annotations_per_item,
            min_items,
        }
    }

    pub fn from_config(config: &MaceConfig) -> Self {
        Self::new(config.min_annotations_per_item, config.min_items)
    }

    /// Build the matrices for `schema`, ignoring observations for other schemas.
    pub fn build(
        &self,
        schema: &CategoricalSchema,
        observations: &[AnnotationObservation],
    ) -> Result<BuiltMatrices> {
        let (grouped, mut stats) = self.group(schema, observations);

        let retained: Grouped = grouped
            .into_iter()
            .filter(|(_, annotators)| annotators.len() >= self.min_annotations_per_item)
            .collect();
        stats.eligible_items = retained.len();
        stats.excluded_items -= retained.len();

        if retained.len() < self.min_items {
            return Err(MaceError::InsufficientData {
                schema: schema.name().to_string(),
                eligible_items: retained.len(),
                min_items: self.min_items,
            });
        }

        stats.observations_used = retained
            .values()
            .flat_map(|annotators| annotators.values())
            .map(|labels| match schema {
                CategoricalSchema::Single { .. } => 1,
                CategoricalSchema::Multi { .. } => labels.len(),
            })
            .sum();

        let matrices = match schema {
            CategoricalSchema::Single { name, labels, .. } => {
                let cells = retained
                    .into_iter()
                    .map(|(item, annotators)| {
                        let row = annotators
                            .into_iter()
                            .filter_map(|(annotator, labels)| {
                                labels.first().map(|&label| (annotator, label))
                            })
                            .collect();
                        (item, row)
                    })
                    .collect();
                SchemaMatrices::Single(ObservationMatrix::from_cells(
                    name.clone(),
                    labels.len(),
                    cells,
                ))
            }
            CategoricalSchema::Multi { name, options } => SchemaMatrices::Multi(
                options
                    .iter()
                    .enumerate()
                    .map(|(option_idx, option)| {
                        let cells = retained
                            .iter()
                            .map(|(item, annotators)| {
                                let row = annotators
                                    .iter()
                                    .map(|(annotator, selected)| {
                                        let label = if selected.contains(&option_idx) {
                                            SELECTED
                                        } else {
                                            NOT_SELECTED
                                        };
                                        (annotator.clone(), label)
                                    })
                                    .collect();
                                (item.clone(), row)
                            })
                            .collect();
                        ObservationMatrix::from_cells(format!("{}[{}]", name, option), 2, cells)
                    })
                    .collect(),
            ),
        };

        Ok(BuiltMatrices { matrices, stats })
    }

    /// Report how many items are eligible and how far the schema is from `min_items`.
    pub fn eligibility(
        &self,
        schema: &CategoricalSchema,
        observations: &[AnnotationObservation],
    ) -> Eligibility {
        let (grouped, _) = self.group(schema, observations);
        let required = self.min_annotations_per_item;

        let mut deficits: Vec<usize> = grouped
            .values()
            .map(|annotators| required.saturating_sub(annotators.len()))
            .collect();
        deficits.sort_unstable();

        let eligible_items = deficits.iter().filter(|&&d| d == 0).count();
        let missing_items = self.min_items.saturating_sub(eligible_items);

        // Cheapest path: top up the nearest-to-eligible items first, then new items.
        let from_existing: usize = deficits
            .iter()
            .filter(|&&d| d > 0)
            .take(missing_items)
            .sum();
        let partial_items = deficits.iter().filter(|&&d| d > 0).count();
        let fresh_items = missing_items.saturating_sub(partial_items);

        Eligibility {
            eligible_items,
            min_items: self.min_items,
            annotations_needed: (from_existing + fresh_items * required) as u64,
        }
    }

    /// Group observations by item and annotator, range-checking labels.
    fn group(
        &self,
        schema: &CategoricalSchema,
        observations: &[AnnotationObservation],
    ) -> (Grouped, MatrixStats) {
        let num_labels = schema.num_labels();
        let mut stats = MatrixStats::default();
        let mut grouped: Grouped = BTreeMap::new();

        for obs in observations {
            if obs.schema_name != schema.name() {
                continue;
            }
            if obs.observed_label_index >= num_labels {
                stats.skipped_out_of_range += 1;
                continue;
            }

            let labels = grouped
                .entry(obs.item_id.clone())
                .or_default()
                .entry(obs.annotator_id.clone())
                .or_default();

            match schema {
                CategoricalSchema::Single { .. } => {
                    if !labels.is_empty() {
                        stats.duplicates_overridden += 1;
                        labels.clear();
                    }
                    labels.insert(obs.observed_label_index);
                }
                CategoricalSchema::Multi { .. } => {
                    if !labels.insert(obs.observed_label_index) {
                        stats.duplicates_overridden += 1;
                    }
                }
            }
        }

        stats.excluded_items = grouped.len();
        (grouped, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaConfig;
    use pretty_assertions::assert_eq;

    fn radio() -> CategoricalSchema {
        CategoricalSchema::from_config(&SchemaConfig::new("sentiment", "radio").labels([
            "pos", "neg", "neu",
        ]))
        .unwrap()
    }

    fn topics() -> CategoricalSchema {
        CategoricalSchema::from_config(
            &SchemaConfig::new("topics", "multiselect").labels(["a", "b", "c"]),
        )
        .unwrap()
    }

    fn obs(item: &str, annotator: &str, schema: &str, label: usize) -> AnnotationObservation {
        AnnotationObservation::new(item, annotator, schema, label)
    }

    #[test]
    fn builds_single_matrix() {
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u2", "sentiment", 1),
            obs("i2", "u1", "sentiment", 2),
            obs("i2", "u2", "sentiment", 2),
        ];
        let built = MatrixBuilder::new(2, 2).build(&radio(), &observations).unwrap();
        let SchemaMatrices::Single(matrix) = built.matrices else {
            panic!("expected a single matrix");
        };
        assert_eq!(matrix.num_items(), 2);
        assert_eq!(matrix.num_annotators(), 2);
        assert_eq!(matrix.get("i1", "u2"), Some(1));
        assert_eq!(matrix.get("i2", "u1"), Some(2));
        assert_eq!(matrix.get("i3", "u1"), None);
        assert_eq!(built.stats.observations_used, 4);
    }

    #[test]
    fn excludes_items_below_annotation_threshold() {
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u2", "sentiment", 0),
            obs("i2", "u1", "sentiment", 1),
        ];
        let built = MatrixBuilder::new(2, 1).build(&radio(), &observations).unwrap();
        let SchemaMatrices::Single(matrix) = built.matrices else {
            panic!("expected a single matrix");
        };
        assert_eq!(matrix.items(), &["i1".to_string()]);
        assert_eq!(built.stats.excluded_items, 1);
        assert_eq!(built.stats.eligible_items, 1);
    }

    #[test]
    fn insufficient_items_is_reported() {
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u2", "sentiment", 0),
        ];
        let err = MatrixBuilder::new(2, 5)
            .build(&radio(), &observations)
            .unwrap_err();
        assert_eq!(
            err,
            MaceError::InsufficientData {
                schema: "sentiment".into(),
                eligible_items: 1,
                min_items: 5,
            }
        );
    }

    #[test]
    fn out_of_range_and_foreign_observations_skipped() {
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u2", "sentiment", 7),
            obs("i1", "u3", "other", 0),
            obs("i1", "u4", "sentiment", 0),
        ];
        let built = MatrixBuilder::new(2, 1).build(&radio(), &observations).unwrap();
        assert_eq!(built.stats.skipped_out_of_range, 1);
        assert_eq!(built.stats.observations_used, 2);
    }

    #[test]
    fn last_duplicate_wins_for_single_choice() {
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u1", "sentiment", 2),
            obs("i1", "u2", "sentiment", 2),
        ];
        let built = MatrixBuilder::new(2, 1).build(&radio(), &observations).unwrap();
        let SchemaMatrices::Single(matrix) = built.matrices else {
            panic!("expected a single matrix");
        };
        assert_eq!(matrix.get("i1", "u1"), Some(2));
        assert_eq!(built.stats.duplicates_overridden, 1);
    }

    #[test]
    fn multiselect_decomposes_into_binary_matrices() {
        let observations = vec![
            obs("i1", "u1", "topics", 0),
            obs("i1", "u1", "topics", 2),
            obs("i1", "u2", "topics", 0),
        ];
        let built = MatrixBuilder::new(2, 1).build(&topics(), &observations).unwrap();
        let SchemaMatrices::Multi(matrices) = built.matrices else {
            panic!("expected per-option matrices");
        };
        assert_eq!(matrices.len(), 3);
        assert_eq!(matrices[0].name(), "topics[a]");
        assert_eq!(matrices[0].get("i1", "u1"), Some(SELECTED));
        assert_eq!(matrices[0].get("i1", "u2"), Some(SELECTED));
        assert_eq!(matrices[1].get("i1", "u1"), Some(NOT_SELECTED));
        assert_eq!(matrices[2].get("i1", "u1"), Some(SELECTED));
        assert_eq!(matrices[2].get("i1", "u2"), Some(NOT_SELECTED));
        assert!(matrices.iter().all(|m| m.num_labels() == 2));
        assert_eq!(matrices[1].unanimous_label(), Some(NOT_SELECTED));
        assert_eq!(matrices[0].unanimous_label(), Some(SELECTED));
        assert_eq!(matrices[2].unanimous_label(), None);
    }

    #[test]
    fn eligibility_counts_cheapest_gap() {
        // i1 eligible, i2 needs one more, i3 needs two more; two more items wanted
        let observations = vec![
            obs("i1", "u1", "sentiment", 0),
            obs("i1", "u2", "sentiment", 0),
            obs("i1", "u3", "sentiment", 0),
            obs("i2", "u1", "sentiment", 0),
            obs("i2", "u2", "sentiment", 0),
            obs("i3", "u1", "sentiment", 0),
        ];
        let eligibility = MatrixBuilder::new(3, 3).eligibility(&radio(), &observations);
        assert_eq!(eligibility.eligible_items, 1);
        assert_eq!(eligibility.annotations_needed, 3);
        assert!(!eligibility.is_eligible());

        // With no items at all, every required item needs a full set of annotations
        let empty = MatrixBuilder::new(3, 2).eligibility(&radio(), &[]);
        assert_eq!(empty.annotations_needed, 6);
    }
}
