//! MACE Core Engine
//!
//! Computational kernel for multi-annotator consensus: builds observation
//! matrices from raw annotations, fits the MACE competence model with
//! variational EM over several seeded restarts, and derives per-item
//! consensus labels, label entropies and per-annotator competence.
//!
//! Everything here is pure and synchronous. Scheduling, storage and
//! logging live in the `mace` runtime crate.
//!
//! # Features
//!
//! - `parallel` - Run the restarts of one sub-problem on rayon
//!
//! # Example
//!
//! ```rust
//! use mace_core::{AnnotationObservation, CategoricalSchema, Deadline, MaceConfig, Pipeline, SchemaConfig};
//!
//! let schema = CategoricalSchema::from_config(
//!     &SchemaConfig::new("sentiment", "radio").labels(["positive", "negative"]),
//! )
//! .unwrap();
//!
//! let mut observations = Vec::new();
//! for item in ["i1", "i2"] {
//!     for annotator in ["u1", "u2", "u3"] {
//!         observations.push(AnnotationObservation::new(item, annotator, "sentiment", 0));
//!     }
//! }
//!
//! let pipeline = Pipeline::new(MaceConfig { min_items: 2, ..Default::default() }).unwrap();
//! let consensus = pipeline.run(&schema, &observations, &Deadline::none()).unwrap();
//! assert_eq!(consensus.label_entropy("i1"), Some(0.0));
//! ```

pub mod config;
pub mod error;
pub mod estimator;
pub mod matrix;
pub mod multilabel;
pub mod observation;
pub mod pipeline;
pub mod prediction;
pub mod restart;
pub mod schema;

// Re-export main types at crate root
pub use config::{EstimatorConfig, MaceConfig, Priors};
pub use error::{MaceError, Result};
pub use estimator::{argmax, entropy, Deadline, EmModel, VariationalEm};
pub use matrix::{
    BuiltMatrices, Eligibility, MatrixBuilder, MatrixStats, ObservationMatrix, SchemaMatrices,
    NOT_SELECTED, SELECTED,
};
pub use multilabel::{merge, MergedConsensus, MergedItem};
pub use observation::AnnotationObservation;
pub use pipeline::{ItemResult, Pipeline, PredictedLabel, SchemaConsensus};
pub use prediction::{Consensus, FitDiagnostics, ItemConsensus};
pub use restart::{RestartSelector, Selection};
pub use schema::{AnnotationType, CategoricalSchema, SchemaConfig};
