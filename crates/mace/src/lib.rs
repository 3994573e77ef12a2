//! MACE runtime
//!
//! Hosts the `mace-core` kernel inside a service: counts annotations per
//! schema, recomputes consensus in the background when a schema is due,
//! commits results atomically and serves overview / predictions queries.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mace::{MaceEngine, MemoryObservationSource, MemoryResultStore, Settings};
//!
//! # async fn run() -> mace::Result<()> {
//! let settings = Settings::load("mace.json")?;
//! let source = Arc::new(MemoryObservationSource::new());
//! let store = Arc::new(MemoryResultStore::new());
//! let engine = MaceEngine::new(settings.mace, &settings.annotation_schemes, source, store)?;
//!
//! let report = engine.trigger_manual().await?;
//! println!("processed: {:?}", report.processed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod source;
pub mod store;
pub mod tracing;
pub mod trigger;

pub use config::Settings;
pub use engine::MaceEngine;
pub use error::{Error, Result};
pub use query::{
    AnnotatorCompetence, Freshness, ItemPrediction, Overview, PredictionsResponse, RunReport,
    RunStatus, SchemaRunReport, SchemaStatus,
};
pub use source::{MemoryObservationSource, ObservationSource};
pub use store::{MaceResult, MemoryResultStore, ResultSnapshot, ResultStore};
pub use trigger::{FollowUp, RunTicket, SchemaTrigger, TriggerController, TriggerPhase};

pub use mace_core;
