//! MACE engine
//!
//! Counts annotation events, runs the consensus pipeline in the background
//! when a schema is due, commits results to the Result Store and answers
//! overview / predictions queries. The numerical work is CPU bound and runs
//! on tokio's blocking pool, so recording an annotation never waits on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use mace_core::{
    AnnotationObservation, CategoricalSchema, Eligibility, ItemResult, MaceConfig, MaceError,
    Pipeline, SchemaConfig, SchemaConsensus,
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::query::{
    AnnotatorCompetence, Freshness, ItemPrediction, Overview, PredictionsResponse, RunReport,
    RunStatus, SchemaRunReport, SchemaStatus,
};
use crate::source::ObservationSource;
use crate::store::{MaceResult, ResultStore};
use crate::tracing::prefix;
use crate::trigger::{FollowUp, TriggerController, TriggerPhase};

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct MaceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Pipeline,
    schemas: BTreeMap<String, CategoricalSchema>,
    triggers: TriggerController,
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ResultStore>,
    runtime: Handle,
}

impl MaceEngine {
    /// Create an engine on the current tokio runtime.
    ///
    /// Fails on an invalid configuration, on any scheme that is not
    /// radio/likert/select/multiselect, or when called outside a runtime.
    pub fn new(
        config: MaceConfig,
        schemes: &[SchemaConfig],
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("MACE engine needs a tokio runtime: {}", e)))?;
        Self::with_handle(config, schemes, source, store, runtime)
    }

    /// Create an engine that spawns background runs on `runtime`.
    pub fn with_handle(
        config: MaceConfig,
        schemes: &[SchemaConfig],
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ResultStore>,
        runtime: Handle,
    ) -> Result<Self> {
        let threshold = config.trigger_every_n;
        let enabled = config.enabled;
        let pipeline = Pipeline::new(config)?;
        let schemas: BTreeMap<String, CategoricalSchema> =
            CategoricalSchema::from_configs(schemes)?
                .into_iter()
                .map(|schema| (schema.name().to_string(), schema))
                .collect();
        let triggers = TriggerController::new(threshold, schemas.keys().cloned());

        info!(
            "{} MACE engine ready ({} schemas, enabled: {}, trigger every {})",
            prefix::OPEN,
            schemas.len(),
            enabled,
            threshold
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                schemas,
                triggers,
                source,
                store,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &MaceConfig {
        self.inner.pipeline.config()
    }

    pub fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Configured schema names
    pub fn schema_names(&self) -> Vec<String> {
        self.inner.schemas.keys().cloned().collect()
    }

    /// Count one accepted annotation for `schema`.
    ///
    /// Once the schema's counter reaches `trigger_every_n` (and the engine is
    /// enabled) a background run is started. While a run holds the schema the
    /// annotation is only counted; the holder rechecks the counter on release.
    /// Never blocks on the computation.
    pub fn record_annotation(&self, schema: &str) -> Result<()> {
        let trigger = self
            .inner
            .triggers
            .get(schema)
            .ok_or_else(|| Error::UnknownSchema(schema.to_string()))?;

        let due = trigger.record(self.inner.triggers.threshold());
        if !due || !self.is_enabled() {
            return Ok(());
        }

        if trigger.phase() == TriggerPhase::Running {
            debug!("{} '{}' is running, counter rechecked on release", prefix::SKIP, schema);
            return Ok(());
        }
        self.spawn_run(schema.to_string(), Origin::Counter);
        Ok(())
    }

    /// Count one observation under its own schema.
    pub fn record_observation(&self, observation: &AnnotationObservation) -> Result<()> {
        self.record_annotation(&observation.schema_name)
    }

    /// Run every schema now, regardless of counters.
    ///
    /// Eligibility gates still apply. Resolves once every schema has either
    /// committed, been skipped, been coalesced into an in-flight run, or failed.
    pub async fn trigger_manual(&self) -> Result<RunReport> {
        if !self.is_enabled() {
            info!("{} manual trigger ignored, MACE is disabled", prefix::SKIP);
            return Ok(RunReport {
                schemas: self
                    .inner
                    .schemas
                    .keys()
                    .map(|schema| SchemaRunReport {
                        schema: schema.clone(),
                        status: RunStatus::Disabled,
                    })
                    .collect(),
            });
        }

        info!(
            "{} manual trigger for {} schemas",
            prefix::RUN,
            self.inner.schemas.len()
        );

        let handles: Vec<_> = self
            .inner
            .schemas
            .keys()
            .map(|schema| {
                let engine = self.clone();
                let name = schema.clone();
                let handle = self
                    .inner
                    .runtime
                    .spawn_blocking(move || engine.run_schema(&name, Origin::Manual));
                (schema.clone(), handle)
            })
            .collect();

        let mut report = RunReport::default();
        for (schema, handle) in handles {
            let status = handle.await.map_err(|e| {
                Error::Internal(format!("MACE run for '{}' panicked: {}", schema, e))
            })?;
            report.schemas.push(SchemaRunReport { schema, status });
        }
        Ok(report)
    }

    /// Engine-wide status: results, competence, counters and readiness.
    pub fn overview(&self) -> Overview {
        let snapshot = self.inner.store.current();
        let enabled = self.is_enabled();

        let mut per_annotator: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for (schema, result) in &snapshot.results {
            for (annotator, &competence) in &result.consensus.annotator_competence {
                per_annotator
                    .entry(annotator.clone())
                    .or_default()
                    .insert(schema.clone(), competence);
            }
        }
        let annotator_competence = per_annotator
            .into_iter()
            .map(|(annotator, per_schema)| {
                let overall = per_schema.values().sum::<f64>() / per_schema.len() as f64;
                (
                    annotator,
                    AnnotatorCompetence {
                        overall,
                        per_schema,
                    },
                )
            })
            .collect();

        let triggers = &self.inner.triggers;
        let schemas: Vec<SchemaStatus> = triggers
            .iter()
            .map(|(name, trigger)| {
                let eligibility = match self.eligibility(name) {
                    Ok(eligibility) => Some(eligibility),
                    Err(e) => {
                        warn!("could not check eligibility of '{}': {}", name, e);
                        None
                    }
                };
                let gap = eligibility.map(|e| e.annotations_needed).unwrap_or(0);
                SchemaStatus {
                    name: name.clone(),
                    phase: trigger.phase(),
                    annotations_since_last_run: trigger.counter(),
                    annotations_until_next_run: triggers.remaining(trigger).max(gap),
                    eligible_items: eligibility.map(|e| e.eligible_items).unwrap_or(0),
                    freshness: snapshot
                        .get(name)
                        .map(|result| Freshness::of(result, trigger.total())),
                }
            })
            .collect();

        let annotations_until_next_run = if enabled {
            schemas.iter().map(|s| s.annotations_until_next_run).min()
        } else {
            None
        };

        Overview {
            enabled,
            has_results: !snapshot.is_empty(),
            processed_schemas: snapshot.schema_names(),
            annotator_competence,
            total_annotations: triggers.total(),
            annotations_until_next_run,
            schemas,
        }
    }

    /// Predicted labels and entropies for `schema`, or for one item of it.
    pub fn predictions(&self, schema: &str, item_id: Option<&str>) -> Result<PredictionsResponse> {
        let trigger = self
            .inner
            .triggers
            .get(schema)
            .ok_or_else(|| Error::UnknownSchema(schema.to_string()))?;

        let snapshot = self.inner.store.current();
        let Some(result) = snapshot.get(schema) else {
            let eligibility = self.eligibility(schema)?;
            return Ok(if eligibility.is_eligible() {
                PredictionsResponse::NotComputed {
                    schema: schema.to_string(),
                }
            } else {
                PredictionsResponse::InsufficientData {
                    schema: schema.to_string(),
                    eligibility,
                }
            });
        };

        let consensus = &result.consensus;
        let to_prediction = |(id, item): (&String, &ItemResult)| ItemPrediction {
            item_id: id.clone(),
            predicted_label: item.predicted_label.clone(),
            label_names: consensus.label_names(&item.predicted_label),
            label_entropy: item.label_entropy,
            distribution: item.distribution.clone(),
        };

        let items = match item_id {
            Some(id) => {
                let (key, item) = consensus.items.get_key_value(id).ok_or_else(|| {
                    Error::ItemNotFound {
                        schema: schema.to_string(),
                        item_id: id.to_string(),
                    }
                })?;
                vec![to_prediction((key, item))]
            }
            None => consensus.items.iter().map(to_prediction).collect(),
        };

        Ok(PredictionsResponse::Ready {
            schema: schema.to_string(),
            freshness: Freshness::of(result, trigger.total()),
            items,
        })
    }

    /// Eligibility of `schema` against the current observation set.
    pub fn eligibility(&self, schema: &str) -> Result<Eligibility> {
        let definition = self
            .inner
            .schemas
            .get(schema)
            .ok_or_else(|| Error::UnknownSchema(schema.to_string()))?;
        let observations = self.inner.source.observations(schema)?;
        Ok(self.inner.pipeline.eligibility(definition, &observations))
    }

    fn spawn_run(&self, schema: String, origin: Origin) {
        let engine = self.clone();
        self.inner.runtime.spawn_blocking(move || {
            let status = engine.run_schema(&schema, origin);
            debug!("{} background run for '{}': {:?}", prefix::RUN, schema, status);
        });
    }

    /// One full attempt for `schema`: gate, claim, compute, commit, release.
    ///
    /// Blocking. A re-run owed when this attempt releases the schema is
    /// spawned in the background.
    fn run_schema(&self, name: &str, origin: Origin) -> RunStatus {
        let (Some(schema), Some(trigger)) =
            (self.inner.schemas.get(name), self.inner.triggers.get(name))
        else {
            return RunStatus::Failed {
                reason: Error::UnknownSchema(name.to_string()).to_string(),
            };
        };

        let threshold = self.inner.triggers.threshold();
        if origin == Origin::Counter && trigger.counter() < threshold {
            debug!("{} '{}' counter already consumed", prefix::SKIP, name);
            return RunStatus::Coalesced;
        }

        let observations = match self.inner.source.observations(name) {
            Ok(observations) => observations,
            Err(e) => {
                warn!("{} could not load observations for '{}': {}", prefix::RUN, name, e);
                return RunStatus::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let eligibility = self.inner.pipeline.eligibility(schema, &observations);
        if !eligibility.is_eligible() {
            debug!(
                "{} '{}' not eligible: {}/{} items, {} more annotations needed",
                prefix::SKIP,
                name,
                eligibility.eligible_items,
                eligibility.min_items,
                eligibility.annotations_needed
            );
            return eligibility.into();
        }

        let claimed = match origin {
            Origin::Manual => trigger.try_begin(),
            Origin::Counter => trigger.try_claim(),
        };
        let Some(ticket) = claimed else {
            debug!("{} '{}' already running, coalesced", prefix::SKIP, name);
            return RunStatus::Coalesced;
        };

        // another counter run may have consumed the crossing before this claim
        if origin == Origin::Counter && ticket.counter_at_start() < threshold {
            debug!("{} '{}' counter already consumed", prefix::SKIP, name);
            self.follow_up(name, ticket.finish(false, threshold));
            return RunStatus::Coalesced;
        }

        info!(
            "{} MACE run started for '{}' ({} observations, {} eligible items)",
            prefix::RUN,
            name,
            observations.len(),
            eligibility.eligible_items
        );

        let pipeline = &self.inner.pipeline;
        let outcome = pipeline.run(schema, &observations, &pipeline.deadline());

        let (status, success) = match outcome {
            Ok(consensus) => {
                log_consensus(&consensus);
                let version = self
                    .inner
                    .store
                    .commit(MaceResult::new(consensus, ticket.total_at_start()));
                info!(
                    "{} committed MACE result for '{}' (version {})",
                    prefix::COMMIT,
                    name,
                    version
                );
                (RunStatus::Completed { version }, true)
            }
            Err(MaceError::InsufficientData {
                eligible_items,
                min_items,
                ..
            }) => {
                debug!("{} '{}' became ineligible mid-run", prefix::SKIP, name);
                (
                    RunStatus::InsufficientData {
                        eligible_items,
                        min_items,
                        annotations_needed: eligibility.annotations_needed,
                    },
                    false,
                )
            }
            Err(e) => {
                warn!(
                    "{} MACE run for '{}' failed, keeping previous result: {}",
                    prefix::RUN,
                    name,
                    e
                );
                (
                    RunStatus::Failed {
                        reason: e.to_string(),
                    },
                    false,
                )
            }
        };

        self.follow_up(name, ticket.finish(success, threshold));
        status
    }

    fn follow_up(&self, name: &str, follow_up: FollowUp) {
        match follow_up {
            FollowUp::None => {}
            FollowUp::Requested => {
                debug!("{} re-running '{}' for a coalesced trigger", prefix::RUN, name);
                self.spawn_run(name.to_string(), Origin::Manual);
            }
            FollowUp::CounterDue if self.is_enabled() => {
                debug!("{} '{}' crossed the threshold mid-run", prefix::RUN, name);
                self.spawn_run(name.to_string(), Origin::Counter);
            }
            FollowUp::CounterDue => {}
        }
    }
}

/// Why a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// The annotation counter reached `trigger_every_n`
    Counter,
    /// An explicit request, or one coalesced into an earlier run
    Manual,
}

fn log_consensus(consensus: &SchemaConsensus) {
    let stats = &consensus.stats;
    if stats.skipped_out_of_range > 0 {
        warn!(
            "'{}': skipped {} observations with out-of-range labels",
            consensus.schema_name, stats.skipped_out_of_range
        );
    }
    debug!(
        "'{}': {} observations used, {} duplicates overridden, {} items excluded",
        consensus.schema_name,
        stats.observations_used,
        stats.duplicates_overridden,
        stats.excluded_items
    );

    for fit in &consensus.diagnostics {
        if fit.diverged_restarts > 0 {
            warn!(
                "'{}': {} restarts diverged and were discarded",
                fit.name, fit.diverged_restarts
            );
        }
        match (fit.restart, fit.objective) {
            (Some(restart), Some(objective)) => debug!(
                "'{}': restart {} won with objective {:.4} after {} iterations (converged: {})",
                fit.name, restart, objective, fit.iterations, fit.converged
            ),
            _ => debug!("'{}': unanimous, EM skipped", fit.name),
        }
    }
}
