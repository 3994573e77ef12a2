//! Trigger Controller
//!
//! One state machine per schema:
//!
//! ```text
//! IDLE --(threshold | manual, eligible)--> RUNNING --(success: counter -= start value)--> IDLE
//!                                                  \-(failure: counter kept)----------> IDLE
//! ```
//!
//! `IDLE -> RUNNING` is a compare-and-swap, so at most one run per schema is
//! in flight. A manual trigger that loses the swap raises the pending flag
//! instead; the run that holds the schema picks the flag up when it finishes.
//! Any number of coalesced triggers collapse into that one flag.
//!
//! Counter triggers never touch the flag. Whoever claims the schema for a
//! counter trigger rechecks the counter it snapshotted, and the holder
//! rechecks the counter after release, so one crossing yields one run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Observable phase of a schema's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    Idle,
    Running,
}

/// Per-schema trigger state
#[derive(Debug, Default)]
pub struct SchemaTrigger {
    state: AtomicU8,
    pending: AtomicBool,
    /// Annotations since the last successful run
    counter: AtomicU64,
    /// Annotations ever recorded
    total: AtomicU64,
}

impl SchemaTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one annotation. Returns true once the counter has reached `threshold`.
    pub fn record(&self, threshold: u64) -> bool {
        self.total.fetch_add(1, Ordering::SeqCst);
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        counter >= threshold
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> TriggerPhase {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => TriggerPhase::Running,
            _ => TriggerPhase::Idle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Try to move `IDLE -> RUNNING` without leaving a request behind.
    ///
    /// Used for counter triggers: a loser simply returns `None`, since the
    /// holder rechecks the counter when it releases the schema.
    pub fn try_claim(self: &Arc<Self>) -> Option<RunTicket> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        // this run reads the latest observations, which satisfies any earlier request
        self.pending.store(false, Ordering::SeqCst);
        Some(RunTicket {
            trigger: Arc::clone(self),
            counter_at_start: self.counter(),
            total_at_start: self.total(),
            finished: false,
        })
    }

    /// Try to move `IDLE -> RUNNING`.
    ///
    /// On success the returned ticket holds the schema until it is finished
    /// or dropped. On failure the trigger is coalesced into the pending flag.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunTicket> {
        loop {
            if let Some(ticket) = self.try_claim() {
                return Some(ticket);
            }

            self.pending.store(true, Ordering::SeqCst);
            if self.state.load(Ordering::SeqCst) == RUNNING {
                return None;
            }
            // the holder finished between the swap and the flag; claim the schema ourselves
        }
    }
}

/// Exclusive right to run one schema
///
/// Dropping an unfinished ticket releases the schema as a failed run.
#[derive(Debug)]
pub struct RunTicket {
    trigger: Arc<SchemaTrigger>,
    counter_at_start: u64,
    total_at_start: u64,
    finished: bool,
}

impl RunTicket {
    pub fn counter_at_start(&self) -> u64 {
        self.counter_at_start
    }

    pub fn total_at_start(&self) -> u64 {
        self.total_at_start
    }

    /// Return the schema to `IDLE`.
    ///
    /// A successful run subtracts the counter value seen at start, so
    /// annotations that arrived mid-run still count toward the next trigger.
    pub fn finish(mut self, success: bool, threshold: u64) -> FollowUp {
        self.finished = true;
        if success {
            self.trigger
                .counter
                .fetch_sub(self.counter_at_start, Ordering::SeqCst);
        }
        self.trigger.state.store(IDLE, Ordering::SeqCst);

        if self.trigger.pending.swap(false, Ordering::SeqCst) {
            return FollowUp::Requested;
        }
        // counter triggers that saw RUNNING while this ticket was held
        let arrived = self.trigger.total() > self.total_at_start;
        if arrived && self.trigger.counter() >= threshold {
            return FollowUp::CounterDue;
        }
        FollowUp::None
    }
}

/// What a released schema still owes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    /// A manual trigger was coalesced into this run
    Requested,
    /// Annotations recorded during the run pushed the counter past the threshold
    CounterDue,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.trigger.state.store(IDLE, Ordering::SeqCst);
        }
    }
}

/// Trigger state for every configured schema
#[derive(Debug, Default)]
pub struct TriggerController {
    threshold: u64,
    schemas: BTreeMap<String, Arc<SchemaTrigger>>,
}

impl TriggerController {
    pub fn new<I, S>(threshold: u64, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold,
            schemas: schemas
                .into_iter()
                .map(|name| (name.into(), Arc::new(SchemaTrigger::new())))
                .collect(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn get(&self, schema: &str) -> Option<&Arc<SchemaTrigger>> {
        self.schemas.get(schema)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<SchemaTrigger>)> {
        self.schemas.iter()
    }

    /// Annotations until the counter alone would fire, for one schema
    pub fn remaining(&self, trigger: &SchemaTrigger) -> u64 {
        self.threshold.saturating_sub(trigger.counter())
    }

    /// Annotations recorded across every schema
    pub fn total(&self) -> u64 {
        self.schemas.values().map(|t| t.total()).sum()
    }
}
