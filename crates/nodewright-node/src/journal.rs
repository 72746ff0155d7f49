//! Per-run record of orchestrator steps.
//!
//! Every step is either [`StepPolicy::Required`] (its failure fails the run)
//! or [`StepPolicy::Advisory`] (its failure is logged and ignored). The journal
//! keeps both so callers and tests can check which policy applied where.

use std::sync::{Mutex, MutexGuard};

use nodewright_common::Phase;

/// Whether a step's failure fails the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure propagates
    Required,
    /// Failure is logged and ignored
    Advisory,
}

/// What happened to a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Ran and succeeded
    Completed,
    /// Not needed in this run
    Skipped,
    /// Advisory step failed; the run continued
    Ignored(String),
    /// Required step failed; the run stopped
    Failed(String),
}

/// One journal entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    /// Step
    pub phase: Phase,
    /// Policy it ran under
    pub policy: StepPolicy,
    /// Outcome
    pub outcome: StepOutcome,
}

/// Ordered step records for one orchestrator run
#[derive(Debug, Default)]
pub struct StepJournal {
    records: Mutex<Vec<StepRecord>>,
}

impl StepJournal {
    /// Empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StepRecord>> {
        // A poisoned journal still holds valid records
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record
    pub fn record(&self, phase: Phase, policy: StepPolicy, outcome: StepOutcome) {
        self.lock().push(StepRecord {
            phase,
            policy,
            outcome,
        });
    }

    /// Drop all records, at the start of a run
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of all records, in order
    pub fn records(&self) -> Vec<StepRecord> {
        self.lock().clone()
    }

    /// Most recent record for a phase
    pub fn last(&self, phase: Phase) -> Option<StepRecord> {
        self.lock().iter().rev().find(|r| r.phase == phase).cloned()
    }

    /// Phases in the order they were recorded
    pub fn phases(&self) -> Vec<Phase> {
        self.lock().iter().map(|r| r.phase).collect()
    }
}
