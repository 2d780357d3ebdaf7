use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::step::{Criticality, FlowStep};
use crate::error::{FailureKind, VerifyError};

/// Name of the implicit first outcome of every run
pub const AUTHENTICATE_STEP: &str = "authenticate";

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed { kind: FailureKind, error: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, StepStatus::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Passed => "pass",
            StepStatus::Failed { .. } => "fail",
            StepStatus::Skipped { .. } => "skipped",
        }
    }
}

/// Failure-time capture of environment state
#[derive(Debug, Clone)]
pub struct DiagnosticSnapshot {
    pub profile_id: String,
    pub step: String,
    pub captured_at: DateTime<Utc>,
    /// PNG screenshot, when a UI environment was open
    pub visual: Option<Vec<u8>>,
    /// Page markup or last API response
    pub structural: String,
    /// File extension for the structural capture ("html", "json", "txt")
    pub structural_format: String,
}

/// Where a persisted snapshot ended up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub visual_path: Option<String>,
    pub structural_path: String,
    pub captured_at: String,
}

/// Result of one step execution. Built once; never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub index: usize,
    pub step: String,
    pub action: String,
    pub criticality: Criticality,
    pub status: StepStatus,
    /// Informational notes (e.g. "empty list accepted")
    #[serde(default)]
    pub notes: Vec<String>,
    pub duration_ms: Option<u64>,
    pub finished_at: String,
    #[serde(default)]
    pub artifact: Option<ArtifactRef>,
    #[serde(skip)]
    pub snapshot: Option<DiagnosticSnapshot>,
}

impl StepOutcome {
    fn new(index: usize, step: &str, action: &str, criticality: Criticality, status: StepStatus) -> Self {
        Self {
            index,
            step: step.to_string(),
            action: action.to_string(),
            criticality,
            status,
            notes: Vec::new(),
            duration_ms: None,
            finished_at: Utc::now().to_rfc3339(),
            artifact: None,
            snapshot: None,
        }
    }

    pub fn passed(index: usize, step: &FlowStep, started: Instant, notes: Vec<String>) -> Self {
        let mut outcome = Self::new(
            index,
            &step.name,
            &step.action.display_name(),
            step.criticality,
            StepStatus::Passed,
        );
        outcome.notes = notes;
        outcome.duration_ms = Some(started.elapsed().as_millis() as u64);
        outcome
    }

    pub fn failed(
        index: usize,
        step: &FlowStep,
        started: Instant,
        error: &VerifyError,
        snapshot: Option<DiagnosticSnapshot>,
    ) -> Self {
        let mut outcome = Self::new(
            index,
            &step.name,
            &step.action.display_name(),
            step.criticality,
            StepStatus::Failed {
                kind: error.kind(),
                error: error.to_string(),
            },
        );
        outcome.duration_ms = Some(started.elapsed().as_millis() as u64);
        outcome.snapshot = snapshot;
        outcome
    }

    pub fn skipped(index: usize, step: &FlowStep, reason: &str) -> Self {
        Self::new(
            index,
            &step.name,
            &step.action.display_name(),
            step.criticality,
            StepStatus::Skipped {
                reason: reason.to_string(),
            },
        )
    }

    /// Outcome of an engine-level hard gate (authentication, environment
    /// setup) that is not one of the declared steps
    pub fn gate(
        index: usize,
        name: &str,
        action: &str,
        started: Instant,
        result: Result<String, &VerifyError>,
        snapshot: Option<DiagnosticSnapshot>,
    ) -> Self {
        let (status, notes) = match result {
            Ok(note) => (StepStatus::Passed, vec![note]),
            Err(e) => (
                StepStatus::Failed {
                    kind: e.kind(),
                    error: e.to_string(),
                },
                Vec::new(),
            ),
        };
        let mut outcome = Self::new(index, name, action, Criticality::Hard, status);
        outcome.notes = notes;
        outcome.duration_ms = Some(started.elapsed().as_millis() as u64);
        outcome.snapshot = snapshot;
        outcome
    }

    /// Replace the in-memory snapshot with a reference to where it was stored
    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.snapshot = None;
        self.artifact = Some(artifact);
        self
    }

    pub fn is_hard(&self) -> bool {
        self.criticality == Criticality::Hard
    }

    /// Failure message (expected vs actual) if the step failed
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            StepStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Overall status of one profile run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunStatus {
    Passed,
    /// Every hard step passed but some soft steps did not
    Degraded { soft_failures: u32 },
    Failed { hard_failures: u32 },
}

impl RunStatus {
    pub fn is_pass(&self) -> bool {
        !matches!(self, RunStatus::Failed { .. })
    }
}

/// Finalized, read-only record of one profile run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub profile_id: String,
    pub status: RunStatus,
    pub outcomes: Vec<StepOutcome>,
    pub started_at: String,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunReport {
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step == step)
    }

    /// Every hard step passed
    pub fn hard_passed(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.is_hard())
            .all(|o| o.status.is_passed())
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.label() == label)
            .count()
    }
}

/// Reports keyed by profile id
pub type ProfileReports = BTreeMap<String, RunReport>;

/// Run state while a profile run is in progress
#[derive(Debug)]
pub struct RunState {
    pub profile_id: String,
    outcomes: Vec<StepOutcome>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    cancelled: bool,
}

impl RunState {
    pub fn new(profile_id: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            outcomes: Vec::new(),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            cancelled: false,
        }
    }

    pub fn next_index(&self) -> usize {
        self.outcomes.len()
    }

    pub fn record(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().rev().find(|o| o.step == step)
    }

    /// Mark every remaining step skipped
    pub fn skip_remaining(&mut self, steps: &[FlowStep], reason: &str) {
        for step in steps {
            let index = self.next_index();
            self.record(StepOutcome::skipped(index, step, reason));
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn finish(self) -> RunReport {
        let (hard_failures, soft_failures) =
            self.outcomes
                .iter()
                .fold((0, 0), |(h, s), o| match (o.is_hard(), o.status.is_passed()) {
                    (_, true) => (h, s),
                    (true, false) => (h + 1, s),
                    (false, false) if o.status.is_failed() => (h, s + 1),
                    _ => (h, s),
                });

        let status = if hard_failures > 0 || self.outcomes.is_empty() {
            RunStatus::Failed {
                hard_failures: hard_failures.max(1),
            }
        } else if soft_failures > 0 {
            RunStatus::Degraded { soft_failures }
        } else {
            RunStatus::Passed
        };

        RunReport {
            profile_id: self.profile_id,
            status,
            outcomes: self.outcomes,
            started_at: self.started_wall.to_rfc3339(),
            total_duration_ms: self.started_at.elapsed().as_millis() as u64,
            cancelled: self.cancelled,
        }
    }
}
