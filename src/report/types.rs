use crate::error::FailureKind;
use crate::runner::state::{ArtifactRef, ProfileReports, RunStatus};
use crate::runner::step::Criticality;
use serde::{Deserialize, Serialize};

/// Everything a finished run produced; written as `results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResults {
    pub run_id: String,
    pub suite: String,
    pub summary: Summary,
    pub reports: ProfileReports,
    pub generated_at: String,
    /// Wall time of the whole run. Profiles may overlap, so this is not
    /// the sum of their durations.
    #[serde(default)]
    pub duration_ms: u64,
}

/// Machine-checkable verdict plus the per-profile, per-step breakdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Every hard step in every profile passed
    pub passed: bool,
    /// Passed, but with soft failures
    pub degraded: bool,
    pub cancelled: bool,
    pub soft_failures: usize,
    pub profiles: Vec<ProfileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub profile_id: String,
    pub status: RunStatus,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub name: String,
    /// "pass", "fail" or "skipped"
    pub status: String,
    pub criticality: Criticality,
    #[serde(default)]
    pub kind: Option<FailureKind>,
    /// Expected-vs-actual message for failures, reason for skips
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub artifact: Option<ArtifactRef>,
}
