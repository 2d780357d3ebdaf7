use super::types::{ProfileSummary, StepSummary, Summary};
use crate::runner::state::{ProfileReports, RunStatus, StepOutcome, StepStatus};
use crate::runner::step::Criticality;
use std::fmt::Write;

/// Aggregate profile reports. The run passes iff every hard step of every
/// profile passed; soft failures only flag the summary as degraded.
pub fn summarize(reports: &ProfileReports) -> Summary {
    let profiles: Vec<ProfileSummary> = reports
        .values()
        .map(|report| ProfileSummary {
            profile_id: report.profile_id.clone(),
            status: report.status.clone(),
            passed: report.count("pass"),
            failed: report.count("fail"),
            skipped: report.count("skipped"),
            duration_ms: report.total_duration_ms,
            cancelled: report.cancelled,
            steps: report.outcomes.iter().map(step_summary).collect(),
        })
        .collect();

    let passed = !reports.is_empty() && reports.values().all(|r| r.status.is_pass());
    let soft_failures = reports
        .values()
        .flat_map(|r| r.outcomes.iter())
        .filter(|o| !o.is_hard() && o.status.is_failed())
        .count();

    Summary {
        passed,
        degraded: passed && soft_failures > 0,
        cancelled: reports.values().any(|r| r.cancelled),
        soft_failures,
        profiles,
    }
}

fn step_summary(outcome: &StepOutcome) -> StepSummary {
    let (kind, message) = match &outcome.status {
        StepStatus::Passed => (None, None),
        StepStatus::Failed { kind, error } => (Some(*kind), Some(error.clone())),
        StepStatus::Skipped { reason } => (None, Some(reason.clone())),
    };
    StepSummary {
        name: outcome.step.clone(),
        status: outcome.status.label().to_string(),
        criticality: outcome.criticality,
        kind,
        message,
        notes: outcome.notes.clone(),
        artifact: outcome.artifact.clone(),
    }
}

/// Human-readable rendering of a summary
pub fn render(summary: &Summary) -> String {
    let mut out = String::new();

    let verdict = match (summary.passed, summary.degraded) {
        (true, false) => "PASS".to_string(),
        (true, true) => format!("PASS (degraded: {} soft failures)", summary.soft_failures),
        (false, _) => "FAIL".to_string(),
    };
    let _ = writeln!(out, "Overall: {}{}", verdict, if summary.cancelled { " [cancelled]" } else { "" });

    for profile in &summary.profiles {
        let status = match &profile.status {
            RunStatus::Passed => "PASSED".to_string(),
            RunStatus::Degraded { soft_failures } => format!("DEGRADED ({} soft)", soft_failures),
            RunStatus::Failed { hard_failures } => format!("FAILED ({} hard)", hard_failures),
        };
        let _ = writeln!(
            out,
            "\nProfile {}: {} - {} passed, {} failed, {} skipped ({}ms)",
            profile.profile_id, status, profile.passed, profile.failed, profile.skipped, profile.duration_ms
        );

        for step in &profile.steps {
            let mark = match (step.status.as_str(), step.criticality) {
                ("pass", _) => "✓",
                ("fail", Criticality::Soft) => "⚠",
                ("fail", Criticality::Hard) => "✗",
                _ => "○",
            };
            let _ = write!(out, "  {} {}", mark, step.name);
            if step.criticality == Criticality::Soft {
                out.push_str(" [soft]");
            }
            match (step.status.as_str(), &step.message) {
                ("fail", Some(msg)) => {
                    let kind = step.kind.map(|k| k.to_string()).unwrap_or_default();
                    let _ = write!(out, "\n      {}: {}", kind, msg);
                }
                ("skipped", Some(reason)) => {
                    let _ = write!(out, " (skipped: {})", reason);
                }
                _ => {}
            }
            for note in &step.notes {
                let _ = write!(out, "\n      note: {}", note);
            }
            if let Some(artifact) = &step.artifact {
                let _ = write!(out, "\n      snapshot: {}", artifact.structural_path);
                if let Some(visual) = &artifact.visual_path {
                    let _ = write!(out, ", {}", visual);
                }
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifyError;
    use crate::runner::state::{RunState, AUTHENTICATE_STEP};
    use crate::runner::step::{Action, FlowStep};
    use crate::error::AuthFailure;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    fn degraded_report() -> crate::runner::state::RunReport {
        let now = Instant::now();
        let mut state = RunState::new("mobile");
        state.record(StepOutcome::gate(0, AUTHENTICATE_STEP, "login", now, Ok("ok".into()), None));
        let following = FlowStep::new("following", Action::FetchStats).soft();
        state.record(StepOutcome::failed(
            1,
            &following,
            now,
            &VerifyError::mismatch("non-empty ranked list", "empty list"),
            None,
        ));
        state.finish()
    }

    fn auth_failed_report() -> crate::runner::state::RunReport {
        let mut state = RunState::new("desktop");
        let err = VerifyError::from(AuthFailure::Rejected {
            message: "Invalid credentials".into(),
        });
        state.record(StepOutcome::gate(0, AUTHENTICATE_STEP, "login", Instant::now(), Err(&err), None));
        state.skip_remaining(&[FlowStep::new("stats", Action::FetchStats)], "authentication failed");
        state.finish()
    }

    #[test]
    fn test_soft_failures_degrade_without_failing() {
        let mut reports = ProfileReports::new();
        reports.insert("mobile".into(), degraded_report());

        let summary = summarize(&reports);
        assert!(summary.passed);
        assert!(summary.degraded);
        assert_eq!(summary.soft_failures, 1);
        assert_eq!(summary.profiles[0].steps[1].status, "fail");
    }

    #[test]
    fn test_hard_failure_in_one_profile_fails_run() {
        let mut reports = ProfileReports::new();
        reports.insert("mobile".into(), degraded_report());
        reports.insert("desktop".into(), auth_failed_report());

        let summary = summarize(&reports);
        assert!(!summary.passed);
        assert!(!summary.degraded);

        let desktop = &summary.profiles[0];
        assert_eq!(desktop.profile_id, "desktop");
        assert_eq!((desktop.passed, desktop.failed, desktop.skipped), (0, 1, 1));

        let text = render(&summary);
        assert!(text.starts_with("Overall: FAIL"));
        assert!(text.contains("auth: authentication rejected: Invalid credentials"));
        assert!(text.contains("stats (skipped: authentication failed)"));
    }

    #[test]
    fn test_empty_reports_do_not_pass() {
        assert!(!summarize(&ProfileReports::new()).passed);
    }
}
