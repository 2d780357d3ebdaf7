use super::types::{ProfileSummary, RunResults, StepSummary};
use crate::runner::state::RunStatus;
use crate::runner::step::Criticality;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate the HTML report. Artifact links are made relative to the
/// report's directory so the output folder can be moved as a whole.
pub fn generate(results: &RunResults, output: Option<&Path>) -> Result<()> {
    let base = output.and_then(Path::parent);
    let html = generate_html(results, base);

    if let Some(path) = output {
        std::fs::write(path, html)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        println!("{}", html);
    }

    Ok(())
}

fn generate_html(results: &RunResults, base: Option<&Path>) -> String {
    let summary = &results.summary;
    let total_steps: usize = summary.profiles.iter().map(|p| p.steps.len()).sum();
    let passed_steps: usize = summary.profiles.iter().map(|p| p.passed).sum();
    let failed_steps: usize = summary.profiles.iter().map(|p| p.failed).sum();
    let pass_rate = if total_steps > 0 {
        (passed_steps as f64 / total_steps as f64 * 100.0) as u32
    } else {
        0
    };

    let (verdict, verdict_class) = match (summary.passed, summary.degraded) {
        (true, false) => ("Pass", "passed"),
        (true, true) => ("Pass (degraded)", "degraded"),
        (false, _) => ("Fail", "failed"),
    };

    let profiles_html: String = summary
        .profiles
        .iter()
        .map(|p| profile_html(p, base))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Verification Report - {suite}</title>
    <style>
        :root {{
            --bg-primary: #0a0f1d;
            --bg-secondary: #141b2d;
            --bg-tertiary: #1f2937;
            --border: #374151;
            --text-primary: #f9fafb;
            --text-secondary: #9ca3af;
            --green: #10b981;
            --red: #ef4444;
            --yellow: #f59e0b;
            --blue: #3b82f6;
        }}
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        body {{
            font-family: system-ui, -apple-system, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.5;
            padding: 3rem 1rem;
        }}
        .container {{ max-width: 1100px; margin: 0 auto; }}
        header {{ margin-bottom: 2rem; display: flex; justify-content: space-between; align-items: flex-end; }}
        h1 {{ font-size: 2rem; font-weight: 800; }}
        .verdict {{ font-size: 1.25rem; font-weight: 700; }}
        .verdict.passed {{ color: var(--green); }}
        .verdict.degraded {{ color: var(--yellow); }}
        .verdict.failed {{ color: var(--red); }}
        .summary {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 1.5rem; margin-bottom: 2rem; }}
        .stat {{ background: var(--bg-secondary); border: 1px solid var(--border); padding: 1.25rem; border-radius: 1rem; }}
        .stat-value {{ font-size: 2rem; font-weight: 800; }}
        .stat-label {{ color: var(--text-secondary); font-size: 0.8rem; text-transform: uppercase; letter-spacing: 0.05em; }}
        .stat.passed .stat-value {{ color: var(--green); }}
        .stat.failed .stat-value {{ color: var(--red); }}
        .stat.skipped .stat-value {{ color: var(--yellow); }}
        .progress-bar {{ background: var(--bg-secondary); height: 10px; border-radius: 5px; overflow: hidden; border: 1px solid var(--border); margin-bottom: 3rem; }}
        .progress-fill {{ height: 100%; background: var(--green); }}
        .profile {{ background: var(--bg-secondary); border: 1px solid var(--border); border-radius: 1.25rem; margin-bottom: 2rem; overflow: hidden; }}
        .profile-header {{ padding: 1.25rem 1.5rem; display: flex; justify-content: space-between; align-items: center; border-bottom: 1px solid var(--border); }}
        .badge {{ padding: 0.2rem 0.7rem; border-radius: 9999px; font-size: 0.75rem; font-weight: 600; text-transform: uppercase; margin-left: 0.75rem; }}
        .profile.passed .badge {{ background: rgba(16, 185, 129, 0.1); color: var(--green); }}
        .profile.degraded .badge {{ background: rgba(245, 158, 11, 0.1); color: var(--yellow); }}
        .profile.failed .badge {{ background: rgba(239, 68, 68, 0.1); color: var(--red); }}
        .steps {{ padding: 1rem 1.5rem; }}
        .step {{ padding: 0.75rem; border-radius: 0.75rem; display: flex; gap: 1rem; }}
        .step:hover {{ background: var(--bg-tertiary); }}
        .step-icon {{ width: 2rem; height: 2rem; display: flex; align-items: center; justify-content: center; border-radius: 0.5rem; flex-shrink: 0; }}
        .step.pass .step-icon {{ background: rgba(16, 185, 129, 0.1); color: var(--green); }}
        .step.fail .step-icon {{ background: rgba(239, 68, 68, 0.1); color: var(--red); }}
        .step.soft-fail .step-icon {{ background: rgba(245, 158, 11, 0.1); color: var(--yellow); }}
        .step.skipped .step-icon {{ color: var(--text-secondary); }}
        .step-name {{ font-family: monospace; font-size: 0.95rem; }}
        .tag {{ color: var(--text-secondary); font-size: 0.75rem; margin-left: 0.5rem; }}
        .note {{ color: var(--text-secondary); font-size: 0.8rem; }}
        .error-message {{ background: rgba(239, 68, 68, 0.1); border-radius: 0.5rem; padding: 0.6rem; margin-top: 0.5rem; color: #fca5a5; font-size: 0.8rem; font-family: monospace; }}
        .artifacts a {{ color: var(--blue); font-size: 0.75rem; font-weight: 600; margin-right: 1rem; }}
        .artifacts img {{ display: block; max-width: 320px; margin-top: 0.5rem; border-radius: 0.5rem; border: 1px solid var(--border); }}
        .meta {{ margin-top: 3rem; color: var(--text-secondary); font-size: 0.85rem; text-align: center; }}
    </style>
</head>
<body>
    <div class="container">
        <header>
            <div>
                <h1>{suite}</h1>
                <div class="verdict {verdict_class}">{verdict}{cancelled}</div>
            </div>
        </header>
        <div class="summary">
            <div class="stat"><div class="stat-value">{profile_count}</div><div class="stat-label">Profiles</div></div>
            <div class="stat"><div class="stat-value">{total_steps}</div><div class="stat-label">Steps</div></div>
            <div class="stat passed"><div class="stat-value">{passed_steps}</div><div class="stat-label">Passed</div></div>
            <div class="stat failed"><div class="stat-value">{failed_steps}</div><div class="stat-label">Failed</div></div>
            <div class="stat skipped"><div class="stat-value">{soft_failures}</div><div class="stat-label">Soft failures</div></div>
            <div class="stat"><div class="stat-value">{duration}</div><div class="stat-label">Duration</div></div>
        </div>
        <div class="progress-bar"><div class="progress-fill" style="width: {pass_rate}%"></div></div>
        {profiles_html}
        <div class="meta">Run {run_id} &middot; generated {generated_at}</div>
    </div>
</body>
</html>"#,
        suite = html_escape(&results.suite),
        verdict_class = verdict_class,
        verdict = verdict,
        cancelled = if summary.cancelled { " (cancelled)" } else { "" },
        profile_count = summary.profiles.len(),
        total_steps = total_steps,
        passed_steps = passed_steps,
        failed_steps = failed_steps,
        soft_failures = summary.soft_failures,
        duration = format_duration(results.duration_ms),
        pass_rate = pass_rate,
        profiles_html = profiles_html,
        run_id = html_escape(&results.run_id),
        generated_at = html_escape(&results.generated_at),
    )
}

fn profile_html(profile: &ProfileSummary, base: Option<&Path>) -> String {
    let (status_text, status_class) = match &profile.status {
        RunStatus::Passed => ("Passed".to_string(), "passed"),
        RunStatus::Degraded { soft_failures } => (format!("Degraded ({})", soft_failures), "degraded"),
        RunStatus::Failed { hard_failures } => (format!("Failed ({})", hard_failures), "failed"),
    };
    let steps_html: String = profile.steps.iter().map(|s| step_html(s, base)).collect();

    format!(
        r#"
        <div class="profile {status_class}">
            <div class="profile-header">
                <h3>{name}<span class="badge">{status_text}</span></h3>
                <span class="note">{duration}</span>
            </div>
            <div class="steps">{steps_html}</div>
        </div>"#,
        status_class = status_class,
        name = html_escape(&profile.profile_id),
        status_text = status_text,
        duration = format_duration(profile.duration_ms),
        steps_html = steps_html,
    )
}

fn step_html(step: &StepSummary, base: Option<&Path>) -> String {
    let (icon, class) = match (step.status.as_str(), step.criticality) {
        ("pass", _) => ("✓", "pass"),
        ("fail", Criticality::Soft) => ("⚠", "soft-fail"),
        ("fail", Criticality::Hard) => ("✗", "fail"),
        _ => ("○", "skipped"),
    };

    let mut details = String::new();
    if let Some(message) = &step.message {
        if step.status == "fail" {
            let kind = step.kind.map(|k| format!("[{}] ", k)).unwrap_or_default();
            details.push_str(&format!(
                r#"<div class="error-message">{}{}</div>"#,
                kind,
                html_escape(message)
            ));
        } else {
            details.push_str(&format!(r#"<div class="note">{}</div>"#, html_escape(message)));
        }
    }
    for note in &step.notes {
        details.push_str(&format!(r#"<div class="note">ℹ {}</div>"#, html_escape(note)));
    }
    if let Some(artifact) = &step.artifact {
        let structural = relative(&artifact.structural_path, base);
        details.push_str(&format!(
            r#"<div class="artifacts"><a href="{0}">structural capture</a>"#,
            html_escape(&structural)
        ));
        if let Some(visual) = &artifact.visual_path {
            let visual = html_escape(&relative(visual, base));
            details.push_str(&format!(
                r#"<a href="{0}">screenshot</a><img src="{0}" alt="failure screenshot">"#,
                visual
            ));
        }
        details.push_str("</div>");
    }

    let tag = if step.criticality == Criticality::Soft {
        r#"<span class="tag">soft</span>"#
    } else {
        ""
    };

    format!(
        r#"
                <div class="step {class}">
                    <div class="step-icon">{icon}</div>
                    <div><div class="step-name">{name}{tag}</div>{details}</div>
                </div>"#,
        class = class,
        icon = icon,
        name = html_escape(&step.name),
        tag = tag,
        details = details,
    )
}

fn relative(path: &str, base: Option<&Path>) -> String {
    match base {
        Some(base) if !base.as_os_str().is_empty() => Path::new(path)
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string()),
        _ => path.to_string(),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60000;
        let seconds = (ms % 60000) as f64 / 1000.0;
        format!("{}m {:.0}s", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::Summary;
    use crate::runner::state::ArtifactRef;

    #[test]
    fn test_failed_step_renders_message_and_relative_artifact() {
        let results = RunResults {
            run_id: "run-1".into(),
            suite: "fanscout <ui>".into(),
            summary: Summary {
                passed: false,
                degraded: false,
                cancelled: false,
                soft_failures: 0,
                profiles: vec![ProfileSummary {
                    profile_id: "desktop".into(),
                    status: RunStatus::Failed { hard_failures: 1 },
                    passed: 0,
                    failed: 1,
                    skipped: 0,
                    duration_ms: 1500,
                    cancelled: false,
                    steps: vec![StepSummary {
                        name: "tab bar".into(),
                        status: "fail".into(),
                        criticality: Criticality::Hard,
                        kind: Some(crate::error::FailureKind::Mismatch),
                        message: Some("expected absent, got visible".into()),
                        notes: vec![],
                        artifact: Some(ArtifactRef {
                            visual_path: Some("out/artifacts/desktop/tab_bar.png".into()),
                            structural_path: "out/artifacts/desktop/tab_bar.html".into(),
                            captured_at: "2024-01-01T00:00:00Z".into(),
                        }),
                    }],
                }],
            },
            reports: Default::default(),
            generated_at: "2024-01-01 00:00:00".into(),
            duration_ms: 700,
        };

        let html = generate_html(&results, Some(Path::new("out")));
        assert!(html.contains("fanscout &lt;ui&gt;"));
        assert!(html.contains("[mismatch] expected absent, got visible"));
        assert!(html.contains(r#"src="artifacts/desktop/tab_bar.png""#));
        assert!(html.contains("1.5s"));
        assert!(html.contains(r#"<div class="stat-value">700ms</div><div class="stat-label">Duration</div>"#));
    }
}
