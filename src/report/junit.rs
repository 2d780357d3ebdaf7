use super::types::{ProfileSummary, RunResults, StepSummary};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

/// JUnit XML: one `<testsuite>` per profile, one `<testcase>` per step
pub fn generate_junit_xml(results: &RunResults) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let profiles = &results.summary.profiles;
    let tests: usize = profiles.iter().map(|p| p.steps.len()).sum();
    let failures: usize = profiles.iter().map(|p| p.failed).sum();
    let skipped: usize = profiles.iter().map(|p| p.skipped).sum();

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", results.suite.as_str()));
    suites_start.push_attribute(("tests", tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suites_start.push_attribute(("time", seconds(results.duration_ms).as_str()));
    writer.write_event(Event::Start(suites_start))?;

    for profile in profiles {
        write_test_suite(&mut writer, results, profile)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_suite<W: std::io::Write>(
    writer: &mut Writer<W>,
    results: &RunResults,
    profile: &ProfileSummary,
) -> Result<()> {
    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", profile.profile_id.as_str()));
    suite_start.push_attribute(("tests", profile.steps.len().to_string().as_str()));
    suite_start.push_attribute(("failures", profile.failed.to_string().as_str()));
    suite_start.push_attribute(("skipped", profile.skipped.to_string().as_str()));
    suite_start.push_attribute(("id", results.run_id.as_str()));
    suite_start.push_attribute(("time", seconds(profile.duration_ms).as_str()));
    suite_start.push_attribute(("timestamp", results.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    let classname = format!("{}.{}", results.suite, profile.profile_id).replace(' ', "_");
    for step in &profile.steps {
        write_test_case(writer, &classname, step)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_test_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    classname: &str,
    step: &StepSummary,
) -> Result<()> {
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", step.name.as_str()));
    case_start.push_attribute(("classname", classname));
    writer.write_event(Event::Start(case_start))?;

    let message = step.message.as_deref().unwrap_or("");
    match step.status.as_str() {
        "fail" => {
            let kind = step
                .kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "mismatch".to_string());
            let mut fail_start = BytesStart::new("failure");
            fail_start.push_attribute(("message", message));
            fail_start.push_attribute(("type", kind.as_str()));
            writer.write_event(Event::Start(fail_start))?;
            writer.write_event(Event::Text(BytesText::new(message)))?;
            writer.write_event(Event::End(BytesEnd::new("failure")))?;
        }
        "skipped" => {
            let mut skip = BytesStart::new("skipped");
            skip.push_attribute(("message", message));
            writer.write_event(Event::Empty(skip))?;
        }
        _ => {}
    }

    let mut out = step.notes.join("\n");
    if let Some(artifact) = &step.artifact {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("snapshot: {}", artifact.structural_path));
        if let Some(visual) = &artifact.visual_path {
            out.push_str(&format!("\nscreenshot: {}", visual));
        }
    }
    if !out.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("system-out")))?;
        writer.write_event(Event::Text(BytesText::new(&out)))?;
        writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Write `junit.xml` into the output directory
pub fn write_report(results: &RunResults, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(results)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    log::debug!("Generated JUnit report: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::report::types::Summary;
    use crate::runner::state::RunStatus;
    use crate::runner::step::Criticality;

    fn step(name: &str, status: &str, message: Option<&str>) -> StepSummary {
        StepSummary {
            name: name.into(),
            status: status.into(),
            criticality: Criticality::Hard,
            kind: (status == "fail").then_some(FailureKind::Auth),
            message: message.map(str::to_string),
            notes: vec![],
            artifact: None,
        }
    }

    #[test]
    fn test_generate_junit_xml() {
        let results = RunResults {
            run_id: "run-1".into(),
            suite: "fanscout".into(),
            summary: Summary {
                passed: false,
                degraded: false,
                cancelled: false,
                soft_failures: 0,
                profiles: vec![
                    ProfileSummary {
                        profile_id: "desktop".into(),
                        status: RunStatus::Failed { hard_failures: 2 },
                        passed: 0,
                        failed: 1,
                        skipped: 1,
                        duration_ms: 120,
                        cancelled: false,
                        steps: vec![
                            step("authenticate", "fail", Some("authentication rejected: <bad>")),
                            step("stats", "skipped", Some("authentication failed")),
                        ],
                    },
                    ProfileSummary {
                        profile_id: "mobile".into(),
                        status: RunStatus::Passed,
                        passed: 1,
                        failed: 0,
                        skipped: 0,
                        duration_ms: 80,
                        cancelled: false,
                        steps: vec![step("authenticate", "pass", None)],
                    },
                ],
            },
            reports: Default::default(),
            generated_at: "2024-01-01T00:00:00Z".into(),
            // Profiles ran in parallel: wall time is below 120 + 80
            duration_ms: 130,
        };

        let xml = generate_junit_xml(&results).unwrap();

        assert!(xml.contains(
            r#"<testsuites name="fanscout" tests="3" failures="1" skipped="1" time="0.130">"#
        ));
        assert!(xml.contains(r#"<testsuite name="desktop""#));
        assert!(xml.contains(r#"<testcase name="stats" classname="fanscout.desktop""#));
        assert!(xml.contains(r#"type="auth""#));
        assert!(xml.contains("authentication rejected: &lt;bad&gt;"));
        assert!(xml.contains(r#"<skipped message="authentication failed"/>"#));
    }
}
