//! Result & diagnostics reporting
//!
//! Turns per-profile run reports into a summary, persists failure
//! snapshots to the diagnostic store and writes the JSON, HTML and JUnit
//! outputs.

pub mod html;
pub mod json;
pub mod junit;
pub mod store;
pub mod summary;
pub mod types;

use anyhow::Result;
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::runner::state::ProfileReports;
pub use store::{DiagnosticStore, FsDiagnosticStore};
pub use summary::{render, summarize};
pub use types::{ProfileSummary, RunResults, StepSummary, Summary};

/// Finalizes runs: persists snapshots, then summarizes
pub struct Reporter {
    store: Box<dyn DiagnosticStore>,
}

impl Reporter {
    pub fn new(store: Box<dyn DiagnosticStore>) -> Self {
        Self { store }
    }

    /// Reporter writing artifacts under `<output>/artifacts`
    pub fn for_output(output_dir: &Path) -> Self {
        Self::new(Box::new(FsDiagnosticStore::new(&output_dir.join("artifacts"))))
    }

    /// Move every in-memory snapshot into the store, replacing it with an
    /// artifact reference. A snapshot that cannot be stored is dropped with
    /// a note on the outcome; the outcome itself is kept.
    pub fn persist_snapshots(&self, mut reports: ProfileReports) -> ProfileReports {
        for report in reports.values_mut() {
            report.outcomes = std::mem::take(&mut report.outcomes)
                .into_iter()
                .map(|mut outcome| match outcome.snapshot.take() {
                    Some(snapshot) => match self.store.persist(&snapshot) {
                        Ok(artifact) => outcome.with_artifact(artifact),
                        Err(e) => {
                            warn!(
                                "[{}] could not persist snapshot for '{}': {:#}",
                                snapshot.profile_id, snapshot.step, e
                            );
                            outcome.notes.push(format!("snapshot not persisted: {}", e));
                            outcome
                        }
                    },
                    None => outcome,
                })
                .collect();
        }
        reports
    }

    pub fn finalize(
        &self,
        run_id: &str,
        suite: &str,
        reports: ProfileReports,
        duration_ms: u64,
    ) -> RunResults {
        let reports = self.persist_snapshots(reports);
        RunResults {
            run_id: run_id.to_string(),
            suite: suite.to_string(),
            summary: summarize(&reports),
            reports,
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            duration_ms,
        }
    }
}

/// Write `results.json`, `report.html` and `junit.xml` into `output_dir`
pub fn write_outputs(results: &RunResults, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let json_path = output_dir.join("results.json");
    json::generate(results, Some(&json_path))?;

    let html_path = output_dir.join("report.html");
    html::generate(results, Some(&html_path))?;

    junit::write_report(results, output_dir)?;
    let junit_path = output_dir.join("junit.xml");

    info!("Reports written to {}", output_dir.display());
    Ok(vec![json_path, html_path, junit_path])
}

/// Regenerate a report from a saved `results.json`
pub fn generate_report(results_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let results = json::load(results_path)?;

    match format {
        "json" => json::generate(&results, output),
        "html" => html::generate(&results, output),
        "junit" => {
            let xml = junit::generate_junit_xml(&results)?;
            match output {
                Some(path) => std::fs::write(path, xml)?,
                None => println!("{}", xml),
            }
            Ok(())
        }
        "text" => {
            let text = render(&results.summary);
            match output {
                Some(path) => std::fs::write(path, text)?,
                None => print!("{}", text),
            }
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}
