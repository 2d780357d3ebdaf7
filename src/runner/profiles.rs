//! Profile variation runner
//!
//! Replays one flow under every environment profile. Each profile run gets
//! its own session (per the session policy), its own UI environment and its
//! own [`FlowContext`]; a failure or panic in one never leaks into another.

use chrono::Utc;
use futures::future::join_all;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::context::FlowContext;
use super::events::{EventEmitter, RunEvent};
use super::executor::{ExecutorOptions, FlowExecutor};
use super::state::{
    DiagnosticSnapshot, ProfileReports, RunReport, RunState, StepOutcome, AUTHENTICATE_STEP,
};
use super::step::FlowStep;
use crate::api::ApiBackend;
use crate::driver::traits::EnvironmentFactory;
use crate::error::VerifyError;
use crate::parser::types::{EnvironmentProfile, UiExpectations};
use crate::session::SessionFactory;

/// Name of the environment setup outcome
pub const ENVIRONMENT_STEP: &str = "environment";

/// Everything a profile run needs; cheap to clone into spawned tasks
#[derive(Clone)]
pub struct ProfileRunner {
    steps: Arc<Vec<FlowStep>>,
    ui: Arc<UiExpectations>,
    env: HashMap<String, String>,
    api: Arc<dyn ApiBackend>,
    sessions: Arc<dyn SessionFactory>,
    environments: Arc<dyn EnvironmentFactory>,
    options: ExecutorOptions,
    emitter: EventEmitter,
    cancel: CancelToken,
    parallel: bool,
    needs_ui: bool,
}

impl ProfileRunner {
    pub fn new(
        steps: Vec<FlowStep>,
        ui: UiExpectations,
        api: Arc<dyn ApiBackend>,
        sessions: Arc<dyn SessionFactory>,
        environments: Arc<dyn EnvironmentFactory>,
        options: ExecutorOptions,
    ) -> Self {
        let needs_ui = steps.iter().any(|s| s.action.is_ui());
        Self {
            steps: Arc::new(steps),
            ui: Arc::new(ui),
            env: HashMap::new(),
            api,
            sessions,
            environments,
            options,
            emitter: EventEmitter::default(),
            cancel: CancelToken::new(),
            parallel: false,
            needs_ui,
        }
    }

    /// Variables seeded into every profile's context
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run the flow once per profile and return one report per profile.
    /// Profiles run concurrently when parallel mode is on, one after
    /// another otherwise; every run is its own task either way.
    pub async fn run_across_profiles(&self, profiles: &[EnvironmentProfile]) -> ProfileReports {
        let mut reports = ProfileReports::new();

        if self.parallel && profiles.len() > 1 {
            info!("Running {} profiles in parallel", profiles.len());
            let handles: Vec<_> = profiles
                .iter()
                .map(|profile| (profile.id.clone(), self.spawn(profile.clone())))
                .collect();
            let ids: Vec<String> = handles.iter().map(|(id, _)| id.clone()).collect();
            let results = join_all(handles.into_iter().map(|(_, handle)| handle)).await;

            for (id, result) in ids.into_iter().zip(results) {
                let report = result.unwrap_or_else(|e| crashed_report(&id, &e));
                reports.insert(id, report);
            }
        } else {
            for profile in profiles {
                let report = self
                    .spawn(profile.clone())
                    .await
                    .unwrap_or_else(|e| crashed_report(&profile.id, &e));
                reports.insert(profile.id.clone(), report);
            }
        }

        self.sessions.end_run().await;
        reports
    }

    fn spawn(&self, profile: EnvironmentProfile) -> tokio::task::JoinHandle<RunReport> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_profile(profile).await })
    }

    /// One isolated profile run: authenticate, open the environment, run
    /// the steps, tear down.
    pub async fn run_profile(&self, profile: EnvironmentProfile) -> RunReport {
        let id = profile.id.clone();
        let mut state = RunState::new(&id);
        let steps = self.steps.as_slice();

        self.emitter.emit(RunEvent::ProfileStarted {
            profile: id.clone(),
            step_count: steps.len(),
        });

        if self.cancel.is_cancelled() {
            state.mark_cancelled();
            self.gate(&mut state, &id, AUTHENTICATE_STEP, "login", Instant::now(), Err(VerifyError::Cancelled));
            state.skip_remaining(steps, "run cancelled");
            return self.finish(state);
        }

        let started = Instant::now();
        let session = match self.sessions.session_for(&profile).await {
            Ok(session) => {
                let note = format!("session {} for {}", session.id, session.identifier);
                self.gate(&mut state, &id, AUTHENTICATE_STEP, "login", started, Ok(note));
                session
            }
            Err(failure) => {
                error!("[{}] authentication failed: {}", id, failure);
                self.gate(&mut state, &id, AUTHENTICATE_STEP, "login", started, Err(failure.into()));
                state.skip_remaining(steps, "authentication failed");
                return self.finish(state);
            }
        };

        let mut executor = FlowExecutor::new(
            profile.clone(),
            self.ui.clone(),
            self.api.clone(),
            FlowContext::new(self.env.clone()),
            self.options.clone(),
        )
        .with_emitter(self.emitter.clone())
        .with_cancel(self.cancel.clone());

        if self.needs_ui {
            let started = Instant::now();
            let limit = Duration::from_millis(self.options.default_timeout_ms.max(30_000));
            let opened = match tokio::time::timeout(limit, self.environments.open(&profile, &session)).await {
                Ok(Ok(driver)) => Ok(driver),
                Ok(Err(e)) => Err(VerifyError::environment(format!("{:#}", e))),
                Err(_) => Err(VerifyError::Timeout {
                    after_ms: limit.as_millis() as u64,
                }),
            };
            match opened {
                Ok(driver) => {
                    let note = format!(
                        "{}x{} viewport{}",
                        profile.viewport.width,
                        profile.viewport.height,
                        if profile.is_mobile { ", mobile" } else { "" }
                    );
                    self.gate(&mut state, &id, ENVIRONMENT_STEP, "open", started, Ok(note));
                    executor = executor.with_driver(driver);
                }
                Err(err) => {
                    error!("[{}] environment setup failed: {}", id, err);
                    self.gate(&mut state, &id, ENVIRONMENT_STEP, "open", started, Err(err));
                    state.skip_remaining(steps, "environment unavailable");
                    return self.finish(state);
                }
            }
        }

        executor.execute(&mut state, &session, steps).await;
        executor.close().await;
        self.finish(state)
    }

    fn gate(
        &self,
        state: &mut RunState,
        profile: &str,
        name: &str,
        action: &str,
        started: Instant,
        result: Result<String, VerifyError>,
    ) {
        let index = state.next_index();
        self.emitter.emit(RunEvent::StepStarted {
            profile: profile.to_string(),
            index,
            step: name.to_string(),
        });

        let outcome = match &result {
            Ok(note) => StepOutcome::gate(index, name, action, started, Ok(note.clone()), None),
            Err(err) => {
                let snapshot = DiagnosticSnapshot {
                    profile_id: profile.to_string(),
                    step: name.to_string(),
                    captured_at: Utc::now(),
                    visual: None,
                    structural: format!("{}: {}\n", name, err),
                    structural_format: "txt".to_string(),
                };
                StepOutcome::gate(index, name, action, started, Err(err), Some(snapshot))
            }
        };

        let duration_ms = outcome.duration_ms.unwrap_or(0);
        match result {
            Ok(_) => self.emitter.emit(RunEvent::StepPassed {
                profile: profile.to_string(),
                index,
                duration_ms,
                notes: outcome.notes.clone(),
            }),
            Err(err) => self.emitter.emit(RunEvent::StepFailed {
                profile: profile.to_string(),
                index,
                error: err.to_string(),
                soft: false,
                duration_ms,
            }),
        }
        state.record(outcome);
    }

    fn finish(&self, state: RunState) -> RunReport {
        let report = state.finish();
        self.emitter.emit(RunEvent::ProfileFinished {
            profile: report.profile_id.clone(),
            status: report.status.clone(),
            duration_ms: report.total_duration_ms,
        });
        report
    }
}

/// Report for a profile task that panicked or was aborted
fn crashed_report(profile: &str, err: &tokio::task::JoinError) -> RunReport {
    error!("[{}] profile run crashed: {}", profile, err);
    let mut state = RunState::new(profile);
    let failure = VerifyError::Environment(format!("profile run crashed: {}", err));
    state.record(StepOutcome::gate(
        0,
        "profile",
        "run",
        Instant::now(),
        Err(&failure),
        None,
    ));
    state.finish()
}
