use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::assertions::{AffordanceState, ElementState, Evaluator, Observation};
use super::cancel::CancelToken;
use super::context::FlowContext;
use super::events::{EventEmitter, RunEvent};
use super::state::{DiagnosticSnapshot, RunReport, RunState, StepOutcome};
use super::step::{Action, Criticality, FlowStep};
use crate::api::{ApiBackend, ApiLayout, ApiResponse};
use crate::driver::traits::{Selector, UiDriver};
use crate::error::VerifyError;
use crate::parser::types::{EnvironmentProfile, UiExpectations};
use crate::session::Session;

/// Knobs shared by every profile run
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Per-step limit when the step declares none
    pub default_timeout_ms: u64,
    pub snapshot_on_failure: bool,
    pub success_pointer: String,
    pub message_pointer: String,
    pub list_pointer: String,
}

impl ExecutorOptions {
    pub fn from_layout(layout: &ApiLayout, default_timeout_ms: u64) -> Self {
        Self {
            default_timeout_ms,
            snapshot_on_failure: true,
            success_pointer: layout.success_pointer.clone(),
            message_pointer: layout.message_pointer.clone(),
            list_pointer: layout.list_pointer.clone(),
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_layout(&ApiLayout::default(), 10_000)
    }
}

/// Executes one flow for one profile under one session
///
/// Steps run strictly in order. A hard failure skips everything after it,
/// a soft failure is recorded and execution continues.
pub struct FlowExecutor {
    profile: EnvironmentProfile,
    ui: Arc<UiExpectations>,
    api: Arc<dyn ApiBackend>,
    driver: Option<Box<dyn UiDriver>>,
    context: FlowContext,
    options: ExecutorOptions,
    emitter: EventEmitter,
    cancel: CancelToken,
}

impl FlowExecutor {
    pub fn new(
        profile: EnvironmentProfile,
        ui: Arc<UiExpectations>,
        api: Arc<dyn ApiBackend>,
        context: FlowContext,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            profile,
            ui,
            api,
            driver: None,
            context,
            options,
            emitter: EventEmitter::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_driver(mut self, driver: Box<dyn UiDriver>) -> Self {
        self.driver = Some(driver);
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

    /// Run all steps into a fresh report
    pub async fn run(&mut self, session: &Session, steps: &[FlowStep]) -> RunReport {
        let mut state = RunState::new(&self.profile.id);
        self.execute(&mut state, session, steps).await;
        self.close().await;
        state.finish()
    }

    /// Run all steps, appending outcomes to `state`
    pub async fn execute(&mut self, state: &mut RunState, session: &Session, steps: &[FlowStep]) {
        let profile = self.profile.id.clone();

        for (i, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                state.mark_cancelled();
                self.skip_all(state, &steps[i..], "run cancelled");
                break;
            }

            let index = state.next_index();

            let unmet = step.depends_on.iter().find(|dep| {
                !state
                    .outcome(dep)
                    .map_or(false, |outcome| outcome.status.is_passed())
            });
            if let Some(dep) = unmet {
                let reason = format!("dependency '{}' did not pass", dep);
                self.emit_skipped(step, &reason);
                state.record(StepOutcome::skipped(index, step, &reason));
                if step.criticality == Criticality::Hard {
                    let reason = format!("aborted: hard step '{}' could not run", step.name);
                    self.skip_all(state, &steps[i + 1..], &reason);
                    break;
                }
                continue;
            }

            self.emitter.emit(RunEvent::StepStarted {
                profile: profile.clone(),
                index,
                step: step.name.clone(),
            });
            let started = Instant::now();

            match self.run_step(session, step).await {
                Ok(notes) => {
                    let outcome = StepOutcome::passed(index, step, started, notes);
                    self.emitter.emit(RunEvent::StepPassed {
                        profile: profile.clone(),
                        index,
                        duration_ms: outcome.duration_ms.unwrap_or(0),
                        notes: outcome.notes.clone(),
                    });
                    state.record(outcome);
                }
                Err(err) => {
                    debug!("[{}] step '{}' failed: {}", profile, step.name, err);
                    let snapshot = if self.options.snapshot_on_failure {
                        Some(self.capture(step, &err).await)
                    } else {
                        None
                    };

                    let soft = step.criticality == Criticality::Soft && !err.is_always_hard();
                    let mut outcome = StepOutcome::failed(index, step, started, &err, snapshot);
                    if err.is_always_hard() {
                        outcome.criticality = Criticality::Hard;
                    }

                    self.emitter.emit(RunEvent::StepFailed {
                        profile: profile.clone(),
                        index,
                        error: err.to_string(),
                        soft,
                        duration_ms: outcome.duration_ms.unwrap_or(0),
                    });
                    state.record(outcome);

                    if !soft {
                        let reason = format!("aborted after hard failure in '{}'", step.name);
                        self.skip_all(state, &steps[i + 1..], &reason);
                        break;
                    }
                }
            }
        }
    }

    /// Tear down the UI environment, if one is open
    pub async fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                warn!("[{}] closing environment failed: {}", self.profile.id, e);
            }
        }
    }

    fn skip_all(&self, state: &mut RunState, steps: &[FlowStep], reason: &str) {
        for step in steps {
            self.emit_skipped(step, reason);
        }
        state.skip_remaining(steps, reason);
    }

    fn log_warning(&self, message: String) {
        warn!("[{}] {}", self.profile.id, message);
        self.emitter.emit(RunEvent::Log {
            profile: self.profile.id.clone(),
            message,
        });
    }

    fn emit_skipped(&self, step: &FlowStep, reason: &str) {
        self.emitter.emit(RunEvent::StepSkipped {
            profile: self.profile.id.clone(),
            step: step.name.clone(),
            reason: reason.to_string(),
        });
    }

    async fn run_step(&mut self, session: &Session, step: &FlowStep) -> Result<Vec<String>, VerifyError> {
        // Never issue a dependent operation without a valid session
        session.ensure_valid()?;

        let limit = step.timeout_ms.unwrap_or(self.options.default_timeout_ms);
        let observation = match &step.action {
            Action::Wait(_) => self.perform(session, &step.action, limit).await?,
            action => {
                match tokio::time::timeout(Duration::from_millis(limit), self.perform(session, action, limit)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(VerifyError::Timeout { after_ms: limit }),
                }
            }
        };

        if let Observation::Api(response) = &observation {
            self.context.last_response = Some(response.body.clone());
            self.check_envelope(response)?;
        }

        // Only acknowledged writes count for later read-backs
        if let Action::SetFlag { flag, value } = &step.action {
            self.context.record_write(flag, Value::Bool(*value));
        }

        let notes = Evaluator {
            profile: &self.profile,
            context: &self.context,
            list_pointer: &self.options.list_pointer,
        }
        .check_all(&step.expect, &observation)?;

        if let Some(var) = &step.save_as {
            if let Some(value) = observation.to_saved_value() {
                self.context.set_var(var, &value);
            }
        }

        Ok(notes)
    }

    fn check_envelope(&self, response: &ApiResponse) -> Result<(), VerifyError> {
        match response.success(&self.options.success_pointer) {
            Some(true) => Ok(()),
            Some(false) => {
                let message = response
                    .message(&self.options.message_pointer)
                    .unwrap_or_else(|| format!("HTTP {}", response.status));
                Err(VerifyError::mismatch(
                    "successful response",
                    format!("unsuccessful response: {}", message),
                ))
            }
            None => Err(VerifyError::mismatch(
                format!("boolean success indicator at {}", self.options.success_pointer),
                format!("malformed response (HTTP {})", response.status),
            )),
        }
    }

    fn driver(&self) -> Result<&dyn UiDriver, VerifyError> {
        self.driver.as_deref().ok_or_else(|| {
            VerifyError::Environment(format!(
                "no UI environment open for profile '{}'",
                self.profile.id
            ))
        })
    }

    async fn perform(&self, session: &Session, action: &Action, limit_ms: u64) -> Result<Observation, VerifyError> {
        let token = session.token();
        let ctx = &self.context;
        let api_call = |result: anyhow::Result<ApiResponse>| api_observation(result, limit_ms);

        match action {
            Action::FetchStats => api_call(self.api.fetch_stats(token).await),
            Action::FetchRankedList { kind, limit } => {
                api_call(self.api.fetch_ranked_list(token, &ctx.substitute_vars(kind), *limit).await)
            }
            Action::SetFlag { flag, value } => api_call(self.api.set_flag(token, flag, *value).await),
            Action::ApiRequest { method, path, body } => {
                let path = ctx.substitute_vars(path);
                let body = body.as_ref().map(|b| ctx.substitute_value(b));
                api_call(self.api.request(token, method, &path, body.as_ref()).await)
            }

            Action::Navigate(target) => {
                self.driver()?
                    .navigate(&ctx.substitute_vars(target))
                    .await
                    .map_err(VerifyError::environment)?;
                Ok(Observation::Done)
            }
            Action::Fill { selector, text } => {
                self.driver()?
                    .fill(selector, &ctx.substitute_vars(text))
                    .await
                    .map_err(VerifyError::environment)?;
                Ok(Observation::Done)
            }
            Action::Click(selector) => {
                self.driver()?
                    .click(selector)
                    .await
                    .map_err(VerifyError::environment)?;
                Ok(Observation::Done)
            }
            Action::Check(selector) => {
                let state = observe(self.driver()?, selector).await?;
                Ok(Observation::Element(state))
            }
            Action::AssertUiState(names) => self.observe_ui_state(names).await,

            Action::Wait(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Observation::Done)
            }
        }
    }

    async fn observe_ui_state(&self, names: &[String]) -> Result<Observation, VerifyError> {
        let profile = &self.profile.id;
        let expected = self.ui.for_profile(profile).ok_or_else(|| {
            VerifyError::mismatch(
                format!("declared UI state for profile '{}'", profile),
                "none declared",
            )
        })?;

        let selected: Vec<(&String, &Vec<_>)> = if names.is_empty() {
            expected.iter().collect()
        } else {
            names
                .iter()
                .map(|name| {
                    expected.get_key_value(name).ok_or_else(|| {
                        VerifyError::mismatch(
                            format!("declared state of '{}' for profile '{}'", name, profile),
                            "none declared",
                        )
                    })
                })
                .collect::<Result<_, _>>()?
        };

        let driver = self.driver()?;
        let mut affordances = Vec::with_capacity(selected.len());
        for (name, expectations) in selected {
            let selector = self.ui.affordance(name).ok_or_else(|| {
                VerifyError::Environment(format!("affordance '{}' has no selector", name))
            })?;
            affordances.push(AffordanceState {
                name: name.clone(),
                state: observe(driver, selector).await?,
                expectations: expectations.clone(),
            });
        }
        Ok(Observation::UiState(affordances))
    }

    /// Capture environment state right after a failure. Never fails; a
    /// capture error degrades to a textual record of the failure.
    async fn capture(&self, step: &FlowStep, err: &VerifyError) -> DiagnosticSnapshot {
        let captured_at = Utc::now();
        let limit = Duration::from_millis(self.options.default_timeout_ms);
        let mut visual = None;
        let mut structural = None;

        if let Some(driver) = self.driver.as_deref() {
            match tokio::time::timeout(limit, driver.screenshot()).await {
                Ok(Ok(bytes)) => visual = Some(bytes),
                Ok(Err(e)) => self.log_warning(format!("screenshot failed: {}", e)),
                Err(_) => self.log_warning("screenshot timed out".to_string()),
            }
            if step.action.is_ui() {
                match tokio::time::timeout(limit, driver.dump_markup()).await {
                    Ok(Ok(markup)) => structural = Some((markup, "html")),
                    Ok(Err(e)) => self.log_warning(format!("markup dump failed: {}", e)),
                    Err(_) => self.log_warning("markup dump timed out".to_string()),
                }
            }
        }

        if structural.is_none() && !step.action.is_ui() {
            structural = self
                .context
                .last_response
                .as_ref()
                .and_then(|body| serde_json::to_string_pretty(body).ok())
                .map(|json| (json, "json"));
        }

        let (structural, format) =
            structural.unwrap_or_else(|| (format!("{}: {}\n", step.name, err), "txt"));

        DiagnosticSnapshot {
            profile_id: self.profile.id.clone(),
            step: step.name.clone(),
            captured_at,
            visual,
            structural,
            structural_format: format.to_string(),
        }
    }
}

/// Transport timeouts surface as step timeouts, other transport errors as
/// environment failures
fn api_observation(
    result: anyhow::Result<ApiResponse>,
    timeout_ms: u64,
) -> Result<Observation, VerifyError> {
    match result {
        Ok(response) => Ok(Observation::Api(response)),
        Err(e) => {
            let timed_out = e
                .downcast_ref::<reqwest::Error>()
                .map_or(false, |re| re.is_timeout());
            if timed_out {
                Err(VerifyError::Timeout { after_ms: timeout_ms })
            } else {
                Err(VerifyError::environment(format!("{:#}", e)))
            }
        }
    }
}

async fn observe(driver: &dyn UiDriver, selector: &Selector) -> Result<ElementState, VerifyError> {
    let count = driver.count(selector).await.map_err(VerifyError::environment)?;
    let visible = driver
        .is_visible(selector)
        .await
        .map_err(VerifyError::environment)?;

    let (text, classes) = if count == 0 && !visible {
        (None, Vec::new())
    } else {
        let text = driver
            .text_content(selector)
            .await
            .map_err(VerifyError::environment)?;
        let classes = driver
            .class_list(selector)
            .await
            .map_err(VerifyError::environment)?;
        (text, classes)
    };

    Ok(ElementState {
        selector: selector.to_string(),
        visible,
        count,
        text,
        classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthFailure, FailureKind};
    use crate::runner::state::{RunStatus, StepStatus};
    use crate::runner::step::{Expectation, ValueKind};
    use crate::session::Credentials;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory backend: one privacy flag, a stats document and lists
    struct FakeApi {
        is_public: Mutex<bool>,
        lists: Value,
        stall_stats: bool,
    }

    impl FakeApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                is_public: Mutex::new(true),
                lists: json!({"following": [], "global": [{"rank": 1}]}),
                stall_stats: false,
            })
        }
    }

    #[async_trait]
    impl ApiBackend for FakeApi {
        async fn login(&self, _: &Credentials) -> Result<crate::api::LoginGrant, AuthFailure> {
            unreachable!()
        }

        async fn fetch_stats(&self, _token: &str) -> anyhow::Result<ApiResponse> {
            if self.stall_stats {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let public = *self.is_public.lock().unwrap();
            Ok(ApiResponse::new(
                200,
                json!({"success": true, "totalValue": 1520.5, "isPublic": public}),
            ))
        }

        async fn fetch_ranked_list(&self, _: &str, kind: &str, _: u32) -> anyhow::Result<ApiResponse> {
            Ok(ApiResponse::new(
                200,
                json!({"success": true, "data": self.lists[kind].clone()}),
            ))
        }

        async fn set_flag(&self, _: &str, _: &str, value: bool) -> anyhow::Result<ApiResponse> {
            *self.is_public.lock().unwrap() = value;
            Ok(ApiResponse::new(200, json!({"success": true})))
        }

        async fn request(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&Value>,
        ) -> anyhow::Result<ApiResponse> {
            Ok(ApiResponse::new(200, json!({"ok": 1})))
        }
    }

    fn session() -> Session {
        Session::new("alex@example.com", "tok", Value::Null, None)
    }

    fn executor(api: Arc<FakeApi>) -> FlowExecutor {
        FlowExecutor::new(
            EnvironmentProfile::desktop("desktop"),
            Arc::new(UiExpectations::default()),
            api,
            FlowContext::default(),
            ExecutorOptions {
                default_timeout_ms: 200,
                ..ExecutorOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_privacy_toggle_reads_back() {
        let steps = vec![
            FlowStep::new("stats", Action::FetchStats).expect(Expectation::FieldType {
                path: "totalValue".into(),
                kind: ValueKind::Number,
            }),
            FlowStep::new(
                "go private",
                Action::SetFlag {
                    flag: "isPublic".into(),
                    value: false,
                },
            ),
            FlowStep::new("read back", Action::FetchStats)
                .depends_on("go private")
                .expect(Expectation::ReadBack {
                    path: "isPublic".into(),
                    flag: "isPublic".into(),
                }),
        ];

        let report = executor(FakeApi::new()).run(&session(), &steps).await;
        assert_eq!(report.status, RunStatus::Passed);
        assert_eq!(report.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn test_hard_failure_skips_rest_soft_continues() {
        let steps = vec![
            FlowStep::new("soft check", Action::FetchStats)
                .soft()
                .expect(Expectation::FieldEquals {
                    path: "totalValue".into(),
                    value: json!(0),
                }),
            FlowStep::new("hard check", Action::FetchStats).expect(Expectation::FieldType {
                path: "missing".into(),
                kind: ValueKind::Number,
            }),
            FlowStep::new("after", Action::FetchStats),
        ];

        let report = executor(FakeApi::new()).run(&session(), &steps).await;
        assert_eq!(report.outcomes[0].status.label(), "fail");
        assert_eq!(report.outcomes[1].status.label(), "fail");
        assert!(matches!(report.outcomes[2].status, StepStatus::Skipped { .. }));
        assert_eq!(report.status, RunStatus::Failed { hard_failures: 2 });

        // Failures carry a diagnostic snapshot of the last API response
        let snapshot = report.outcomes[1].snapshot.as_ref().unwrap();
        assert_eq!(snapshot.structural_format, "json");
        assert!(snapshot.structural.contains("totalValue"));
    }

    #[tokio::test]
    async fn test_empty_following_list_passes_with_note() {
        let steps = vec![FlowStep::new(
            "following",
            Action::FetchRankedList {
                kind: "following".into(),
                limit: 10,
            },
        )
        .expect(Expectation::RankedList { allow_empty: true })];

        let report = executor(FakeApi::new()).run(&session(), &steps).await;
        assert_eq!(report.status, RunStatus::Passed);
        assert!(report.outcomes[0].notes[0].contains("empty list accepted"));
    }

    #[tokio::test]
    async fn test_missing_envelope_is_malformed() {
        let steps = vec![FlowStep::new(
            "raw",
            Action::ApiRequest {
                method: "GET".into(),
                path: "/api/raw".into(),
                body: None,
            },
        )];

        let report = executor(FakeApi::new()).run(&session(), &steps).await;
        let err = report.outcomes[0].error().unwrap();
        assert!(err.contains("malformed response"));
    }

    #[tokio::test]
    async fn test_timeout_applies_criticality() {
        let api = Arc::new(FakeApi {
            is_public: Mutex::new(true),
            lists: json!({}),
            stall_stats: true,
        });
        let steps = vec![
            FlowStep::new("slow", Action::FetchStats).timeout_ms(20).soft(),
            FlowStep::new("wait", Action::Wait(1)),
        ];

        let report = executor(api).run(&session(), &steps).await;
        match &report.outcomes[0].status {
            StepStatus::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(report.outcomes[1].status.is_passed());
        assert_eq!(report.status, RunStatus::Degraded { soft_failures: 1 });
    }

    #[tokio::test]
    async fn test_expired_session_issues_no_operation() {
        let api = FakeApi::new();
        let expired = Session::new("alex@example.com", "", Value::Null, None);
        let steps = vec![FlowStep::new(
            "go private",
            Action::SetFlag {
                flag: "isPublic".into(),
                value: false,
            },
        )];

        let report = executor(api.clone()).run(&expired, &steps).await;
        assert!(!report.status.is_pass());
        assert!(*api.is_public.lock().unwrap());
    }

    #[tokio::test]
    async fn test_ui_step_without_environment_is_always_hard() {
        let steps = vec![
            FlowStep::new("open", Action::Navigate("/".into())).soft(),
            FlowStep::new("after", Action::FetchStats),
        ];

        let report = executor(FakeApi::new()).run(&session(), &steps).await;
        assert!(report.outcomes[0].is_hard());
        assert!(matches!(report.outcomes[1].status, StepStatus::Skipped { .. }));
        assert!(!report.status.is_pass());
    }

    #[tokio::test]
    async fn test_cancelled_run_issues_no_steps() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let steps = vec![FlowStep::new("stats", Action::FetchStats)];

        let report = executor(FakeApi::new())
            .with_cancel(cancel)
            .run(&session(), &steps)
            .await;
        assert!(report.cancelled);
        assert_eq!(report.count("skipped"), 1);
    }

    /// Page that refuses every interaction and every capture
    struct BrokenPage;

    #[async_trait]
    impl UiDriver for BrokenPage {
        fn profile_id(&self) -> &str {
            "desktop"
        }
        async fn navigate(&self, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("page crashed")
        }
        async fn is_visible(&self, _: &Selector) -> anyhow::Result<bool> {
            anyhow::bail!("page crashed")
        }
        async fn count(&self, _: &Selector) -> anyhow::Result<usize> {
            anyhow::bail!("page crashed")
        }
        async fn text_content(&self, _: &Selector) -> anyhow::Result<Option<String>> {
            anyhow::bail!("page crashed")
        }
        async fn class_list(&self, _: &Selector) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("page crashed")
        }
        async fn fill(&self, _: &Selector, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("page crashed")
        }
        async fn click(&self, _: &Selector) -> anyhow::Result<()> {
            anyhow::bail!("page crashed")
        }
        async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("no surface")
        }
        async fn dump_markup(&self) -> anyhow::Result<String> {
            anyhow::bail!("no document")
        }
    }

    #[tokio::test]
    async fn test_capture_trouble_is_broadcast() {
        let (emitter, mut events) = EventEmitter::new();
        let steps = vec![FlowStep::new("open", Action::Navigate("/".into()))];

        let report = executor(FakeApi::new())
            .with_driver(Box::new(BrokenPage))
            .with_emitter(emitter)
            .run(&session(), &steps)
            .await;

        // The snapshot degrades to a textual record
        let snapshot = report.outcomes[0].snapshot.as_ref().unwrap();
        assert!(snapshot.visual.is_none());
        assert_eq!(snapshot.structural_format, "txt");

        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RunEvent::Log { profile, message } = event {
                assert_eq!(profile, "desktop");
                logs.push(message);
            }
        }
        assert_eq!(
            logs,
            vec![
                "screenshot failed: no surface".to_string(),
                "markup dump failed: no document".to_string()
            ]
        );
    }
}
