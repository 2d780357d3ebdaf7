//! End-to-end runs of whole suites against in-process fakes and a mock
//! HTTP server.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::*;
use crate::api::{ApiResponse, LoginGrant};
use crate::driver::{Selector, UiDriver};
use crate::error::{AuthFailure, FailureKind};
use crate::parser::parse_suite_content;
use crate::session::Session;

/// Account API with a persisted privacy flag
struct PortfolioApi {
    is_public: AtomicBool,
}

impl PortfolioApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            is_public: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl ApiBackend for PortfolioApi {
    async fn login(&self, credentials: &Credentials) -> Result<LoginGrant, AuthFailure> {
        if credentials.identifier == "alex@example.com" && credentials.secret == "password123" {
            Ok(LoginGrant {
                token: "tok-alex".into(),
                user: json!({"email": "alex@example.com"}),
                expires_in: Some(3600),
            })
        } else {
            Err(AuthFailure::Rejected {
                message: "Invalid credentials".into(),
            })
        }
    }

    async fn fetch_stats(&self, _token: &str) -> Result<ApiResponse> {
        Ok(ApiResponse::new(
            200,
            json!({
                "success": true,
                "data": {
                    "totalValue": 1520.75,
                    "isPublic": self.is_public.load(Ordering::SeqCst)
                }
            }),
        ))
    }

    async fn fetch_ranked_list(&self, _token: &str, kind: &str, _limit: u32) -> Result<ApiResponse> {
        let data = match kind {
            "following" => json!([]),
            _ => json!([{"rank": 1, "name": "Alex"}]),
        };
        Ok(ApiResponse::new(200, json!({"success": true, "data": data})))
    }

    async fn set_flag(&self, _token: &str, flag: &str, value: bool) -> Result<ApiResponse> {
        assert_eq!(flag, "isPublic");
        self.is_public.store(value, Ordering::SeqCst);
        Ok(ApiResponse::new(200, json!({"success": true})))
    }

    async fn request(&self, _: &str, _: &str, _: &str, _: Option<&Value>) -> Result<ApiResponse> {
        Ok(ApiResponse::new(404, json!({"success": false, "message": "not found"})))
    }
}

#[derive(Clone)]
struct FakeElement {
    text: String,
    visible: bool,
}

fn elements(texts: &[&str]) -> Vec<FakeElement> {
    texts
        .iter()
        .map(|t| FakeElement {
            text: t.to_string(),
            visible: true,
        })
        .collect()
}

/// In-memory page: selector text -> matching elements. Clicking
/// `button.send` posts the drafted message.
struct FakePage {
    profile_id: String,
    elements: Mutex<HashMap<String, Vec<FakeElement>>>,
    draft: Mutex<String>,
}

impl FakePage {
    fn matches(&self, selector: &Selector) -> Vec<FakeElement> {
        let elements = self.elements.lock().unwrap();
        match selector {
            Selector::Nth { base, index } => {
                let all = elements.get(&base.to_string()).cloned().unwrap_or_default();
                let i = if *index < 0 {
                    all.len() as i32 + index
                } else {
                    *index
                };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| all.get(i).cloned())
                    .into_iter()
                    .collect()
            }
            other => elements.get(&other.to_string()).cloned().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl UiDriver for FakePage {
    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    async fn navigate(&self, _target: &str) -> Result<()> {
        Ok(())
    }

    async fn is_visible(&self, selector: &Selector) -> Result<bool> {
        Ok(self.matches(selector).first().map_or(false, |e| e.visible))
    }

    async fn count(&self, selector: &Selector) -> Result<usize> {
        Ok(self.matches(selector).iter().filter(|e| e.visible).count())
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>> {
        Ok(self.matches(selector).first().map(|e| e.text.clone()))
    }

    async fn class_list(&self, _selector: &Selector) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn fill(&self, _selector: &Selector, text: &str) -> Result<()> {
        *self.draft.lock().unwrap() = text.to_string();
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        if selector.to_string() == "button.send" {
            let text = std::mem::take(&mut *self.draft.lock().unwrap());
            self.elements
                .lock()
                .unwrap()
                .entry(".message".into())
                .or_default()
                .push(FakeElement {
                    text: format!("  {}\n", text),
                    visible: true,
                });
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn dump_markup(&self) -> Result<String> {
        Ok(format!("<html data-profile=\"{}\"></html>", self.profile_id))
    }
}

/// Renders the mobile tab bar for mobile profiles only, unless told to
/// leak it into desktop layouts too
#[derive(Default)]
struct FakeApp {
    tab_bar_everywhere: bool,
    broken_profile: Option<String>,
}

#[async_trait]
impl EnvironmentFactory for FakeApp {
    async fn open(&self, profile: &EnvironmentProfile, session: &Session) -> Result<Box<dyn UiDriver>> {
        assert!(session.is_valid());
        if self.broken_profile.as_deref() == Some(profile.id.as_str()) {
            anyhow::bail!("browser crashed on launch");
        }

        let mut page = HashMap::new();
        if profile.is_mobile || self.tab_bar_everywhere {
            page.insert("testId=tab-bar".to_string(), elements(&["nav"]));
            page.insert(
                "[data-testid=tab-bar] a".to_string(),
                elements(&["Home", "Market", "Portfolio", "Chat", "Profile"]),
            );
        }
        page.insert(".message".to_string(), elements(&["Welcome!"]));

        Ok(Box::new(FakePage {
            profile_id: profile.id.clone(),
            elements: Mutex::new(page),
            draft: Mutex::new(String::new()),
        }))
    }
}

const FANSCOUT: &str = r#"
name: fanscout
apiUrl: http://api.invalid
credentials:
  identifier: alex@example.com
  secret: password123
profiles: [mobile, desktop]
affordances:
  tabBar: { testId: tab-bar }
  tabItems: "[data-testid=tab-bar] a"
expectedUi:
  mobile:
    tabBar: visible
    tabItems: { count: 5 }
  desktop:
    tabBar: absent
steps:
  - name: stats
    fetchStats:
    expect:
      - fieldType: { path: data.totalValue, kind: number }
      - fieldType: { path: data.isPublic, kind: boolean }
  - name: go private
    setPrivacy: private
  - name: private read back
    fetchStats:
    dependsOn: go private
    expect:
      - readBack: { path: data.isPublic, flag: isPublic }
  - name: go public
    setPrivacy: public
  - name: public read back
    fetchStats:
    dependsOn: go public
    expect:
      - readBack: { path: data.isPublic, flag: isPublic }
  - name: following
    fetchRankedList: following
    soft: true
    expect:
      - rankedList: { allowEmpty: true }
  - name: open app
    navigate: /
  - name: navigation layout
    assertUiState:
  - name: type message
    fill: { selector: "textarea.composer", text: Test message }
  - name: send
    click: button.send
  - name: last message
    check: { css: .message, index: -1 }
    expect:
      - textEquals: Test message
"#;

fn config(dir: &Path) -> Config {
    Config {
        output_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

async fn run_fanscout(
    app: FakeApp,
    credentials: Credentials,
    dir: &Path,
    cancel: CancelToken,
) -> RunResults {
    let suite = parse_suite_content(FANSCOUT).unwrap();
    run_suite_with(
        &suite,
        &config(dir),
        &suite.profiles,
        credentials,
        PortfolioApi::new(),
        Arc::new(app),
        EventEmitter::default(),
        cancel,
    )
    .await
}

fn alex() -> Credentials {
    Credentials::new("alex@example.com", "password123")
}

#[tokio::test]
async fn test_full_flow_passes_on_every_profile() {
    let dir = tempfile::tempdir().unwrap();
    let results = run_fanscout(FakeApp::default(), alex(), dir.path(), CancelToken::new()).await;

    assert!(results.summary.passed, "{}", crate::report::render(&results.summary));
    assert!(!results.summary.degraded);
    assert_eq!(results.summary.profiles.len(), 2);

    for report in results.reports.values() {
        assert_eq!(report.outcomes[0].step, AUTHENTICATE_STEP);
        assert!(report.outcomes.iter().all(|o| o.status.is_passed()));

        let following = report.outcome("following").unwrap();
        assert!(following.notes.iter().any(|n| n.contains("empty list accepted")));
    }
}

#[tokio::test]
async fn test_desktop_tab_bar_fails_only_desktop() {
    let dir = tempfile::tempdir().unwrap();
    let app = FakeApp {
        tab_bar_everywhere: true,
        ..Default::default()
    };
    let results = run_fanscout(app, alex(), dir.path(), CancelToken::new()).await;

    assert!(!results.summary.passed);
    assert!(results.reports["mobile"].status.is_pass());

    let desktop = &results.reports["desktop"];
    let layout = desktop.outcome("navigation layout").unwrap();
    match &layout.status {
        StepStatus::Failed { kind, error } => {
            assert_eq!(*kind, FailureKind::Mismatch);
            assert!(error.contains("tabBar"), "{}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let artifact = layout.artifact.as_ref().unwrap();
    assert!(Path::new(&artifact.structural_path).starts_with(dir.path().join("artifacts").join("desktop")));
    assert!(Path::new(artifact.visual_path.as_ref().unwrap()).exists());

    // Hard failure: the chat steps never ran
    let last = desktop.outcome("last message").unwrap();
    assert!(matches!(last.status, StepStatus::Skipped { .. }));
}

#[tokio::test]
async fn test_rejected_credentials_fail_every_profile() {
    let dir = tempfile::tempdir().unwrap();
    let results = run_fanscout(
        FakeApp::default(),
        Credentials::new("alex@example.com", "wrong"),
        dir.path(),
        CancelToken::new(),
    )
    .await;

    assert!(!results.summary.passed);
    for report in results.reports.values() {
        let auth = &report.outcomes[0];
        assert!(matches!(
            auth.status,
            StepStatus::Failed {
                kind: FailureKind::Auth,
                ..
            }
        ));
        assert!(report.outcomes[1..]
            .iter()
            .all(|o| matches!(o.status, StepStatus::Skipped { .. })));
    }
}

#[tokio::test]
async fn test_environment_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let app = FakeApp {
        broken_profile: Some("mobile".into()),
        ..Default::default()
    };
    let results = run_fanscout(app, alex(), dir.path(), CancelToken::new()).await;

    assert!(!results.summary.passed);
    assert!(results.reports["desktop"].status.is_pass());

    let mobile = &results.reports["mobile"];
    let env = mobile.outcome(profiles::ENVIRONMENT_STEP).unwrap();
    assert!(matches!(
        env.status,
        StepStatus::Failed {
            kind: FailureKind::Environment,
            ..
        }
    ));
    assert!(mobile.outcome("stats").map_or(false, |o| !o.status.is_passed()));
}

#[tokio::test]
async fn test_cancelled_run_does_not_pass() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let results = run_fanscout(FakeApp::default(), alex(), dir.path(), cancel).await;

    assert!(!results.summary.passed);
    assert!(results.summary.cancelled);
}

#[tokio::test]
async fn test_http_suite_against_mock_server() {
    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"token":"tok-1","user":{"email":"alex@example.com"}}"#)
        .create_async()
        .await;
    let _stats = server
        .mock("GET", "/api/portfolio/stats")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"data":{"totalValue":980.5,"isPublic":false}}"#)
        .create_async()
        .await;
    let _privacy = server
        .mock("PUT", "/api/portfolio/privacy")
        .match_body(mockito::Matcher::Json(json!({"isPublic": false})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true}"#)
        .create_async()
        .await;
    let _following = server
        .mock("GET", "/api/leaderboard/following")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"data":[]}"#)
        .create_async()
        .await;

    let yaml = format!(
        r#"
name: http smoke
apiUrl: {}
credentials:
  identifier: alex@example.com
  secret: ${{PASSWORD}}
env:
  PASSWORD: password123
steps:
  - name: stats
    fetchStats:
    expect:
      - fieldType: {{ path: data.totalValue, kind: number }}
      - fieldType: {{ path: data.isPublic, kind: boolean }}
  - name: go private
    setPrivacy: private
  - name: read back
    fetchStats:
    dependsOn: go private
    expect:
      - readBack: {{ path: data.isPublic, flag: isPublic }}
  - name: following
    fetchRankedList: following
    expect:
      - rankedList: {{ allowEmpty: true }}
"#,
        server.url()
    );
    let suite = parse_suite_content(&yaml).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let results = run_suite(&suite, &config(dir.path()), &[], EventEmitter::default(), CancelToken::new())
        .await
        .unwrap();

    assert!(results.summary.passed, "{}", crate::report::render(&results.summary));
    let report = &results.reports["desktop"];
    assert_eq!(report.outcomes.len(), 5);
    assert!(report.outcome("read back").unwrap().status.is_passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_step_timeout_overrides_default() {

    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"token":"tok-1"}"#)
        .create_async()
        .await;
    let _stats = server
        .mock("GET", "/api/portfolio/stats")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_millis(800));
            w.write_all(br#"{"success":true,"data":{"totalValue":1.0,"isPublic":true}}"#)
        })
        .create_async()
        .await;

    let yaml = format!(
        r#"
name: slow api
apiUrl: {}
credentials: {{ identifier: alex@example.com, secret: password123 }}
steps:
  - name: patient stats
    fetchStats:
    timeoutMs: 5000
  - name: impatient stats
    fetchStats:
    timeoutMs: 100
    soft: true
"#,
        server.url()
    );
    let suite = parse_suite_content(&yaml).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        default_timeout_ms: 300,
        ..config(dir.path())
    };

    let results = run_suite(&suite, &config, &[], EventEmitter::default(), CancelToken::new())
        .await
        .unwrap();

    let report = &results.reports["desktop"];
    assert!(
        report.outcome("patient stats").unwrap().status.is_passed(),
        "{}",
        crate::report::render(&results.summary)
    );
    let impatient = report.outcome("impatient stats").unwrap();
    match &impatient.status {
        StepStatus::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(impatient.error().unwrap().contains("100ms"));
    assert!(results.summary.passed);
}
