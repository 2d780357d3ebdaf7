//! Session management
//!
//! A [`Session`] is the authenticated context every dependent step runs
//! under. [`SessionController`] creates it through the remote API with a
//! single login call; [`SessionFactory`] decides whether profiles share one
//! session or each establish their own.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::api::ApiBackend;
use crate::error::AuthFailure;
use crate::parser::types::EnvironmentProfile;

/// Identifier + secret pair
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identifier: &str, secret: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.identifier.trim().is_empty() && !self.secret.is_empty()
    }
}

// Keep secrets out of logs and debug dumps
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

/// An authenticated context
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub identifier: String,
    token: String,
    pub user: Value,
    pub established_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(identifier: &str, token: &str, user: Value, expires_in: Option<u64>) -> Self {
        let established_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            token: token.to_string(),
            user,
            established_at,
            expires_at: expires_in.map(|secs| established_at + Duration::seconds(secs as i64)),
        }
    }

    /// Opaque token attached to every dependent operation
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at.map_or(true, |exp| now < exp)
    }

    /// Fails with [`AuthFailure::Expired`] when the session may not be used
    pub fn ensure_valid(&self) -> Result<(), AuthFailure> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AuthFailure::Expired)
        }
    }
}

/// Establishes and holds at most one live session per run
pub struct SessionController {
    api: Arc<dyn ApiBackend>,
    live: Option<Session>,
}

impl SessionController {
    pub fn new(api: Arc<dyn ApiBackend>) -> Self {
        Self { api, live: None }
    }

    /// Authenticate once. A failure is terminal: nothing is retried and no
    /// session is kept.
    pub async fn establish(&mut self, credentials: &Credentials) -> Result<Session, AuthFailure> {
        // Dropping the previous session first keeps "at most one live" true
        // even when the new attempt fails.
        self.live = None;

        if !credentials.is_valid() {
            warn!("Refusing to authenticate with empty credentials");
            return Err(AuthFailure::InvalidCredentials);
        }

        debug!("Authenticating {}", credentials.identifier);
        let grant = self.api.login(credentials).await?;
        if grant.token.is_empty() {
            return Err(AuthFailure::MissingToken);
        }

        let session = Session::new(
            &credentials.identifier,
            &grant.token,
            grant.user,
            grant.expires_in,
        );
        info!("Session {} established for {}", session.id, session.identifier);
        self.live = Some(session.clone());
        Ok(session)
    }

    pub fn live(&self) -> Option<&Session> {
        self.live.as_ref()
    }

    /// Logical end of the session
    pub fn end(&mut self) {
        if let Some(session) = self.live.take() {
            debug!("Session {} ended", session.id);
        }
    }
}

/// How profiles obtain their session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPolicy {
    /// A fresh login for every profile run
    #[default]
    PerProfile,
    /// One login shared by all profile runs
    Shared,
}

/// Hands each profile run a session before any dependent step executes
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn session_for(&self, profile: &EnvironmentProfile) -> Result<Session, AuthFailure>;

    /// End of run. Sessions handed out so far must not be reused afterwards.
    async fn end_run(&self) {}
}

/// Establishes a new session for each profile
pub struct PerProfileSessions {
    api: Arc<dyn ApiBackend>,
    credentials: Credentials,
}

impl PerProfileSessions {
    pub fn new(api: Arc<dyn ApiBackend>, credentials: Credentials) -> Self {
        Self { api, credentials }
    }
}

#[async_trait]
impl SessionFactory for PerProfileSessions {
    async fn session_for(&self, profile: &EnvironmentProfile) -> Result<Session, AuthFailure> {
        debug!("Establishing session for profile {}", profile.id);
        let mut controller = SessionController::new(self.api.clone());
        controller.establish(&self.credentials).await
    }
}

/// Establishes one session lazily and hands clones of it to every profile.
/// A failed login is remembered so every profile reports the same failure.
pub struct SharedSession {
    controller: Mutex<SessionController>,
    credentials: Credentials,
    cell: OnceCell<Result<Session, AuthFailure>>,
    ended: AtomicBool,
}

impl SharedSession {
    pub fn new(api: Arc<dyn ApiBackend>, credentials: Credentials) -> Self {
        Self {
            controller: Mutex::new(SessionController::new(api)),
            credentials,
            cell: OnceCell::new(),
            ended: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionFactory for SharedSession {
    async fn session_for(&self, _profile: &EnvironmentProfile) -> Result<Session, AuthFailure> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(AuthFailure::Expired);
        }
        let result = self
            .cell
            .get_or_init(|| async {
                let mut controller = self.controller.lock().await;
                controller.establish(&self.credentials).await
            })
            .await;

        let session = result.clone()?;
        session.ensure_valid()?;
        Ok(session)
    }

    async fn end_run(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.controller.lock().await.end();
    }
}

/// Build the factory for a policy
pub fn session_factory(
    policy: SessionPolicy,
    api: Arc<dyn ApiBackend>,
    credentials: Credentials,
) -> Arc<dyn SessionFactory> {
    match policy {
        SessionPolicy::PerProfile => Arc::new(PerProfileSessions::new(api, credentials)),
        SessionPolicy::Shared => Arc::new(SharedSession::new(api, credentials)),
    }
}
