//! Remote API collaborator
//!
//! The engine never interprets application payloads beyond the response
//! envelope. Everything else is read through JSON pointers configured in
//! [`ApiLayout`].

pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::AuthFailure;
use crate::session::Credentials;

pub use client::HttpApiClient;
pub use types::{ApiLayout, ApiResponse, LoginGrant};

/// Request/response operations the verification flows call into
#[async_trait]
pub trait ApiBackend: Send + Sync {
    /// Exchange credentials for a token. Exactly one remote call, no retry.
    async fn login(&self, credentials: &Credentials) -> std::result::Result<LoginGrant, AuthFailure>;

    /// Retrieve the account's resource statistics
    async fn fetch_stats(&self, token: &str) -> Result<ApiResponse>;

    /// Retrieve a ranked list (leaderboard) of the given kind
    async fn fetch_ranked_list(&self, token: &str, kind: &str, limit: u32) -> Result<ApiResponse>;

    /// Mutate a persisted boolean flag
    async fn set_flag(&self, token: &str, flag: &str, value: bool) -> Result<ApiResponse>;

    /// Free-form authenticated request relative to the API base URL
    async fn request(
        &self,
        token: &str,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse>;
}
