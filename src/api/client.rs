//! HTTP implementation of [`ApiBackend`] on top of reqwest

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

use super::types::{lookup, ApiLayout, ApiResponse, LoginGrant};
use super::ApiBackend;
use crate::error::AuthFailure;
use crate::session::Credentials;

/// Step requests carry no client-side deadline: the executor bounds each
/// step by its own limit. Only login, which runs outside any step, is given
/// `login_timeout`.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    layout: ApiLayout,
    login_timeout: Duration,
}

impl HttpApiClient {
    pub fn new(base_url: &str, layout: ApiLayout, login_timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            layout,
            login_timeout: Duration::from_millis(login_timeout_ms),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let res = req.send().await.context("Failed to send request")?;
        let status = res.status().as_u16();
        let text = res.text().await.context("Failed to read response body")?;

        // Non-JSON bodies are kept as strings so the envelope check can
        // report them as malformed instead of failing transport.
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!("HTTP {} -> {}", status, body);
        Ok(ApiResponse::new(status, body))
    }
}

#[async_trait]
impl ApiBackend for HttpApiClient {
    async fn login(&self, credentials: &Credentials) -> std::result::Result<LoginGrant, AuthFailure> {
        let url = self.url(&self.layout.login_path);
        let mut body = serde_json::Map::new();
        body.insert(
            self.layout.identifier_field.clone(),
            Value::String(credentials.identifier.clone()),
        );
        body.insert(
            self.layout.secret_field.clone(),
            Value::String(credentials.secret.clone()),
        );

        debug!("POST {} (login as {})", url, credentials.identifier);
        let response = self
            .send(
                self.client
                    .post(&url)
                    .timeout(self.login_timeout)
                    .json(&Value::Object(body)),
            )
            .await
            .map_err(|e| AuthFailure::Transport(format!("{:#}", e)))?;

        match response.success(&self.layout.success_pointer) {
            Some(true) => {}
            Some(false) => {
                let message = response
                    .message(&self.layout.message_pointer)
                    .unwrap_or_else(|| format!("HTTP {}", response.status));
                return Err(AuthFailure::Rejected { message });
            }
            None => {
                let message = response.message(&self.layout.message_pointer).unwrap_or_else(|| {
                    format!("HTTP {} without success indicator", response.status)
                });
                return Err(AuthFailure::Rejected { message });
            }
        }

        let token = lookup(&response.body, &self.layout.token_pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if token.is_empty() {
            return Err(AuthFailure::MissingToken);
        }

        Ok(LoginGrant {
            token,
            user: lookup(&response.body, &self.layout.user_pointer)
                .cloned()
                .unwrap_or(Value::Null),
            expires_in: lookup(&response.body, &self.layout.expires_in_pointer)
                .and_then(Value::as_u64),
        })
    }

    async fn fetch_stats(&self, token: &str) -> Result<ApiResponse> {
        let url = self.url(&self.layout.stats_path);
        debug!("GET {}", url);
        self.send(self.client.get(&url).bearer_auth(token)).await
    }

    async fn fetch_ranked_list(&self, token: &str, kind: &str, limit: u32) -> Result<ApiResponse> {
        let url = self.url(&self.layout.ranked_list_path.replace("{kind}", kind));
        debug!("GET {}?limit={}", url, limit);
        self.send(
            self.client
                .get(&url)
                .query(&[("limit", limit.to_string())])
                .bearer_auth(token),
        )
        .await
    }

    async fn set_flag(&self, token: &str, flag: &str, value: bool) -> Result<ApiResponse> {
        let path = self
            .layout
            .flags
            .get(flag)
            .with_context(|| format!("No endpoint configured for flag '{}'", flag))?;
        let url = self.url(path);
        debug!("PUT {} {{{}: {}}}", url, flag, value);
        self.send(
            self.client
                .put(&url)
                .bearer_auth(token)
                .json(&json!({ flag: value })),
        )
        .await
    }

    async fn request(
        &self,
        token: &str,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let method = method
            .to_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {}", method))?;
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut req = self.client.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req).await
    }
}
