use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Endpoint paths and envelope pointers of the application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiLayout {
    pub login_path: String,
    /// Request body key carrying the identifier (e.g. "email")
    pub identifier_field: String,
    /// Request body key carrying the secret
    pub secret_field: String,
    pub stats_path: String,
    /// `{kind}` is replaced with the requested list kind
    pub ranked_list_path: String,
    /// Flag name -> endpoint accepting `{ <flag>: bool }` via PUT
    pub flags: HashMap<String, String>,
    pub success_pointer: String,
    pub message_pointer: String,
    pub token_pointer: String,
    pub user_pointer: String,
    pub expires_in_pointer: String,
    pub list_pointer: String,
    /// When set, the web environment also stores the token in localStorage
    pub token_storage_key: Option<String>,
}

impl Default for ApiLayout {
    fn default() -> Self {
        let mut flags = HashMap::new();
        flags.insert("isPublic".to_string(), "/api/portfolio/privacy".to_string());

        Self {
            login_path: "/api/auth/login".to_string(),
            identifier_field: "email".to_string(),
            secret_field: "password".to_string(),
            stats_path: "/api/portfolio/stats".to_string(),
            ranked_list_path: "/api/leaderboard/{kind}".to_string(),
            flags,
            success_pointer: "/success".to_string(),
            message_pointer: "/message".to_string(),
            token_pointer: "/token".to_string(),
            user_pointer: "/user".to_string(),
            expires_in_pointer: "/expiresIn".to_string(),
            list_pointer: "/data".to_string(),
            token_storage_key: None,
        }
    }
}

/// Successful login payload
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: String,
    pub user: Value,
    /// Token lifetime in seconds, when the server reports one
    pub expires_in: Option<u64>,
}

/// Raw response of an API operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Explicit success indicator. `None` means the envelope is malformed.
    pub fn success(&self, pointer: &str) -> Option<bool> {
        lookup(&self.body, pointer).and_then(Value::as_bool)
    }

    pub fn message(&self, pointer: &str) -> Option<String> {
        lookup(&self.body, pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Read a value by JSON pointer (`/a/b`) or dot path (`a.b`)
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() || path == "$" || path == "." {
        return Some(value);
    }
    let pointer = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path.replace('.', "/"))
    };
    value.pointer(&pointer)
}

/// Short human-readable rendering of a JSON value for messages
pub fn describe(value: Option<&Value>) -> String {
    match value {
        None => "<missing>".to_string(),
        Some(Value::String(s)) => format!("\"{}\"", s),
        Some(v) => {
            let s = v.to_string();
            if s.len() > 120 {
                format!("{}...", &s[..s.char_indices().nth(117).map(|(i, _)| i).unwrap_or(s.len())])
            } else {
                s
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_paths() {
        let body = json!({"stats": {"totalValue": 12.5}, "success": true});
        assert_eq!(lookup(&body, "stats.totalValue"), Some(&json!(12.5)));
        assert_eq!(lookup(&body, "/stats/totalValue"), Some(&json!(12.5)));
        assert_eq!(lookup(&body, "$"), Some(&body));
        assert_eq!(lookup(&body, "stats.missing"), None);
    }

    #[test]
    fn test_success_indicator() {
        let ok = ApiResponse::new(200, json!({"success": true, "data": []}));
        assert_eq!(ok.success("/success"), Some(true));

        let malformed = ApiResponse::new(200, json!({"data": []}));
        assert_eq!(malformed.success("/success"), None);

        let as_string = ApiResponse::new(200, json!({"success": "true"}));
        assert_eq!(as_string.success("/success"), None);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(None), "<missing>");
        assert_eq!(describe(Some(&json!("x"))), "\"x\"");
        assert_eq!(describe(Some(&json!(false))), "false");
    }
}
