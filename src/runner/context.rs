use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").expect("valid regex"))
}

/// Mutable state of one profile run
///
/// Holds variables saved by steps, the last value written to each flag
/// (for read-back checks) and the last API response (for diagnostics).
/// Never shared between profile runs.
#[derive(Debug, Default)]
pub struct FlowContext {
    /// Variables from the suite's `env` block
    pub env: HashMap<String, String>,

    /// Values saved by steps (`saveAs`)
    pub vars: HashMap<String, String>,

    /// Flag name -> last value written in this run
    written_flags: HashMap<String, Value>,

    /// Body of the most recent API response
    pub last_response: Option<Value>,
}

impl FlowContext {
    pub fn new(env: HashMap<String, String>) -> Self {
        Self {
            env,
            ..Self::default()
        }
    }

    /// Get a variable from vars, env or the process environment
    pub fn get_var(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| self.env.get(name).cloned())
            .or_else(|| std::env::var(name).ok())
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    /// Remember a successful write of a persisted flag
    pub fn record_write(&mut self, flag: &str, value: Value) {
        self.written_flags.insert(flag.to_string(), value);
    }

    pub fn last_written(&self, flag: &str) -> Option<&Value> {
        self.written_flags.get(flag)
    }

    /// Substitute `${name}` or `${name.json.path}` patterns in a string.
    /// Unknown variables are left untouched.
    pub fn substitute_vars(&self, text: &str) -> String {
        var_pattern()
            .replace_all(text, |caps: &regex::Captures| {
                let full_key = &caps[1];

                if let Some(val) = self.get_var(full_key) {
                    return val;
                }

                match full_key {
                    "timestamp" => return chrono::Utc::now().timestamp().to_string(),
                    "date" => return chrono::Local::now().format("%Y-%m-%d").to_string(),
                    _ => {}
                }

                // name.path: read into a saved JSON value
                if let Some((var_name, json_path)) = full_key.split_once('.') {
                    if let Some(json_str) = self.get_var(var_name) {
                        if let Ok(value) = serde_json::from_str::<Value>(&json_str) {
                            let pointer = format!("/{}", json_path.replace('.', "/"));
                            if let Some(target) = value.pointer(&pointer) {
                                return match target.as_str() {
                                    Some(s) => s.to_string(),
                                    None => target.to_string(),
                                };
                            }
                        }
                    }
                }

                format!("${{{}}}", full_key)
            })
            .to_string()
    }

    /// Substitute variables in every string of a JSON value
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute_vars(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.substitute_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
