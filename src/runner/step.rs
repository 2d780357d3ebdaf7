//! Flow step model
//!
//! A step is data: what to do ([`Action`]), what the outcome must look like
//! ([`Expectation`]) and how much a failure matters ([`Criticality`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::driver::traits::Selector;

/// Hard failures abort the remaining steps of the profile run, soft ones
/// are recorded and execution continues.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    #[default]
    Hard,
    Soft,
}

/// JSON value kinds for type expectations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Boolean,
    String,
    Array,
    Object,
    Null,
}

impl ValueKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "number" | "numeric" => Some(ValueKind::Number),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            "string" => Some(ValueKind::String),
            "array" | "list" => Some(ValueKind::Array),
            "object" | "map" => Some(ValueKind::Object),
            "null" => Some(ValueKind::Null),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
            ValueKind::Null => value.is_null(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Null => "null",
        };
        f.write_str(s)
    }
}

/// Operation a step performs against the session
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Read the account's resource statistics
    FetchStats,
    /// Read a ranked list of the given kind
    FetchRankedList { kind: String, limit: u32 },
    /// Write a persisted boolean flag
    SetFlag { flag: String, value: bool },
    /// Free-form authenticated API call
    ApiRequest {
        method: String,
        path: String,
        body: Option<Value>,
    },
    Navigate(String),
    Fill { selector: Selector, text: String },
    Click(Selector),
    /// Observe one element and assert on it
    Check(Selector),
    /// Assert the active profile's expected UI state for the named
    /// affordances (all declared ones when empty)
    AssertUiState(Vec<String>),
    Wait(u64),
}

impl Action {
    pub fn is_ui(&self) -> bool {
        matches!(
            self,
            Action::Navigate(_)
                | Action::Fill { .. }
                | Action::Click(_)
                | Action::Check(_)
                | Action::AssertUiState(_)
        )
    }

    pub fn display_name(&self) -> String {
        match self {
            Action::FetchStats => "fetchStats".to_string(),
            Action::FetchRankedList { kind, limit } => {
                format!("fetchRankedList {} (limit {})", kind, limit)
            }
            Action::SetFlag { flag, value } => format!("setFlag {}={}", flag, value),
            Action::ApiRequest { method, path, .. } => format!("apiRequest {} {}", method, path),
            Action::Navigate(target) => format!("navigate {}", target),
            Action::Fill { selector, text } => format!("fill {} \"{}\"", selector, text),
            Action::Click(selector) => format!("click {}", selector),
            Action::Check(selector) => format!("check {}", selector),
            Action::AssertUiState(names) if names.is_empty() => "assertUiState".to_string(),
            Action::AssertUiState(names) => format!("assertUiState [{}]", names.join(", ")),
            Action::Wait(ms) => format!("wait {}ms", ms),
        }
    }
}

/// Predicate over a step's observed outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Field at `path` has the given JSON kind
    FieldType { path: String, kind: ValueKind },
    /// Field at `path` equals `value`
    FieldEquals { path: String, value: Value },
    /// Field at `path` equals the last value written to `flag` in this run
    ReadBack { path: String, flag: String },
    /// The configured list pointer holds an array. An empty array is a
    /// valid, successful answer when `allow_empty` is set.
    RankedList { allow_empty: bool },
    Visible,
    Absent,
    Count(usize),
    TextEquals(String),
    TextContains(String),
    HasClass(String),
    /// Profile id (or "default") -> expectations for that profile
    ByProfile(BTreeMap<String, Vec<Expectation>>),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::FieldType { path, kind } => write!(f, "{} is {}", path, kind),
            Expectation::FieldEquals { path, value } => write!(f, "{} == {}", path, value),
            Expectation::ReadBack { path, flag } => {
                write!(f, "{} reads back last written {}", path, flag)
            }
            Expectation::RankedList { allow_empty: true } => write!(f, "ranked list (may be empty)"),
            Expectation::RankedList { allow_empty: false } => write!(f, "non-empty ranked list"),
            Expectation::Visible => write!(f, "visible"),
            Expectation::Absent => write!(f, "absent"),
            Expectation::Count(n) => write!(f, "count == {}", n),
            Expectation::TextEquals(t) => write!(f, "text == \"{}\"", t),
            Expectation::TextContains(t) => write!(f, "text contains \"{}\"", t),
            Expectation::HasClass(c) => write!(f, "has class \"{}\"", c),
            Expectation::ByProfile(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                write!(f, "by profile [{}]", keys.join(", "))
            }
        }
    }
}

/// One ordered unit of verification work
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStep {
    pub name: String,
    pub action: Action,
    pub expect: Vec<Expectation>,
    pub criticality: Criticality,
    /// Names of earlier steps whose outcome this step relies on
    pub depends_on: Vec<String>,
    pub timeout_ms: Option<u64>,
    /// Store the observed value under this variable name
    pub save_as: Option<String>,
}

impl FlowStep {
    pub fn new(name: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            action,
            expect: Vec::new(),
            criticality: Criticality::Hard,
            depends_on: Vec::new(),
            timeout_ms: None,
            save_as: None,
        }
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    pub fn soft(mut self) -> Self {
        self.criticality = Criticality::Soft;
        self
    }

    pub fn depends_on(mut self, step: &str) -> Self {
        self.depends_on.push(step.to_string());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn save_as(mut self, var: &str) -> Self {
        self.save_as = Some(var.to_string());
        self
    }
}
