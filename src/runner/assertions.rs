//! Expected-outcome predicates
//!
//! Steps produce an [`Observation`]; expectations are evaluated against it
//! under the active profile. The result is either a list of informational
//! notes (pass) or a [`VerifyError::Mismatch`] describing expected vs actual.

use serde_json::Value;

use super::context::FlowContext;
use super::step::Expectation;
use crate::api::types::{describe, lookup, ApiResponse};
use crate::error::VerifyError;
use crate::parser::types::EnvironmentProfile;

/// Observed state of one element
#[derive(Debug, Clone, PartialEq)]
pub struct ElementState {
    pub selector: String,
    pub visible: bool,
    pub count: usize,
    pub text: Option<String>,
    pub classes: Vec<String>,
}

/// Observed state of a named affordance with the expectations resolved for
/// the active profile
#[derive(Debug, Clone)]
pub struct AffordanceState {
    pub name: String,
    pub state: ElementState,
    pub expectations: Vec<Expectation>,
}

/// What a step's operation produced
#[derive(Debug, Clone)]
pub enum Observation {
    Api(ApiResponse),
    Element(ElementState),
    UiState(Vec<AffordanceState>),
    /// Actions without an observable result (navigate, click, ...)
    Done,
}

impl Observation {
    fn kind(&self) -> &'static str {
        match self {
            Observation::Api(_) => "API response",
            Observation::Element(_) => "element",
            Observation::UiState(_) => "UI state",
            Observation::Done => "action",
        }
    }

    /// Value stored by `saveAs`
    pub fn to_saved_value(&self) -> Option<String> {
        match self {
            Observation::Api(res) => Some(res.body.to_string()),
            Observation::Element(state) => state.text.clone(),
            _ => None,
        }
    }
}

/// Evaluates expectations for one profile run
pub struct Evaluator<'a> {
    pub profile: &'a EnvironmentProfile,
    pub context: &'a FlowContext,
    /// Pointer to the entries of ranked-list responses
    pub list_pointer: &'a str,
}

impl<'a> Evaluator<'a> {
    /// Check every expectation; all mismatches are reported together
    pub fn check_all(
        &self,
        expectations: &[Expectation],
        observation: &Observation,
    ) -> Result<Vec<String>, VerifyError> {
        let mut notes = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        if let Observation::UiState(affordances) = observation {
            for affordance in affordances {
                let element = Observation::Element(affordance.state.clone());
                for exp in &affordance.expectations {
                    match self.check(exp, &element) {
                        Ok(note) => notes.extend(note),
                        Err(VerifyError::Mismatch { expected, actual }) => failures.push((
                            format!("{}: {}", affordance.name, expected),
                            format!("{}: {}", affordance.name, actual),
                        )),
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        for exp in expectations {
            match self.check(exp, observation) {
                Ok(note) => notes.extend(note),
                Err(VerifyError::Mismatch { expected, actual }) => failures.push((expected, actual)),
                Err(other) => return Err(other),
            }
        }

        if failures.is_empty() {
            return Ok(notes);
        }
        let (expected, actual): (Vec<String>, Vec<String>) = failures.into_iter().unzip();
        Err(VerifyError::mismatch(expected.join("; "), actual.join("; ")))
    }

    /// Check one expectation. `Ok(Some(note))` is a pass with a note.
    pub fn check(
        &self,
        expectation: &Expectation,
        observation: &Observation,
    ) -> Result<Option<String>, VerifyError> {
        match (expectation, observation) {
            (Expectation::ByProfile(map), obs) => {
                let selected = map
                    .get(&self.profile.id)
                    .or_else(|| map.get("default"));
                match selected {
                    Some(exps) => {
                        let notes = self.check_all(exps, obs)?;
                        Ok(if notes.is_empty() {
                            None
                        } else {
                            Some(notes.join("; "))
                        })
                    }
                    // Same rule as assertUiState: an undeclared profile is a
                    // mismatch. `<profile>: []` opts a profile out explicitly.
                    None => Err(VerifyError::mismatch(
                        format!("expectation declared for profile '{}'", self.profile.id),
                        "none declared",
                    )),
                }
            }

            (Expectation::FieldType { path, kind }, Observation::Api(res)) => {
                let actual = lookup(&res.body, path);
                match actual {
                    Some(v) if kind.matches(v) => Ok(None),
                    other => Err(VerifyError::mismatch(
                        format!("{} to be a {}", path, kind),
                        describe(other),
                    )),
                }
            }

            (Expectation::FieldEquals { path, value }, Observation::Api(res)) => {
                let expected = self.context.substitute_value(value);
                let actual = lookup(&res.body, path);
                if actual == Some(&expected) {
                    Ok(None)
                } else {
                    Err(VerifyError::mismatch(
                        format!("{} == {}", path, expected),
                        describe(actual),
                    ))
                }
            }

            (Expectation::ReadBack { path, flag }, Observation::Api(res)) => {
                let written = self.context.last_written(flag).ok_or_else(|| {
                    VerifyError::mismatch(
                        format!("a prior write to '{}'", flag),
                        "no write recorded in this run",
                    )
                })?;
                let actual = lookup(&res.body, path);
                if actual == Some(written) {
                    Ok(None)
                } else {
                    Err(VerifyError::mismatch(
                        format!("{} == {} (last written {})", path, written, flag),
                        describe(actual),
                    ))
                }
            }

            (Expectation::RankedList { allow_empty }, Observation::Api(res)) => {
                match lookup(&res.body, self.list_pointer) {
                    Some(Value::Array(items)) if items.is_empty() => {
                        if *allow_empty {
                            Ok(Some("no entries returned; empty list accepted".to_string()))
                        } else {
                            Err(VerifyError::mismatch("non-empty ranked list", "empty list"))
                        }
                    }
                    Some(Value::Array(items)) => Ok(Some(format!("{} entries", items.len()))),
                    other => Err(VerifyError::mismatch(
                        format!("array at {}", self.list_pointer),
                        format!("malformed response: {}", describe(other)),
                    )),
                }
            }

            (Expectation::Visible, Observation::Element(el)) => {
                if el.visible {
                    Ok(None)
                } else {
                    Err(VerifyError::mismatch(
                        format!("{} visible", el.selector),
                        if el.count == 0 { "not found" } else { "hidden" },
                    ))
                }
            }

            (Expectation::Absent, Observation::Element(el)) => {
                if el.visible {
                    Err(VerifyError::mismatch(
                        format!("{} absent", el.selector),
                        "visible",
                    ))
                } else {
                    Ok(None)
                }
            }

            (Expectation::Count(n), Observation::Element(el)) => {
                if el.count == *n {
                    Ok(None)
                } else {
                    Err(VerifyError::mismatch(
                        format!("{} count == {}", el.selector, n),
                        el.count.to_string(),
                    ))
                }
            }

            (Expectation::TextEquals(text), Observation::Element(el)) => {
                let expected = self.context.substitute_vars(text);
                match el.text.as_deref().map(str::trim) {
                    Some(actual) if actual == expected => Ok(None),
                    actual => Err(VerifyError::mismatch(
                        format!("text of {} == \"{}\"", el.selector, expected),
                        actual.map_or("<no element>".to_string(), |t| format!("\"{}\"", t)),
                    )),
                }
            }

            (Expectation::TextContains(text), Observation::Element(el)) => {
                let expected = self.context.substitute_vars(text);
                match el.text.as_deref() {
                    Some(actual) if actual.contains(&expected) => Ok(None),
                    actual => Err(VerifyError::mismatch(
                        format!("text of {} contains \"{}\"", el.selector, expected),
                        actual.map_or("<no element>".to_string(), |t| format!("\"{}\"", t.trim())),
                    )),
                }
            }

            (Expectation::HasClass(class), Observation::Element(el)) => {
                if el.classes.iter().any(|c| c == class) {
                    Ok(None)
                } else {
                    Err(VerifyError::mismatch(
                        format!("{} has class \"{}\"", el.selector, class),
                        format!("[{}]", el.classes.join(" ")),
                    ))
                }
            }

            (exp, obs) => Err(VerifyError::mismatch(
                exp.to_string(),
                format!("expectation not applicable to {} observation", obs.kind()),
            )),
        }
    }
}
