use super::types::{EnvironmentProfile, Suite, SuiteHeader, UiExpectations, Viewport};
use crate::driver::traits::Selector;
use crate::runner::step::{Action, Criticality, Expectation, FlowStep, ValueKind};
use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const ACTION_KEYS: &[&str] = &[
    "fetchStats",
    "fetchRankedList",
    "setFlag",
    "setPrivacy",
    "apiRequest",
    "navigate",
    "fill",
    "click",
    "check",
    "assertUiState",
    "wait",
];

/// Parse a YAML suite file
pub fn parse_suite_file(path: &Path) -> Result<Suite> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read suite file: {}", path.display()))?;

    parse_suite_content(&content)
        .with_context(|| format!("Invalid suite file: {}", path.display()))
}

/// Parse YAML suite content
pub fn parse_suite_content(content: &str) -> Result<Suite> {
    let root: Value = serde_yaml::from_str(content).context("Failed to parse YAML")?;
    let map = root
        .as_mapping()
        .context("Suite must be a mapping with at least a `steps` list")?;

    let header: SuiteHeader =
        serde_yaml::from_value(root.clone()).context("Failed to parse suite header")?;

    let profiles = match get(map, "profiles") {
        Some(value) => parse_profiles(value)?,
        None => vec![EnvironmentProfile::desktop("desktop")],
    };

    let mut ui = UiExpectations::default();
    if let Some(value) = get(map, "affordances") {
        let affordances = value.as_mapping().context("`affordances` must be a mapping")?;
        for (name, selector) in affordances {
            let name = key_str(name)?;
            let selector = parse_selector(selector)
                .with_context(|| format!("Invalid selector for affordance '{}'", name))?;
            ui.affordances.insert(name, selector);
        }
    }
    if let Some(value) = get(map, "expectedUi") {
        ui.expected = parse_expected_ui(value, &profiles, &ui)?;
    }

    let steps = match get(map, "steps") {
        Some(value) => parse_steps(value)?,
        None => bail!("Suite has no `steps`"),
    };
    validate_ui_steps(&steps, &ui)?;

    Ok(Suite {
        name: header.name.clone().unwrap_or_else(|| "suite".to_string()),
        header,
        profiles,
        ui,
        steps,
    })
}

fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(&Value::String(key.to_string()))
}

fn key_str(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => bail!("Expected a string key, found {:?}", other),
    }
}

fn as_string(value: &Value, what: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => bail!("`{}` must be a string", what),
    }
}

/// A single item or a list of items
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Sequence(seq) => seq.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn parse_profiles(value: &Value) -> Result<Vec<EnvironmentProfile>> {
    let mut profiles = Vec::new();
    let mut seen = HashSet::new();

    for item in as_list(value) {
        let profile = match item {
            Value::String(name) => EnvironmentProfile::preset(name, name)
                .with_context(|| format!("Unknown profile preset '{}'", name))?,
            Value::Mapping(map) => parse_profile_map(map)?,
            _ => bail!("A profile must be a preset name or a mapping"),
        };
        if !seen.insert(profile.id.clone()) {
            bail!("Duplicate profile id '{}'", profile.id);
        }
        profiles.push(profile);
    }

    if profiles.is_empty() {
        bail!("`profiles` must declare at least one profile");
    }
    Ok(profiles)
}

fn parse_profile_map(map: &Mapping) -> Result<EnvironmentProfile> {
    let id = get(map, "id")
        .map(|v| as_string(v, "id"))
        .transpose()?
        .context("Profile is missing `id`")?;

    let Some(preset) = get(map, "preset") else {
        return serde_yaml::from_value(Value::Mapping(map.clone()))
            .with_context(|| format!("Invalid profile '{}'", id));
    };

    let preset = as_string(preset, "preset")?;
    let mut profile = EnvironmentProfile::preset(&preset, &id)
        .with_context(|| format!("Unknown profile preset '{}'", preset))?;

    // Explicit keys refine the preset
    if let Some(v) = get(map, "viewport") {
        profile.viewport = serde_yaml::from_value::<Viewport>(v.clone())
            .with_context(|| format!("Invalid viewport for profile '{}'", id))?;
    }
    if let Some(v) = get(map, "deviceScaleFactor").and_then(Value::as_f64) {
        profile.device_scale_factor = Some(v);
    }
    if let Some(v) = get(map, "isMobile").and_then(Value::as_bool) {
        profile.is_mobile = v;
    }
    if let Some(v) = get(map, "hasTouch").and_then(Value::as_bool) {
        profile.has_touch = v;
    }
    if let Some(v) = get(map, "userAgent").and_then(Value::as_str) {
        profile.user_agent = Some(v.to_string());
    }
    if let Some(v) = get(map, "capabilities") {
        for flag in as_list(v) {
            profile.capabilities.insert(as_string(flag, "capabilities")?);
        }
    }
    Ok(profile)
}

fn parse_expected_ui(
    value: &Value,
    profiles: &[EnvironmentProfile],
    ui: &UiExpectations,
) -> Result<BTreeMap<String, BTreeMap<String, Vec<Expectation>>>> {
    let map = value.as_mapping().context("`expectedUi` must be a mapping")?;
    let mut expected = BTreeMap::new();

    for (profile_id, states) in map {
        let profile_id = key_str(profile_id)?;
        if !profiles.iter().any(|p| p.id == profile_id) {
            bail!("`expectedUi` refers to unknown profile '{}'", profile_id);
        }

        let states = states
            .as_mapping()
            .with_context(|| format!("`expectedUi.{}` must be a mapping", profile_id))?;
        let mut per_affordance = BTreeMap::new();
        for (name, exps) in states {
            let name = key_str(name)?;
            if ui.affordance(&name).is_none() {
                bail!("`expectedUi.{}` refers to unknown affordance '{}'", profile_id, name);
            }
            let exps = parse_expectations(exps)
                .with_context(|| format!("Invalid expectation for {}.{}", profile_id, name))?;
            per_affordance.insert(name, exps);
        }
        expected.insert(profile_id, per_affordance);
    }

    Ok(expected)
}

fn parse_steps(value: &Value) -> Result<Vec<FlowStep>> {
    let items = value.as_sequence().context("`steps` must be a list")?;
    let mut steps: Vec<FlowStep> = Vec::with_capacity(items.len());
    let mut names = HashSet::new();

    for (i, item) in items.iter().enumerate() {
        let mut step = parse_step(item).with_context(|| format!("Invalid step #{}", i + 1))?;

        for dep in &step.depends_on {
            if !names.contains(dep) {
                bail!(
                    "Step '{}' depends on '{}', which is not an earlier step",
                    step.name,
                    dep
                );
            }
        }

        if !names.insert(step.name.clone()) {
            if get_name(item).is_some() {
                bail!("Duplicate step name '{}'", step.name);
            }
            // Unnamed steps are named after their action; disambiguate
            step.name = format!("{} #{}", step.name, i + 1);
            names.insert(step.name.clone());
        }
        steps.push(step);
    }

    Ok(steps)
}

fn get_name(item: &Value) -> Option<&Value> {
    item.as_mapping().and_then(|m| get(m, "name"))
}

/// Parse one step mapping
pub fn parse_step(value: &Value) -> Result<FlowStep> {
    let map = value.as_mapping().context("A step must be a mapping")?;

    let mut found: Vec<&str> = ACTION_KEYS
        .iter()
        .copied()
        .filter(|key| get(map, key).is_some())
        .collect();
    let key = match found.len() {
        0 => bail!("Step has no action (one of: {})", ACTION_KEYS.join(", ")),
        1 => found.remove(0),
        _ => bail!("Step has more than one action: {}", found.join(", ")),
    };
    let params = get(map, key).cloned().unwrap_or(Value::Null);
    let action = parse_action(key, &params)
        .with_context(|| format!("Invalid `{}` parameters", key))?;

    let name = match get(map, "name") {
        Some(v) => as_string(v, "name")?,
        None => action.display_name(),
    };
    let mut step = FlowStep::new(&name, action);

    if let Some(v) = get(map, "expect") {
        step.expect = parse_expectations(v)?;
    }

    if get(map, "soft").and_then(Value::as_bool) == Some(true) {
        step.criticality = Criticality::Soft;
    }
    if let Some(v) = get(map, "criticality") {
        step.criticality = serde_yaml::from_value(v.clone())
            .context("`criticality` must be `hard` or `soft`")?;
    }

    if let Some(v) = get(map, "dependsOn") {
        for dep in as_list(v) {
            step.depends_on.push(as_string(dep, "dependsOn")?);
        }
    }

    if let Some(v) = get(map, "timeoutMs").or_else(|| get(map, "timeout")) {
        step.timeout_ms = Some(v.as_u64().context("`timeoutMs` must be a number")?);
    }

    if let Some(v) = get(map, "saveAs") {
        step.save_as = Some(as_string(v, "saveAs")?);
    }

    Ok(step)
}

fn parse_action(key: &str, params: &Value) -> Result<Action> {
    let action = match key {
        "fetchStats" => Action::FetchStats,

        "fetchRankedList" => match params {
            Value::String(kind) => Action::FetchRankedList {
                kind: kind.clone(),
                limit: 10,
            },
            Value::Mapping(map) => Action::FetchRankedList {
                kind: get(map, "kind")
                    .map(|v| as_string(v, "kind"))
                    .transpose()?
                    .context("`kind` is required")?,
                limit: match get(map, "limit") {
                    Some(v) => v
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .context("`limit` must be a number that fits in 32 bits")?,
                    None => 10,
                },
            },
            _ => bail!("expected a list kind or {{kind, limit}}"),
        },

        "setFlag" => {
            let map = params.as_mapping().context("expected {flag, value}")?;
            Action::SetFlag {
                flag: get(map, "flag")
                    .map(|v| as_string(v, "flag"))
                    .transpose()?
                    .context("`flag` is required")?,
                value: get(map, "value")
                    .and_then(Value::as_bool)
                    .context("`value` must be a boolean")?,
            }
        }

        "setPrivacy" => {
            let public = match params {
                Value::String(s) if s.eq_ignore_ascii_case("public") => true,
                Value::String(s) if s.eq_ignore_ascii_case("private") => false,
                Value::Mapping(map) => get(map, "isPublic")
                    .and_then(Value::as_bool)
                    .context("`isPublic` must be a boolean")?,
                _ => bail!("expected `public`, `private` or {{isPublic: bool}}"),
            };
            Action::SetFlag {
                flag: "isPublic".to_string(),
                value: public,
            }
        }

        "apiRequest" => {
            let map = params.as_mapping().context("expected {method, path, body}")?;
            let method = get(map, "method")
                .map(|v| as_string(v, "method"))
                .transpose()?
                .unwrap_or_else(|| "GET".to_string())
                .to_uppercase();
            let path = get(map, "path")
                .or_else(|| get(map, "url"))
                .map(|v| as_string(v, "path"))
                .transpose()?
                .context("`path` is required")?;
            let body = get(map, "body")
                .map(|v| serde_yaml::from_value::<serde_json::Value>(v.clone()))
                .transpose()
                .context("`body` must be JSON-compatible")?;
            Action::ApiRequest { method, path, body }
        }

        "navigate" => match params {
            Value::String(url) => Action::Navigate(url.clone()),
            Value::Mapping(map) => Action::Navigate(
                get(map, "url")
                    .map(|v| as_string(v, "url"))
                    .transpose()?
                    .context("`url` is required")?,
            ),
            _ => bail!("expected a URL or path"),
        },

        "fill" => {
            let map = params.as_mapping().context("expected {selector, text}")?;
            let selector = get(map, "selector").context("`selector` is required")?;
            Action::Fill {
                selector: parse_selector(selector)?,
                text: get(map, "text")
                    .map(|v| as_string(v, "text"))
                    .transpose()?
                    .context("`text` is required")?,
            }
        }

        "click" => Action::Click(parse_selector(params)?),
        "check" => Action::Check(parse_selector(params)?),

        "assertUiState" => {
            let names = as_list(params)
                .into_iter()
                .map(|v| as_string(v, "assertUiState"))
                .collect::<Result<Vec<_>>>()?;
            Action::AssertUiState(names)
        }

        "wait" => Action::Wait(params.as_u64().context("expected milliseconds")?),

        other => bail!("Unknown action '{}'", other),
    };

    Ok(action)
}

/// Parse a selector: a plain string is CSS
pub fn parse_selector(value: &Value) -> Result<Selector> {
    let map = match value {
        Value::String(css) => return Ok(Selector::Css(css.clone())),
        Value::Mapping(map) => map,
        _ => bail!("A selector must be a CSS string or a mapping"),
    };

    let kinds: [(&str, fn(String) -> Selector); 6] = [
        ("css", Selector::Css),
        ("text", Selector::Text),
        ("testId", Selector::TestId),
        ("role", Selector::Role),
        ("placeholder", Selector::Placeholder),
        ("xpath", Selector::XPath),
    ];

    let mut selector = None;
    for (key, build) in kinds {
        if let Some(v) = get(map, key) {
            if selector.is_some() {
                bail!("A selector must use exactly one of css/text/testId/role/placeholder/xpath");
            }
            selector = Some(build(as_string(v, key)?));
        }
    }
    let selector =
        selector.context("A selector needs one of css/text/testId/role/placeholder/xpath")?;

    match get(map, "index") {
        Some(v) => {
            let index = v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .context("`index` must be an integer that fits in 32 bits")?;
            Ok(selector.nth(index))
        }
        None => Ok(selector),
    }
}

fn parse_expectations(value: &Value) -> Result<Vec<Expectation>> {
    as_list(value).into_iter().map(parse_expectation).collect()
}

/// Parse one expectation
pub fn parse_expectation(value: &Value) -> Result<Expectation> {
    if let Value::String(name) = value {
        return match name.as_str() {
            "visible" => Ok(Expectation::Visible),
            "absent" | "notVisible" => Ok(Expectation::Absent),
            "rankedList" => Ok(Expectation::RankedList { allow_empty: false }),
            other => bail!("Unknown expectation '{}'", other),
        };
    }

    let map = value.as_mapping().context("An expectation must be a name or a mapping")?;
    if map.len() != 1 {
        bail!("An expectation mapping must have exactly one key");
    }
    let (key, params) = map
        .iter()
        .next()
        .context("An expectation mapping must have exactly one key")?;
    let key = key_str(key)?;

    let exp = match key.as_str() {
        "fieldType" => {
            let m = params.as_mapping().context("expected {path, kind}")?;
            let path = required_str(m, "path")?;
            let kind = required_str(m, "kind")?;
            Expectation::FieldType {
                path,
                kind: ValueKind::parse(&kind)
                    .with_context(|| format!("Unknown value kind '{}'", kind))?,
            }
        }

        "fieldEquals" => {
            let m = params.as_mapping().context("expected {path, value}")?;
            let value = get(m, "value").context("`value` is required")?;
            Expectation::FieldEquals {
                path: required_str(m, "path")?,
                value: serde_yaml::from_value(value.clone())
                    .context("`value` must be JSON-compatible")?,
            }
        }

        "readBack" => match params {
            Value::String(flag) => Expectation::ReadBack {
                path: flag.clone(),
                flag: flag.clone(),
            },
            Value::Mapping(m) => {
                let flag = required_str(m, "flag")?;
                let path = match get(m, "path") {
                    Some(v) => as_string(v, "path")?,
                    None => flag.clone(),
                };
                Expectation::ReadBack { path, flag }
            }
            _ => bail!("`readBack` expects a flag name or {{path, flag}}"),
        },

        "rankedList" => {
            let allow_empty = match params {
                Value::Mapping(m) => get(m, "allowEmpty").and_then(Value::as_bool).unwrap_or(false),
                Value::Null => false,
                _ => bail!("`rankedList` expects {{allowEmpty: bool}}"),
            };
            Expectation::RankedList { allow_empty }
        }

        "visible" => match params.as_bool() {
            Some(false) => Expectation::Absent,
            _ => Expectation::Visible,
        },
        "absent" => match params.as_bool() {
            Some(false) => Expectation::Visible,
            _ => Expectation::Absent,
        },

        "count" => Expectation::Count(
            params
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .context("`count` must be a non-negative number")?,
        ),
        "textEquals" | "text" => Expectation::TextEquals(as_string(params, "textEquals")?),
        "textContains" => Expectation::TextContains(as_string(params, "textContains")?),
        "hasClass" => Expectation::HasClass(as_string(params, "hasClass")?),

        "byProfile" => {
            let m = params
                .as_mapping()
                .context("`byProfile` expects profile -> expectations")?;
            let mut per_profile = BTreeMap::new();
            for (profile, exps) in m {
                per_profile.insert(key_str(profile)?, parse_expectations(exps)?);
            }
            Expectation::ByProfile(per_profile)
        }

        other => bail!("Unknown expectation '{}'", other),
    };

    Ok(exp)
}

fn required_str(map: &Mapping, key: &str) -> Result<String> {
    get(map, key)
        .map(|v| as_string(v, key))
        .transpose()?
        .with_context(|| format!("`{}` is required", key))
}

fn validate_ui_steps(steps: &[FlowStep], ui: &UiExpectations) -> Result<()> {
    for step in steps {
        if let Action::AssertUiState(names) = &step.action {
            for name in names {
                if ui.affordance(name).is_none() {
                    bail!(
                        "Step '{}' asserts unknown affordance '{}'",
                        step.name,
                        name
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUITE: &str = r#"
name: fanscout smoke
apiUrl: http://localhost:3000
credentials:
  identifier: alex@example.com
  secret: ${FANSCOUT_PASSWORD}
sessionPolicy: shared
profiles:
  - mobile
  - id: desktop
    preset: desktop
    capabilities: [wideLayout]
affordances:
  tabBar: { testId: mobile-tab-bar }
  tabItems: "[data-testid=mobile-tab-bar] a"
  sidebar: nav.sidebar
expectedUi:
  mobile:
    tabBar: visible
    tabItems: { count: 5 }
  desktop:
    tabBar: absent
    sidebar: visible
steps:
  - name: stats
    fetchStats:
    expect:
      - fieldType: { path: totalValue, kind: number }
  - name: go private
    setPrivacy: private
  - name: read back
    fetchStats:
    dependsOn: go private
    expect:
      - readBack: isPublic
  - name: following
    fetchRankedList: { kind: following, limit: 5 }
    soft: true
    expect:
      - rankedList: { allowEmpty: true }
  - assertUiState: [tabBar, sidebar]
  - name: last message
    check: { css: .message, index: -1 }
    expect:
      - textEquals: Test message
"#;

    #[test]
    fn test_parse_suite() {
        let suite = parse_suite_content(SUITE).unwrap();
        assert_eq!(suite.name, "fanscout smoke");
        assert_eq!(suite.profiles.len(), 2);
        assert!(suite.profiles[0].is_mobile);
        assert!(suite.profiles[1].has_capability("wideLayout"));
        assert_eq!(suite.steps.len(), 6);
        assert!(suite.steps.iter().any(|s| s.action.is_ui()));

        assert_eq!(
            suite.steps[1].action,
            Action::SetFlag {
                flag: "isPublic".into(),
                value: false
            }
        );
        assert_eq!(suite.steps[2].depends_on, vec!["go private".to_string()]);
        assert_eq!(suite.steps[3].criticality, Criticality::Soft);
        assert_eq!(suite.steps[4].name, "assertUiState [tabBar, sidebar]");
        assert_eq!(
            suite.steps[5].action,
            Action::Check(Selector::css(".message").last())
        );

        let mobile = suite.ui.for_profile("mobile").unwrap();
        assert_eq!(mobile["tabItems"], vec![Expectation::Count(5)]);
        assert_eq!(
            suite.ui.affordance("tabBar"),
            Some(&Selector::TestId("mobile-tab-bar".into()))
        );
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let yaml = r#"
steps:
  - name: read back
    fetchStats:
    dependsOn: never declared
"#;
        let err = parse_suite_content(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("not an earlier step"));
    }

    #[test]
    fn test_expected_ui_for_unknown_profile_is_rejected() {
        let yaml = r#"
profiles: [mobile]
affordances:
  tabBar: .tabs
expectedUi:
  tablet:
    tabBar: visible
steps:
  - assertUiState: tabBar
"#;
        let err = parse_suite_content(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown profile 'tablet'"));
    }

    #[test]
    fn test_step_with_two_actions_is_rejected() {
        let yaml = r#"
steps:
  - fetchStats:
    wait: 10
"#;
        let err = parse_suite_content(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("more than one action"));
    }

    #[test]
    fn test_unnamed_duplicate_steps_are_disambiguated() {
        let yaml = r#"
steps:
  - fetchStats:
  - fetchStats:
"#;
        let suite = parse_suite_content(yaml).unwrap();
        assert_eq!(suite.steps[0].name, "fetchStats");
        assert_eq!(suite.steps[1].name, "fetchStats #2");
        assert_eq!(suite.profiles[0].id, "desktop");
    }

    #[test]
    fn test_parse_expectations() {
        let value: Value = serde_yaml::from_str(
            r#"
byProfile:
  mobile: [visible, { count: 5 }]
  default: absent
"#,
        )
        .unwrap();
        let exp = parse_expectation(&value).unwrap();
        match exp {
            Expectation::ByProfile(map) => {
                assert_eq!(map["mobile"], vec![Expectation::Visible, Expectation::Count(5)]);
                assert_eq!(map["default"], vec![Expectation::Absent]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let value: Value =
            serde_yaml::from_str("fieldEquals: { path: user.email, value: alex@example.com }")
                .unwrap();
        assert_eq!(
            parse_expectation(&value).unwrap(),
            Expectation::FieldEquals {
                path: "user.email".into(),
                value: json!("alex@example.com"),
            }
        );
    }

    #[test]
    fn test_parse_api_request_body() {
        let value: Value = serde_yaml::from_str(
            r#"
name: send
apiRequest:
  method: post
  path: /api/messages
  body: { text: Test message }
"#,
        )
        .unwrap();
        let step = parse_step(&value).unwrap();
        assert_eq!(
            step.action,
            Action::ApiRequest {
                method: "POST".into(),
                path: "/api/messages".into(),
                body: Some(json!({"text": "Test message"})),
            }
        );
    }

    #[test]
    fn test_oversized_numbers_are_rejected() {
        let step = |yaml: &str| parse_step(&serde_yaml::from_str::<Value>(yaml).unwrap());

        let err = step("name: leaders\nfetchRankedList: { kind: following, limit: 4294967296 }")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("`limit`"));

        let err = step("name: last\ncheck: { css: .message, index: -2147483649 }").unwrap_err();
        assert!(format!("{:#}", err).contains("`index`"));

        let ok = step("name: last\ncheck: { css: .message, index: -1 }").unwrap();
        assert_eq!(ok.action, Action::Check(Selector::css(".message").nth(-1)));
    }
}
