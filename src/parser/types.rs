use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::api::ApiLayout;
use crate::driver::traits::Selector;
use crate::runner::step::{Expectation, FlowStep};
use crate::session::{Credentials, SessionPolicy};

/// A parsed verification suite
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub header: SuiteHeader,
    pub profiles: Vec<EnvironmentProfile>,
    pub ui: UiExpectations,
    pub steps: Vec<FlowStep>,
}

impl Suite {
    /// Profiles restricted to the given ids (all when `only` is empty)
    pub fn select_profiles(&self, only: &[String]) -> Vec<EnvironmentProfile> {
        self.profiles
            .iter()
            .filter(|p| only.is_empty() || only.iter().any(|id| id == &p.id))
            .cloned()
            .collect()
    }
}

/// Suite-level settings read with serde
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteHeader {
    #[serde(default)]
    pub name: Option<String>,

    /// Base URL of the remote API
    #[serde(default)]
    pub api_url: Option<String>,

    /// Base URL of the web application
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default, alias = "defaultTimeout")]
    pub default_timeout_ms: Option<u64>,

    #[serde(default)]
    pub session_policy: Option<SessionPolicy>,

    #[serde(default)]
    pub parallel: Option<bool>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub api: ApiLayout,
}

/// Viewport size in CSS pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A device/viewport class a flow is replayed under. Read-only template
/// data: execution never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentProfile {
    pub id: String,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub device_scale_factor: Option<f64>,
    #[serde(default)]
    pub is_mobile: bool,
    #[serde(default)]
    pub has_touch: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Extra capability flags, e.g. "narrowLayout"
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

impl EnvironmentProfile {
    /// Desktop-sized profile with no capability flags
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            viewport: Viewport::default(),
            device_scale_factor: None,
            is_mobile: false,
            has_touch: false,
            user_agent: None,
            capabilities: BTreeSet::new(),
        }
    }

    /// Phone-class profile (390x844, touch, narrow layout)
    pub fn mobile(id: &str) -> Self {
        let mut capabilities = BTreeSet::new();
        capabilities.insert("narrowLayout".to_string());
        Self {
            id: id.to_string(),
            viewport: Viewport {
                width: 390,
                height: 844,
            },
            device_scale_factor: Some(3.0),
            is_mobile: true,
            has_touch: true,
            user_agent: Some(MOBILE_USER_AGENT.to_string()),
            capabilities,
        }
    }

    /// Desktop-class profile (1280x800)
    pub fn desktop(id: &str) -> Self {
        Self {
            viewport: Viewport {
                width: 1280,
                height: 800,
            },
            ..Self::named(id)
        }
    }

    /// Resolve a preset name ("mobile", "tablet", "desktop")
    pub fn preset(preset: &str, id: &str) -> Option<Self> {
        match preset.to_lowercase().as_str() {
            "mobile" | "phone" => Some(Self::mobile(id)),
            "tablet" => Some(Self {
                viewport: Viewport {
                    width: 820,
                    height: 1180,
                },
                device_scale_factor: Some(2.0),
                has_touch: true,
                ..Self::named(id)
            }),
            "desktop" => Some(Self::desktop(id)),
            _ => None,
        }
    }

    /// Declared flags plus the ones implied by device emulation
    pub fn capability_flags(&self) -> BTreeSet<String> {
        let mut flags = self.capabilities.clone();
        if self.has_touch {
            flags.insert("touch".to_string());
        }
        if self.is_mobile {
            flags.insert("mobile".to_string());
        }
        flags
    }

    pub fn has_capability(&self, flag: &str) -> bool {
        self.capability_flags().contains(flag)
    }
}

/// Named UI affordances and the per-profile state they must be in
#[derive(Debug, Clone, Default)]
pub struct UiExpectations {
    /// Affordance name -> selector
    pub affordances: BTreeMap<String, Selector>,
    /// Profile id -> affordance name -> expectations
    pub expected: BTreeMap<String, BTreeMap<String, Vec<Expectation>>>,
}

impl UiExpectations {
    pub fn affordance(&self, name: &str) -> Option<&Selector> {
        self.affordances.get(name)
    }

    /// Expected state for a profile. There is no shared fallback: a profile
    /// without an entry has no expected UI state.
    pub fn for_profile(&self, profile_id: &str) -> Option<&BTreeMap<String, Vec<Expectation>>> {
        self.expected.get(profile_id)
    }
}
