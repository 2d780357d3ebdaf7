use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::parser::types::EnvironmentProfile;
use crate::session::Session;

/// Element selector for UI elements
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// CSS selector
    Css(String),
    /// Visible text
    Text(String),
    /// `data-testid` attribute
    TestId(String),
    /// ARIA role
    Role(String),
    /// Input placeholder
    Placeholder(String),
    /// XPath expression
    XPath(String),
    /// N-th match of another selector; negative indexes count from the end
    Nth { base: Box<Selector>, index: i32 },
}

impl Selector {
    pub fn css(css: &str) -> Self {
        Selector::Css(css.to_string())
    }

    pub fn nth(self, index: i32) -> Self {
        Selector::Nth {
            base: Box::new(self),
            index,
        }
    }

    pub fn last(self) -> Self {
        self.nth(-1)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "{}", s),
            Selector::Text(s) => write!(f, "text=\"{}\"", s),
            Selector::TestId(s) => write!(f, "testId={}", s),
            Selector::Role(s) => write!(f, "role={}", s),
            Selector::Placeholder(s) => write!(f, "placeholder=\"{}\"", s),
            Selector::XPath(s) => write!(f, "xpath={}", s),
            Selector::Nth { base, index } => write!(f, "{} >> nth={}", base, index),
        }
    }
}

/// UI automation primitives used by flow steps
///
/// One driver instance is bound to one environment profile (viewport,
/// device emulation) and one authenticated session. Drivers never decide
/// pass/fail; they only report what they observe.
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Profile this environment was opened for
    fn profile_id(&self) -> &str;

    /// Navigate to a URL or a path relative to the application base URL
    async fn navigate(&self, target: &str) -> Result<()>;

    /// Whether the first match of the selector is visible
    async fn is_visible(&self, selector: &Selector) -> Result<bool>;

    /// Number of visible elements matching the selector
    async fn count(&self, selector: &Selector) -> Result<usize>;

    /// Text content of the first match, `None` when nothing matches
    async fn text_content(&self, selector: &Selector) -> Result<Option<String>>;

    /// Class list of the first match, empty when nothing matches
    async fn class_list(&self, selector: &Selector) -> Result<Vec<String>>;

    /// Replace the value of an input
    async fn fill(&self, selector: &Selector, text: &str) -> Result<()>;

    /// Click the first match
    async fn click(&self, selector: &Selector) -> Result<()>;

    /// PNG screenshot of the current viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Current markup (HTML) of the page
    async fn dump_markup(&self) -> Result<String>;

    /// Tear the environment down
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructs a fresh, isolated UI environment per profile run
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    async fn open(
        &self,
        profile: &EnvironmentProfile,
        session: &Session,
    ) -> Result<Box<dyn UiDriver>>;

    /// Release shared resources (browser process) after all profiles ran
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory used when no UI backend is compiled in
pub struct UnavailableEnvironment;

#[async_trait]
impl EnvironmentFactory for UnavailableEnvironment {
    async fn open(
        &self,
        profile: &EnvironmentProfile,
        _session: &Session,
    ) -> Result<Box<dyn UiDriver>> {
        anyhow::bail!(
            "No UI environment available for profile '{}': flowcheck was built without the `web` feature",
            profile.id
        )
    }
}
