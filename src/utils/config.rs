use std::path::PathBuf;

use crate::parser::types::SuiteHeader;
use crate::session::SessionPolicy;

/// Run configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Default per-step timeout (ms)
    pub default_timeout_ms: u64,

    /// Run profiles concurrently
    pub parallel: bool,

    /// Launch the browser without a window
    pub headless: bool,

    /// Capture a diagnostic snapshot when a step fails
    pub snapshot_on_failure: bool,

    /// Where results, reports and artifacts are written
    pub output_dir: PathBuf,

    pub session_policy: SessionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            parallel: false,
            headless: true,
            snapshot_on_failure: true,
            output_dir: PathBuf::from("flowcheck-output"),
            session_policy: SessionPolicy::PerProfile,
        }
    }
}

impl Config {
    /// Defaults overridden by `FLOWCHECK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("FLOWCHECK_HEADLESS") {
            config.headless = v == "true" || v == "1";
        }
        if let Some(ms) = lookup("FLOWCHECK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.default_timeout_ms = ms;
        }
        if let Some(dir) = lookup("FLOWCHECK_OUTPUT").filter(|v| !v.is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }

        config
    }

    /// Apply suite-level settings. CLI flags are applied afterwards by the
    /// caller and win over both.
    pub fn merge_suite(mut self, header: &SuiteHeader) -> Self {
        if let Some(ms) = header.default_timeout_ms {
            self.default_timeout_ms = ms;
        }
        if let Some(parallel) = header.parallel {
            self.parallel = parallel;
        }
        if let Some(policy) = header.session_policy {
            self.session_policy = policy;
        }
        self
    }
}
