pub mod traits;
#[cfg(feature = "web")]
pub mod web;

use std::sync::Arc;

pub use traits::{EnvironmentFactory, Selector, UiDriver, UnavailableEnvironment};

/// Settings needed to build the UI environment for a run
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSettings {
    pub headless: bool,
    pub base_url: Option<String>,
    pub token_storage_key: Option<String>,
}

/// The environment factory compiled into this build
pub fn default_environment(settings: EnvironmentSettings) -> Arc<dyn EnvironmentFactory> {
    #[cfg(feature = "web")]
    {
        Arc::new(web::WebEnvironment::new(web::WebConfig {
            headless: settings.headless,
            base_url: settings.base_url,
            token_storage_key: settings.token_storage_key,
        }))
    }
    #[cfg(not(feature = "web"))]
    {
        let _ = settings;
        Arc::new(UnavailableEnvironment)
    }
}
