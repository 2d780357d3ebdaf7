//! Web environment using Playwright
//!
//! One Chromium process is launched per run. Every profile gets its own
//! browser context, so cookies, storage and emulated device settings never
//! leak from one profile into another.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use playwright::api::{Browser, BrowserContext, Page, Viewport};
use playwright::Playwright;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, OnceCell};

use crate::driver::traits::{EnvironmentFactory, Selector, UiDriver};
use crate::parser::types::EnvironmentProfile;
use crate::session::Session;

/// Web environment configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub headless: bool,
    /// Application base URL for relative navigation
    pub base_url: Option<String>,
    /// When set, the session token is also written to localStorage under
    /// this key before any page script runs
    pub token_storage_key: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            headless: true,
            base_url: None,
            token_storage_key: None,
        }
    }
}

struct BrowserHandle {
    _playwright: Playwright,
    browser: Browser,
}

/// [`EnvironmentFactory`] backed by a shared Chromium instance
pub struct WebEnvironment {
    config: WebConfig,
    handle: OnceCell<BrowserHandle>,
}

impl WebEnvironment {
    pub fn new(config: WebConfig) -> Self {
        Self {
            config,
            handle: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<&Browser> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let playwright = Playwright::initialize()
                    .await
                    .context("Failed to initialize Playwright")?;
                let browser = launch_chromium_browser(&playwright, self.config.headless).await?;
                info!("Browser launched (headless: {})", self.config.headless);
                Ok::<_, anyhow::Error>(BrowserHandle {
                    _playwright: playwright,
                    browser,
                })
            })
            .await?;
        Ok(&handle.browser)
    }
}

#[async_trait]
impl EnvironmentFactory for WebEnvironment {
    async fn open(
        &self,
        profile: &EnvironmentProfile,
        session: &Session,
    ) -> Result<Box<dyn UiDriver>> {
        let browser = self.browser().await?;

        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", session.token()),
        );

        let mut builder = browser
            .context_builder()
            .viewport(Some(Viewport {
                width: profile.viewport.width as i32,
                height: profile.viewport.height as i32,
            }))
            .is_mobile(profile.is_mobile)
            .has_touch(profile.has_touch)
            .extra_http_headers(headers);
        if let Some(scale) = profile.device_scale_factor {
            builder = builder.device_scale_factor(scale);
        }
        if let Some(ref ua) = profile.user_agent {
            builder = builder.user_agent(ua);
        }
        let context = builder
            .build()
            .await
            .with_context(|| format!("Failed to create browser context for '{}'", profile.id))?;

        if let Some(ref key) = self.config.token_storage_key {
            let script = format!(
                "window.localStorage.setItem({}, {});",
                serde_json::to_string(key)?,
                serde_json::to_string(session.token())?
            );
            context.add_init_script(&script).await?;
        }

        let page = context.new_page().await?;
        debug!("Opened browser context for profile {}", profile.id);

        Ok(Box::new(WebDriver {
            profile_id: profile.id.clone(),
            base_url: self.config.base_url.clone(),
            context,
            page: Mutex::new(page),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.handle.get() {
            handle.browser.close().await?;
            debug!("Browser closed");
        }
        Ok(())
    }
}

/// Driver bound to one profile's browser context
pub struct WebDriver {
    profile_id: String,
    base_url: Option<String>,
    context: BrowserContext,
    page: Mutex<Page>,
}

impl WebDriver {
    fn resolve_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if let Some(ref base) = self.base_url {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                target.trim_start_matches('/')
            )
        } else {
            target.to_string()
        }
    }
}

/// Convert Selector to Playwright selector string
pub fn selector_to_playwright(selector: &Selector) -> String {
    match selector {
        Selector::Css(css) => css.clone(),
        Selector::Text(text) => format!("text=\"{}\"", text),
        Selector::TestId(id) => format!("[data-testid=\"{}\"]", id),
        Selector::Role(role) => format!("[role=\"{}\"]", role),
        Selector::Placeholder(p) => format!("[placeholder=\"{}\"]", p),
        Selector::XPath(xpath) => format!("xpath={}", xpath),
        Selector::Nth { base, index } => {
            format!("{} >> nth={}", selector_to_playwright(base), index)
        }
    }
}

#[async_trait]
impl UiDriver for WebDriver {
    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    async fn navigate(&self, target: &str) -> Result<()> {
        let url = self.resolve_url(target);
        let page = self.page.lock().await;
        page.goto_builder(&url)
            .goto()
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    async fn is_visible(&self, selector: &Selector) -> Result<bool> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        match page.query_selector(&sel).await? {
            Some(el) => Ok(el.is_visible().await?),
            None => Ok(false),
        }
    }

    async fn count(&self, selector: &Selector) -> Result<usize> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        let mut visible = 0;
        for el in page.query_selector_all(&sel).await? {
            if el.is_visible().await? {
                visible += 1;
            }
        }
        Ok(visible)
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        if page.query_selector(&sel).await?.is_none() {
            return Ok(None);
        }
        let js = "el => el.value || el.innerText || el.textContent || ''";
        let text = page
            .evaluate_on_selector::<String, _>(&sel, js, None::<String>)
            .await?;
        Ok(Some(text))
    }

    async fn class_list(&self, selector: &Selector) -> Result<Vec<String>> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        if page.query_selector(&sel).await?.is_none() {
            return Ok(Vec::new());
        }
        let classes = page
            .evaluate_on_selector::<Vec<String>, _>(&sel, "el => Array.from(el.classList)", None::<String>)
            .await?;
        Ok(classes)
    }

    async fn fill(&self, selector: &Selector, text: &str) -> Result<()> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        page.fill_builder(&sel, text)
            .fill()
            .await
            .with_context(|| format!("Failed to fill {}", sel))?;
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        let page = self.page.lock().await;
        let sel = selector_to_playwright(selector);
        page.click_builder(&sel)
            .click()
            .await
            .with_context(|| format!("Failed to click {}", sel))?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.page.lock().await;
        Ok(page.screenshot_builder().screenshot().await?)
    }

    async fn dump_markup(&self) -> Result<String> {
        let page = self.page.lock().await;
        Ok(page.content().await?)
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.context.close().await {
            warn!("[{}] closing browser context failed: {}", self.profile_id, e);
        }
        Ok(())
    }
}

/// Launch Chromium, preferring an explicit or system-installed executable
async fn launch_chromium_browser(playwright: &Playwright, headless: bool) -> Result<Browser> {
    let chromium = playwright.chromium();
    let mut launcher = chromium.launcher().headless(headless);

    let executable = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(find_system_browser);
    if let Some(ref path) = executable {
        debug!("Using browser executable {}", path.display());
        launcher = launcher.executable(path);
    }

    let args: Vec<String> = [
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    launcher = launcher.args(&args);

    launcher
        .launch()
        .await
        .context("Failed to launch Chromium")
}

fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    common_paths
        .iter()
        .map(std::path::Path::new)
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}
