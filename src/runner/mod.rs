pub mod assertions;
pub mod cancel;
pub mod context;
pub mod events;
pub mod executor;
pub mod profiles;
pub mod state;
pub mod step;

#[cfg(test)]
mod scenarios;

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::api::{ApiBackend, HttpApiClient};
use crate::driver::{default_environment, EnvironmentFactory, EnvironmentSettings};
use crate::parser::types::{EnvironmentProfile, Suite};
use crate::report::{Reporter, RunResults};
use crate::session::{session_factory, Credentials};
use crate::utils::Config;

pub use cancel::CancelToken;
pub use context::FlowContext;
pub use events::{ConsoleEventListener, EventEmitter, RunEvent};
pub use executor::{ExecutorOptions, FlowExecutor};
pub use profiles::ProfileRunner;
pub use state::*;

/// Suite header values with `${var}` references resolved
struct ResolvedTargets {
    api_url: String,
    base_url: Option<String>,
    credentials: Credentials,
}

fn resolve_targets(suite: &Suite) -> Result<ResolvedTargets> {
    let ctx = FlowContext::new(suite.header.env.clone());

    let api_url = suite
        .header
        .api_url
        .as_deref()
        .map(|url| ctx.substitute_vars(url))
        .context("Suite header has no apiUrl")?;

    let credentials = match &suite.header.credentials {
        Some(c) => Credentials::new(
            &ctx.substitute_vars(&c.identifier),
            &ctx.substitute_vars(&c.secret),
        ),
        None => {
            warn!("Suite '{}' declares no credentials", suite.name);
            Credentials::new("", "")
        }
    };

    Ok(ResolvedTargets {
        api_url,
        base_url: suite.header.base_url.as_deref().map(|u| ctx.substitute_vars(u)),
        credentials,
    })
}

/// Run a suite against the HTTP API and the compiled-in UI environment
pub async fn run_suite(
    suite: &Suite,
    config: &Config,
    only_profiles: &[String],
    emitter: EventEmitter,
    cancel: CancelToken,
) -> Result<RunResults> {
    let targets = resolve_targets(suite)?;
    let api: Arc<dyn ApiBackend> = Arc::new(HttpApiClient::new(
        &targets.api_url,
        suite.header.api.clone(),
        config.default_timeout_ms,
    )?);
    let environments = default_environment(EnvironmentSettings {
        headless: config.headless,
        base_url: targets.base_url.clone(),
        token_storage_key: suite.header.api.token_storage_key.clone(),
    });

    let profiles = suite.select_profiles(only_profiles);
    if profiles.is_empty() {
        anyhow::bail!(
            "No profiles match {:?} (suite declares: {})",
            only_profiles,
            suite
                .profiles
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let results = run_suite_with(
        suite,
        config,
        &profiles,
        targets.credentials,
        api,
        environments.clone(),
        emitter,
        cancel,
    )
    .await;

    if let Err(e) = environments.shutdown().await {
        warn!("UI environment shutdown failed: {:#}", e);
    }
    Ok(results)
}

/// Run a suite with explicit collaborators
#[allow(clippy::too_many_arguments)]
pub async fn run_suite_with(
    suite: &Suite,
    config: &Config,
    profiles: &[EnvironmentProfile],
    credentials: Credentials,
    api: Arc<dyn ApiBackend>,
    environments: Arc<dyn EnvironmentFactory>,
    emitter: EventEmitter,
    cancel: CancelToken,
) -> RunResults {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    info!(
        "Run {} of '{}' across {} profile(s)",
        run_id,
        suite.name,
        profiles.len()
    );
    emitter.emit(RunEvent::RunStarted {
        run_id: run_id.clone(),
        suite: suite.name.clone(),
        profiles: profiles.iter().map(|p| p.id.clone()).collect(),
    });

    let mut options = ExecutorOptions::from_layout(&suite.header.api, config.default_timeout_ms);
    options.snapshot_on_failure = config.snapshot_on_failure;

    let sessions = session_factory(config.session_policy, api.clone(), credentials);
    let runner = ProfileRunner::new(
        suite.steps.clone(),
        suite.ui.clone(),
        api,
        sessions,
        environments,
        options,
    )
    .with_env(suite.header.env.clone())
    .with_emitter(emitter.clone())
    .with_cancel(cancel)
    .parallel(config.parallel);

    let reports = runner.run_across_profiles(profiles).await;
    let results = Reporter::for_output(&config.output_dir).finalize(
        &run_id,
        &suite.name,
        reports,
        started.elapsed().as_millis() as u64,
    );

    emitter.emit(RunEvent::RunFinished {
        passed: results.summary.passed,
        degraded: results.summary.degraded,
    });
    results
}
