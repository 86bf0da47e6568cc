// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level phase runner, shared by `main` and integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::announce::Stdout;
use crate::config::Config;
use crate::install::HttpDownloader;
use crate::keys::GithubKeys;
use crate::lifecycle::{Controller, Outcome, RunEnv, Services};
use crate::platform::Platform;
use crate::shell::ShellExecutor;
use crate::state::{GithubState, Phase, StateStore};
use crate::{http, signal};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Run whichever phase the state store says is next.
pub async fn run(config: Config) -> anyhow::Result<Outcome> {
    init_tracing(&config);

    let platform = Platform::current();
    let state: Arc<dyn StateStore> = Arc::new(GithubState::new(config.state_file.clone()));
    let phase = Phase::load(state.as_ref())?;
    debug!(?phase, %platform, "loaded phase");

    let controller = build_controller(&config, platform, state).await?;
    let inputs = |name: &str| config.input(name);

    match phase {
        Phase::Setup => controller.setup(inputs).await,
        Phase::PostCleanup(handoff) => {
            // Registered before the wait loop so cancellation is never missed.
            let shutdown = CancellationToken::new();
            let listener = signal::install(shutdown.clone());
            let outcome = controller.post(handoff, inputs, shutdown).await;
            listener.abort();
            outcome
        }
    }
}

async fn build_controller(
    config: &Config,
    platform: Platform,
    state: Arc<dyn StateStore>,
) -> anyhow::Result<Controller> {
    let client = http::client(HTTP_TIMEOUT)?;
    let services = Services {
        exec: Arc::new(ShellExecutor::new(platform)),
        console: Arc::new(Stdout),
        state,
        keys: Arc::new(GithubKeys::new(client.clone(), &config.api_url)),
        downloader: Arc::new(HttpDownloader::new(client)),
    };

    let os_release = match platform {
        Platform::Linux => tokio::fs::read_to_string("/etc/os-release").await.unwrap_or_default(),
        Platform::MacOs | Platform::Windows => String::new(),
    };
    let env = RunEnv {
        platform,
        actor: config.actor.clone(),
        ssh_dir: config.ssh_dir(),
        tmp_dir: config.tmp_dir(platform),
        socket: config.socket_path(platform),
        continue_markers: platform.continue_markers(config.workspace.as_deref()),
        os_release,
        arch: std::env::consts::ARCH.to_owned(),
    };
    info!(
        socket = %env.socket.display(),
        markers = ?env.continue_markers,
        "runner environment resolved"
    );

    Ok(Controller::new(services, env, config.poll_interval(), config.shutdown_timeout()))
}

/// Initialize tracing/logging from config.
///
/// Logs go to stderr; stdout carries the job log and workflow commands.
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}
