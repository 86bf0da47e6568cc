// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::options;
use crate::platform::Platform;

/// Debug-session orchestrator for CI runners, built on tmate.
///
/// Action inputs arrive as `INPUT_<NAME>` variables; every input can also be
/// passed as a flag of the same name.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
pub struct Config {
    /// Custom tmate server host.
    #[arg(long, env = "INPUT_TMATE-SERVER-HOST", default_value = "")]
    pub tmate_server_host: String,

    /// Custom tmate server port (default 22 when a host is set).
    #[arg(long, env = "INPUT_TMATE-SERVER-PORT", default_value = "")]
    pub tmate_server_port: String,

    /// RSA fingerprint of the custom tmate server.
    #[arg(long, env = "INPUT_TMATE-SERVER-RSA-FINGERPRINT", default_value = "")]
    pub tmate_server_rsa_fingerprint: String,

    /// Ed25519 fingerprint of the custom tmate server.
    #[arg(long, env = "INPUT_TMATE-SERVER-ED25519-FINGERPRINT", default_value = "")]
    pub tmate_server_ed25519_fingerprint: String,

    /// Install tmate and its dependencies (true or false).
    #[arg(long, env = "INPUT_INSTALL-DEPENDENCIES", default_value = "")]
    pub install_dependencies: String,

    /// Only admit the actor's registered SSH keys (true, false or auto).
    #[arg(long, env = "INPUT_LIMIT-ACCESS-TO-ACTOR", default_value = "")]
    pub limit_access_to_actor: String,

    /// Hand the session to the post step instead of waiting here.
    #[arg(long, env = "INPUT_DETACHED", default_value = "")]
    pub detached: String,

    /// How long the post step waits for a first client.
    #[arg(long, env = "INPUT_CONNECT-TIMEOUT-SECONDS", default_value = "")]
    pub connect_timeout_seconds: String,

    /// End the session once every client has disconnected.
    #[arg(long, env = "INPUT_CHECK-NUM-CLIENTS", default_value = "")]
    pub check_num_clients: String,

    /// Run Linux package installs through sudo.
    #[arg(long, env = "INPUT_SUDO", default_value = "")]
    pub sudo: String,

    /// Workspace root; `<workspace>/continue` ends the session.
    #[arg(long, env = "GITHUB_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Identity whose public keys may connect in restricted mode.
    #[arg(long, env = "GITHUB_ACTOR", default_value = "")]
    pub actor: String,

    /// File backing the cross-step state store.
    #[arg(long, env = "GITHUB_STATE")]
    pub state_file: Option<PathBuf>,

    /// Base URL of the GitHub REST API.
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Home directory holding `.ssh`.
    #[arg(long, env = "HOME")]
    pub home: Option<PathBuf>,

    /// Override the tmate control socket path.
    #[arg(long, env = "TETHER_SOCKET", hide = true)]
    pub socket: Option<PathBuf>,

    /// Override the scratch directory for the rc file and downloads.
    #[arg(long, env = "TETHER_TMP_DIR", hide = true)]
    pub tmp_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TETHER_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TETHER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub poll_interval_ms: Option<u64>,
    #[clap(skip)]
    pub shutdown_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    ///
    /// Action inputs are not checked here; they fail the run through the
    /// workflow error channel instead of as a usage error.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if self.poll_interval().is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }
        Ok(())
    }

    /// Raw value of a named action input; empty when not supplied.
    pub fn input(&self, name: &str) -> String {
        let value = match name {
            options::TMATE_SERVER_HOST => &self.tmate_server_host,
            options::TMATE_SERVER_PORT => &self.tmate_server_port,
            options::TMATE_SERVER_RSA_FINGERPRINT => &self.tmate_server_rsa_fingerprint,
            options::TMATE_SERVER_ED25519_FINGERPRINT => &self.tmate_server_ed25519_fingerprint,
            options::INSTALL_DEPENDENCIES => &self.install_dependencies,
            options::LIMIT_ACCESS_TO_ACTOR => &self.limit_access_to_actor,
            options::DETACHED => &self.detached,
            options::CONNECT_TIMEOUT_SECONDS => &self.connect_timeout_seconds,
            options::CHECK_NUM_CLIENTS => &self.check_num_clients,
            options::SUDO => &self.sudo,
            _ => return String::new(),
        };
        value.trim().to_owned()
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_default().join(".ssh")
    }

    pub fn tmp_dir(&self, platform: Platform) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(|| platform.tmp_dir())
    }

    pub fn socket_path(&self, platform: Platform) -> PathBuf {
        self.socket.clone().unwrap_or_else(|| platform.socket_path())
    }

    duration_field!(poll_interval, poll_interval_ms, "TETHER_POLL_INTERVAL_MS", 5_000);
    duration_field!(shutdown_timeout, shutdown_timeout_ms, "TETHER_SHUTDOWN_TIMEOUT_MS", 10_000);

    /// Build a minimal `Config` for tests (no inputs, fast polling).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            tmate_server_host: String::new(),
            tmate_server_port: String::new(),
            tmate_server_rsa_fingerprint: String::new(),
            tmate_server_ed25519_fingerprint: String::new(),
            install_dependencies: String::new(),
            limit_access_to_actor: String::new(),
            detached: String::new(),
            connect_timeout_seconds: String::new(),
            check_num_clients: String::new(),
            sudo: String::new(),
            workspace: None,
            actor: "octocat".into(),
            state_file: None,
            api_url: "https://api.github.com".into(),
            home: None,
            socket: None,
            tmp_dir: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            poll_interval_ms: Some(10),
            shutdown_timeout_ms: Some(1_000),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
