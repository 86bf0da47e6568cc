// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input validation for the action's named options.
//!
//! Patterns are deliberately loose: they only need to reject values that are
//! obviously malformed before anything is handed to tmate.

use std::time::Duration;

use regex::Regex;

use crate::error::TetherError;

pub const TMATE_SERVER_HOST: &str = "tmate-server-host";
pub const TMATE_SERVER_PORT: &str = "tmate-server-port";
pub const TMATE_SERVER_RSA_FINGERPRINT: &str = "tmate-server-rsa-fingerprint";
pub const TMATE_SERVER_ED25519_FINGERPRINT: &str = "tmate-server-ed25519-fingerprint";
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
pub const LIMIT_ACCESS_TO_ACTOR: &str = "limit-access-to-actor";
pub const DETACHED: &str = "detached";
pub const CONNECT_TIMEOUT_SECONDS: &str = "connect-timeout-seconds";
pub const CHECK_NUM_CLIENTS: &str = "check-num-clients";
pub const SUDO: &str = "sudo";

const BOOL: &str = r"(?i)^(true|false)$";

/// Option names and acceptance patterns, in validation order.
pub const RULES: &[(&str, &str)] = &[
    (TMATE_SERVER_HOST, r"^[a-zA-Z0-9\-\.]+$"),
    (TMATE_SERVER_PORT, r"^\d{1,5}$"),
    (TMATE_SERVER_RSA_FINGERPRINT, "."),
    (TMATE_SERVER_ED25519_FINGERPRINT, "."),
    (INSTALL_DEPENDENCIES, BOOL),
    (LIMIT_ACCESS_TO_ACTOR, r"(?i)^(true|false|auto)$"),
    (DETACHED, BOOL),
    (CONNECT_TIMEOUT_SECONDS, r"^[1-9]\d*$"),
    (CHECK_NUM_CLIENTS, BOOL),
    (SUDO, BOOL),
];

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_SERVER_PORT: &str = "22";

/// Validate one raw input. Empty means "not supplied" and always passes.
pub fn validate(name: &str, value: &str, pattern: &Regex) -> Result<String, TetherError> {
    if value.is_empty() || pattern.is_match(value) {
        return Ok(value.to_owned());
    }
    Err(TetherError::InvalidOption { name: name.to_owned(), value: value.to_owned() })
}

/// Who may connect to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// Anyone holding the connection string.
    #[default]
    Open,
    /// Only the actor's registered keys; missing keys fail the run.
    Restricted,
    /// Restrict when the actor has keys, otherwise warn and stay open.
    Auto,
}

impl std::str::FromStr for AccessMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "false" => Ok(Self::Open),
            "true" => Ok(Self::Restricted),
            "auto" => Ok(Self::Auto),
            other => anyhow::bail!("invalid access mode: {other}"),
        }
    }
}

/// Custom tmate server settings, applied only when a host is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOverrides {
    pub host: String,
    pub port: String,
    pub rsa_fingerprint: Option<String>,
    pub ed25519_fingerprint: Option<String>,
}

/// Polling parameters for the watch loop, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub check_client_count: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            check_client_count: true,
        }
    }
}

/// All options after validation, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOptions {
    pub server: Option<ServerOverrides>,
    pub install_dependencies: bool,
    pub access: AccessMode,
    pub detached: bool,
    pub connect_timeout: Duration,
    pub check_num_clients: bool,
    pub sudo: bool,
}

impl ValidatedOptions {
    /// Validate every known option, failing on the first invalid value.
    ///
    /// `input` maps an option name to its raw value (empty when unset).
    pub fn from_inputs(input: impl Fn(&str) -> String) -> anyhow::Result<Self> {
        let mut values = Vec::with_capacity(RULES.len());
        for (name, pattern) in RULES {
            let re = Regex::new(pattern)?;
            values.push((*name, validate(name, &input(name), &re)?));
        }
        let get = |name: &str| lookup(&values, name);
        let non_empty = |name: &str| {
            Some(lookup(&values, name)).filter(|v| !v.is_empty()).map(str::to_owned)
        };

        let server = non_empty(TMATE_SERVER_HOST).map(|host| ServerOverrides {
            host,
            port: non_empty(TMATE_SERVER_PORT).unwrap_or_else(|| DEFAULT_SERVER_PORT.to_owned()),
            rsa_fingerprint: non_empty(TMATE_SERVER_RSA_FINGERPRINT),
            ed25519_fingerprint: non_empty(TMATE_SERVER_ED25519_FINGERPRINT),
        });

        let connect_timeout = match get(CONNECT_TIMEOUT_SECONDS) {
            "" => DEFAULT_CONNECT_TIMEOUT,
            raw => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                TetherError::InvalidOption {
                    name: CONNECT_TIMEOUT_SECONDS.to_owned(),
                    value: raw.to_owned(),
                }
            })?,
        };

        Ok(Self {
            server,
            install_dependencies: !is_false(get(INSTALL_DEPENDENCIES)),
            access: get(LIMIT_ACCESS_TO_ACTOR).parse()?,
            detached: is_true(get(DETACHED)),
            connect_timeout,
            check_num_clients: !is_false(get(CHECK_NUM_CLIENTS)),
            sudo: !is_false(get(SUDO)),
        })
    }

    /// Derive the watch loop parameters.
    pub fn poll_config(&self, poll_interval: Duration) -> PollConfig {
        PollConfig {
            poll_interval,
            connect_timeout: self.connect_timeout,
            check_client_count: self.check_num_clients,
        }
    }
}

fn lookup<'a>(values: &'a [(&str, String)], name: &str) -> &'a str {
    values.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str()).unwrap_or_default()
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn is_false(value: &str) -> bool {
    value.eq_ignore_ascii_case("false")
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
