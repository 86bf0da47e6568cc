// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds surfaced by setup and the session lifecycle.
//!
//! Everything here is fatal for the run except where the watch loop swallows
//! a failed client-count query (see [`crate::watch`]).

use thiserror::Error;

/// Fatal errors reported through the host's failure channel.
#[derive(Debug, Error)]
pub enum TetherError {
    /// A user-supplied input did not match its acceptance pattern.
    #[error("Invalid value for '{name}': '{value}'")]
    InvalidOption { name: String, value: String },

    /// tmate failed to start or never reported ready.
    #[error("failed to launch tmate session: {0}")]
    Launch(#[source] CommandError),

    /// The platform installer failed.
    #[error("failed to install dependencies: {0}")]
    DependencyInstall(#[source] anyhow::Error),

    /// No usable public keys for the restricted-access identity.
    #[error("{0}")]
    IdentityLookup(String),

    /// Reading or writing the cross-phase state failed.
    #[error("phase state error: {0}")]
    State(String),
}

impl TetherError {
    /// Short machine-readable tag used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidOption { .. } => "invalid_option",
            Self::Launch(_) => "launch",
            Self::DependencyInstall(_) => "dependency_install",
            Self::IdentityLookup(_) => "identity_lookup",
            Self::State(_) => "state",
        }
    }
}

/// A shell command that could not be spawned or exited non-zero.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", describe_code(.code))]
    Failed { command: String, code: Option<i32> },
}

impl CommandError {
    /// The rendered command line that failed.
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. } | Self::Failed { command, .. } => command,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by signal)".to_owned(),
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
