// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-phase state: the host's key/value store and what the setup phase
//! hands to the post phase.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::debug;

use crate::announce::escape_data;
use crate::error::TetherError;
use crate::shell::ShellCommand;

pub const KEY_IS_POST: &str = "isPost";
pub const KEY_MESSAGE: &str = "message";
pub const KEY_TMATE: &str = "tmate";

/// Key/value store that survives from the main step to the post step.
pub trait StateStore: Send + Sync {
    fn save(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn get(&self, key: &str) -> Option<String>;
}

/// The runner's state mechanism.
///
/// Writes append to the `GITHUB_STATE` file (or fall back to the
/// `::save-state` command). Reads prefer the `STATE_<key>` variables the
/// runner exports to the post step, then the file itself.
#[derive(Debug, Clone, Default)]
pub struct GithubState {
    file: Option<PathBuf>,
}

impl GithubState {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self { file }
    }

    fn read_file(&self, key: &str) -> Option<String> {
        let path = self.file.as_ref()?;
        let contents = std::fs::read_to_string(path).ok()?;
        parse_state_file(&contents).into_iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl StateStore for GithubState {
    fn save(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let Some(ref path) = self.file else {
            println!("::save-state name={key}::{}", escape_data(value));
            return Ok(());
        };
        let delimiter = heredoc_delimiter();
        if value.contains(&delimiter) {
            anyhow::bail!("state value for {key} contains the delimiter {delimiter}");
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening state file {}", path.display()))?;
        write!(file, "{key}<<{delimiter}\n{value}\n{delimiter}\n")
            .with_context(|| format!("writing state file {}", path.display()))?;
        debug!(key, "saved state");
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("STATE_{key}")).ok().or_else(|| self.read_file(key))
    }
}

fn heredoc_delimiter() -> String {
    let nanos =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
    format!("ghadelimiter_{}_{nanos}", std::process::id())
}

/// Parse `key=value` lines and `key<<DELIM` heredoc blocks, in file order.
pub fn parse_state_file(contents: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = contents.lines();
    while let Some(line) = lines.next() {
        if let Some((key, delimiter)) = line.split_once("<<") {
            let mut body = Vec::new();
            for inner in lines.by_ref() {
                if inner == delimiter {
                    break;
                }
                body.push(inner);
            }
            entries.push((key.to_owned(), body.join("\n")));
        } else if let Some((key, value)) = line.split_once('=') {
            entries.push((key.to_owned(), value.to_owned()));
        }
    }
    entries
}

/// Record that any later invocation is the post step.
pub fn mark_post(store: &dyn StateStore) -> anyhow::Result<()> {
    store.save(KEY_IS_POST, "true")
}

/// What a detached setup leaves behind for the post step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseState {
    /// Announcement re-printed on every post-phase tick.
    pub message: String,
    /// Command that kills the session on cancellation.
    pub teardown: ShellCommand,
}

impl PhaseState {
    pub fn save(&self, store: &dyn StateStore) -> anyhow::Result<()> {
        store.save(KEY_MESSAGE, &self.message)?;
        store.save(KEY_TMATE, &serde_json::to_string(&self.teardown)?)?;
        Ok(())
    }

    /// `None` when setup never reached the detached hand-off.
    pub fn load(store: &dyn StateStore) -> Result<Option<Self>, TetherError> {
        let Some(raw) = store.get(KEY_TMATE).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let teardown = serde_json::from_str(&raw)
            .map_err(|e| TetherError::State(format!("malformed {KEY_TMATE} entry: {e}")))?;
        let message = store.get(KEY_MESSAGE).unwrap_or_default();
        Ok(Some(Self { message, teardown }))
    }
}

/// Which half of the job lifecycle this invocation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Setup,
    /// Post step; `None` when the main step did not detach.
    PostCleanup(Option<PhaseState>),
}

impl Phase {
    pub fn load(store: &dyn StateStore) -> Result<Self, TetherError> {
        if store.get(KEY_IS_POST).as_deref() != Some("true") {
            return Ok(Self::Setup);
        }
        Ok(Self::PostCleanup(PhaseState::load(store)?))
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
