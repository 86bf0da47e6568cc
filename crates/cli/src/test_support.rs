// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted collaborators and assertion helpers.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::announce::Console;
use crate::error::CommandError;
use crate::install::{DownloadFuture, Downloader};
use crate::keys::{KeySource, KeysFuture};
use crate::shell::{ExecFuture, Executor, ShellCommand};
use crate::state::StateStore;

/// Scripted outcome for a matched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit 0 with this stdout.
    Ok(String),
    /// Non-zero exit with this code.
    Fail(i32),
    /// Never completes; only cancellation ends the call.
    Hang,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Ok(stdout.into())
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

struct Rule {
    needle: String,
    /// Popped front to back; the last reply repeats.
    replies: VecDeque<Reply>,
}

/// Executor that records every command and answers from a script.
///
/// Rules match when their needle is a substring of the rendered command; the
/// first matching rule wins. Unmatched commands succeed with empty stdout.
#[derive(Default)]
pub struct MockExecutor {
    rules: Mutex<Vec<Rule>>,
    hooks: Mutex<Vec<(String, Hook)>>,
    calls: Mutex<Vec<ShellCommand>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with `reply`.
    pub fn on(self, needle: &str, reply: Reply) -> Self {
        self.on_seq(needle, vec![reply])
    }

    /// Answer successive matching commands with `replies`, repeating the last.
    pub fn on_seq(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().push(Rule { needle: needle.to_owned(), replies: replies.into() });
        self
    }

    /// Run `hook` whenever a command containing `needle` is executed.
    pub fn hook(self, needle: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.lock().push((needle.to_owned(), Arc::new(hook)));
        self
    }

    pub fn calls(&self) -> Vec<ShellCommand> {
        self.calls.lock().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.calls.lock().iter().map(ShellCommand::render).collect()
    }

    /// Number of executed commands containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.rendered().iter().filter(|c| c.contains(needle)).count()
    }

    fn next_reply(&self, rendered: &str) -> Reply {
        let mut rules = self.rules.lock();
        let Some(rule) = rules.iter_mut().find(|r| rendered.contains(&r.needle)) else {
            return Reply::Ok(String::new());
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap_or(Reply::Ok(String::new()))
        } else {
            rule.replies.front().cloned().unwrap_or(Reply::Ok(String::new()))
        }
    }
}

impl Executor for MockExecutor {
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> ExecFuture<'a> {
        Box::pin(async move {
            let rendered = cmd.render();
            self.calls.lock().push(cmd.clone());
            let hooks: Vec<Hook> = self
                .hooks
                .lock()
                .iter()
                .filter(|(needle, _)| rendered.contains(needle.as_str()))
                .map(|(_, hook)| Arc::clone(hook))
                .collect();
            for hook in hooks {
                hook();
            }
            match self.next_reply(&rendered) {
                Reply::Ok(stdout) => Ok(stdout),
                Reply::Fail(code) => {
                    Err(CommandError::Failed { command: rendered, code: Some(code) })
                }
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

/// Console that keeps everything it is asked to print.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn joined(&self) -> String {
        self.lines.lock().join("\n")
    }
}

impl Console for RecordingConsole {
    fn emit(&self, text: &str) {
        self.lines.lock().push(text.to_owned());
    }
}

/// Key source answering every lookup with a fixed key list.
#[derive(Debug, Default)]
pub struct StaticKeys {
    keys: Vec<String>,
    lookups: Mutex<Vec<String>>,
}

impl StaticKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { keys: keys.into_iter().map(Into::into).collect(), lookups: Mutex::new(Vec::new()) }
    }

    /// Actors looked up so far.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

impl KeySource for StaticKeys {
    fn public_keys<'a>(&'a self, actor: &'a str) -> KeysFuture<'a> {
        Box::pin(async move {
            self.lookups.lock().push(actor.to_owned());
            Ok(self.keys.clone())
        })
    }
}

/// Downloader that writes placeholder bytes instead of fetching.
#[derive(Debug, Default)]
pub struct FakeDownloader {
    urls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl Downloader for FakeDownloader {
    fn download<'a>(&'a self, url: &'a str, dest: &'a Path) -> DownloadFuture<'a> {
        Box::pin(async move {
            self.urls.lock().push(url.to_owned());
            tokio::fs::write(dest, b"archive").await?;
            Ok(())
        })
    }
}

/// In-memory state store standing in for `GITHUB_STATE`.
#[derive(Debug, Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let values = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Self { values: Mutex::new(values) }
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().clone()
    }
}

impl StateStore for MemoryState {
    fn save(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
