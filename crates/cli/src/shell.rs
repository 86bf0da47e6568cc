// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured shell commands and the executor that runs them.
//!
//! Commands are an ordered token list rather than an interpolated string, so
//! a validated option value can never change the shape of the command line.
//! The rendered form is only used for logging and for the MSYS2 shell on
//! Windows, where everything goes through `bash -lc`.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, trace};

use crate::error::CommandError;
use crate::platform::Platform;

/// MSYS2 login shell used for every command on Windows runners.
const MSYS_BASH: &str = r"C:\msys64\usr\bin\bash.exe";

/// A program invocation as an ordered list of argument tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommand {
    /// Environment assignments applied to this invocation only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Suppress streaming of the command's output to the job log.
    #[serde(skip)]
    pub quiet: bool,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { env: Vec::new(), program: program.into(), args: Vec::new(), quiet: false }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Render as a single POSIX shell line, quoting tokens where needed.
    pub fn render(&self) -> String {
        let env = self.env.iter().map(|(k, v)| format!("{k}={}", quote(v)));
        let tokens =
            std::iter::once(&self.program).chain(&self.args).map(|t| quote(t).into_owned());
        env.chain(tokens).collect::<Vec<_>>().join(" ")
    }
}

impl std::fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Punctuation that never needs quoting.
const SAFE: &[char] = &['_', '-', '.', '/', ':', '=', '@', '+', ','];

/// Quote a token for a POSIX shell; bare tokens pass through unchanged.
pub fn quote(token: &str) -> Cow<'_, str> {
    let bare =
        !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || SAFE.contains(&c));
    if bare {
        Cow::Borrowed(token)
    } else {
        Cow::Owned(format!("'{}'", token.replace('\'', r"'\''")))
    }
}

/// Boxed future returned by [`Executor::run`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<String, CommandError>> + Send + 'a>>;

/// Runs shell commands, resolving with trimmed stdout on exit status 0.
pub trait Executor: Send + Sync {
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> ExecFuture<'a>;
}

/// Executor backed by real child processes.
#[derive(Debug, Clone, Copy)]
pub struct ShellExecutor {
    platform: Platform,
}

impl ShellExecutor {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn build(&self, cmd: &ShellCommand) -> tokio::process::Command {
        match self.platform {
            Platform::Windows => {
                let mut proc = tokio::process::Command::new(MSYS_BASH);
                proc.arg("-lc")
                    .arg(cmd.render())
                    .env("MSYS2_PATH_TYPE", "inherit")
                    .env("CHERE_INVOKING", "1")
                    .env("MSYSTEM", "MINGW64");
                proc
            }
            Platform::Linux | Platform::MacOs => {
                let mut proc = tokio::process::Command::new(&cmd.program);
                proc.args(&cmd.args).envs(cmd.env.iter().map(|(k, v)| (k, v)));
                proc
            }
        }
    }

    async fn exec(&self, cmd: &ShellCommand) -> Result<String, CommandError> {
        let rendered = cmd.render();
        if cmd.quiet {
            trace!(command = %rendered, "executing shell command");
        } else {
            debug!(command = %rendered, "executing shell command");
        }

        // Dropping the future (e.g. on cancellation) must not leave the child behind.
        let mut child = self
            .build(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn { command: rendered.clone(), source })?;

        let quiet = cmd.quiet;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let Some(stderr) = stderr else { return };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !quiet {
                    eprintln!("{line}");
                }
            }
        });

        let mut captured = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !quiet {
                    println!("{line}");
                }
                captured.push_str(&line);
                captured.push('\n');
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|source| CommandError::Spawn { command: rendered.clone(), source })?;
        let _ = stderr_task.await;

        if !status.success() {
            return Err(CommandError::Failed { command: rendered, code: status.code() });
        }
        Ok(captured.trim().to_owned())
    }
}

impl Executor for ShellExecutor {
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> ExecFuture<'a> {
        Box::pin(self.exec(cmd))
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
