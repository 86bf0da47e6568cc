// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-facing output: connection-string announcements and workflow
//! command annotations.
//!
//! Diagnostics go through `tracing` (stderr). Anything the operator has to
//! read in the job log goes through a [`Console`] (stdout).

use crate::tmate::ConnectionStrings;

/// Sink for job-log text.
pub trait Console: Send + Sync {
    fn emit(&self, text: &str);
}

/// Console that writes to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdout;

impl Console for Stdout {
    fn emit(&self, text: &str) {
        println!("{text}");
    }
}

/// Workflow command severities understood by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    Error,
    Warning,
    Notice,
}

impl Annotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
        }
    }
}

/// Format a single-line workflow command, e.g. `::notice::SSH: ...`.
pub fn annotate(kind: Annotation, message: &str) -> String {
    format!("::{}::{}", kind.as_str(), escape_data(message))
}

/// Escape a workflow command payload so it stays on one line.
pub fn escape_data(message: &str) -> String {
    message.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}

/// Placeholder shown in the `ssh -i` variant of the connection string.
const IDENTITY_HINT: &str = "ssh -i <path-to-private-SSH-key>";

/// Connection details as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub connection: ConnectionStrings,
    /// Only the actor's keys are authorized, so show the `ssh -i` form too.
    pub restricted: bool,
    pub warning: Option<String>,
}

impl Announcement {
    /// Plain log lines, re-printed every tick while waiting in-process.
    pub fn plain(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref warning) = self.warning {
            lines.push(format!("Warning: {warning}"));
        }
        if let Some(ref web) = self.connection.web {
            lines.push(format!("Web shell: {web}"));
        }
        lines.push(format!("SSH: {}", self.connection.ssh));
        if let Some(dash_i) = self.ssh_with_identity() {
            lines.push(format!("or: {dash_i}"));
        }
        lines.join("\n")
    }

    /// Annotated form, persisted for the post phase and shown in the job summary.
    pub fn annotated(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref warning) = self.warning {
            lines.push(annotate(Annotation::Warning, warning));
        }
        if let Some(ref web) = self.connection.web {
            lines.push(annotate(Annotation::Notice, &format!("Web shell: {web}")));
        }
        lines.push(annotate(Annotation::Notice, &format!("SSH: {}", self.connection.ssh)));
        if let Some(dash_i) = self.ssh_with_identity() {
            lines.push(annotate(Annotation::Notice, &format!("or: {dash_i}")));
        }
        lines.join("\n")
    }

    fn ssh_with_identity(&self) -> Option<String> {
        if !self.restricted {
            return None;
        }
        self.connection.ssh.strip_prefix("ssh").map(|rest| format!("{IDENTITY_HINT}{rest}"))
    }
}

#[cfg(test)]
#[path = "announce_tests.rs"]
mod tests;
