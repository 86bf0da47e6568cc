// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exit-condition evaluation for the watch loop.
//!
//! Conditions are checked in a fixed order and the first match wins. The
//! evaluator is pure: the watch loop gathers a [`Snapshot`] and asks which
//! condition (if any) ends the session.

use std::time::Duration;

/// Why the session wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A continue marker file appeared.
    ContinueMarkerPresent,
    /// The tmate control socket disappeared.
    ProcessExited,
    /// Every connected client has disconnected.
    NoConnectedClients,
    /// Nobody connected before the connect timeout elapsed.
    TimedOut,
    /// The host asked the post phase to stop.
    HostCancelled,
}

impl ExitReason {
    /// Message shown when the session wait ends for this reason.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::ContinueMarkerPresent => {
                "Exiting debugging session because the continue file was created"
            }
            Self::ProcessExited => "Exiting debugging session because tmate exited",
            Self::NoConnectedClients => {
                "Exiting debugging session because all clients disconnected"
            }
            Self::TimedOut => {
                "Exiting debugging session because no client connected before the timeout"
            }
            Self::HostCancelled => "Exiting debugging session because the job was cancelled",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContinueMarkerPresent => "continue_marker",
            Self::ProcessExited => "process_exited",
            Self::NoConnectedClients => "no_clients",
            Self::TimedOut => "timed_out",
            Self::HostCancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking tmate how many clients are attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientCount {
    /// The query was skipped this tick.
    #[default]
    NotChecked,
    /// The query failed or printed something unparseable.
    Unknown,
    Count(u32),
}

impl ClientCount {
    /// Parse the output of `display -p '#{tmate_num_clients}'`.
    pub fn parse(output: &str) -> Self {
        output.trim().parse().map(Self::Count).unwrap_or(Self::Unknown)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Count(n) if *n > 0)
    }
}

/// Observations gathered for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Zero-based iteration counter.
    pub tick: u64,
    pub continue_marker: bool,
    pub socket_present: bool,
    pub clients: ClientCount,
    /// Remaining connect budget; `None` when no timeout applies.
    pub connect_budget: Option<Duration>,
    /// Latched once any client has been observed.
    pub client_seen: bool,
}

/// Which conditions participate for a given loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub check_client_count: bool,
    pub enforce_timeout: bool,
}

type Condition = fn(&Snapshot, &Rules) -> bool;

const CONDITIONS: [(ExitReason, Condition); 4] = [
    (ExitReason::ContinueMarkerPresent, marker_present),
    (ExitReason::ProcessExited, socket_gone),
    (ExitReason::NoConnectedClients, clients_left),
    (ExitReason::TimedOut, budget_spent),
];

/// First condition that holds for this snapshot, in priority order.
pub fn evaluate(snapshot: &Snapshot, rules: &Rules) -> Option<ExitReason> {
    CONDITIONS.iter().find(|(_, holds)| holds(snapshot, rules)).map(|(reason, _)| *reason)
}

fn marker_present(s: &Snapshot, _: &Rules) -> bool {
    s.continue_marker
}

fn socket_gone(s: &Snapshot, _: &Rules) -> bool {
    !s.socket_present
}

// Skipped on the first tick so tmate has a chance to register the session.
fn clients_left(s: &Snapshot, rules: &Rules) -> bool {
    rules.check_client_count && s.tick > 0 && s.clients == ClientCount::Count(0)
}

fn budget_spent(s: &Snapshot, rules: &Rules) -> bool {
    rules.enforce_timeout && !s.client_seen && s.connect_budget.is_some_and(|b| b.is_zero())
}

#[cfg(test)]
#[path = "exit_tests.rs"]
mod tests;
