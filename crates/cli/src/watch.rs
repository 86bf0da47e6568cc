// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session wait loops.
//!
//! Each tick gathers a [`Snapshot`] through a [`Probe`] and hands it to
//! [`exit::evaluate`]. The immediate loop runs inside the main step; the post
//! loop runs in the post step and also watches for host cancellation.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::announce::Console;
use crate::exit::{self, ClientCount, ExitReason, Rules, Snapshot};
use crate::options::PollConfig;
use crate::shell::{Executor, ShellCommand};
use crate::tmate::Tmate;

/// Filesystem and tmate observations for one session.
#[derive(Debug, Clone)]
pub struct Probe {
    pub socket: PathBuf,
    pub continue_markers: Vec<PathBuf>,
    pub client_query: ShellCommand,
}

impl Probe {
    pub fn new(tmate: &Tmate, continue_markers: Vec<PathBuf>) -> Self {
        Self { socket: tmate.socket.clone(), continue_markers, client_query: tmate.num_clients() }
    }

    pub fn marker_present(&self) -> bool {
        self.continue_markers.iter().any(|p| p.exists())
    }

    pub fn socket_present(&self) -> bool {
        self.socket.exists()
    }

    /// Ask tmate for its client count. Failures read as [`ClientCount::Unknown`].
    pub async fn clients(&self, exec: &dyn Executor) -> ClientCount {
        match exec.run(&self.client_query).await {
            Ok(out) => ClientCount::parse(&out),
            Err(e) => {
                debug!(err = %e, "client count query failed");
                ClientCount::Unknown
            }
        }
    }

    fn snapshot(&self, tick: u64) -> Snapshot {
        Snapshot {
            tick,
            continue_marker: self.marker_present(),
            socket_present: self.socket_present(),
            ..Snapshot::default()
        }
    }
}

/// Loop of the non-detached main step: announce, check, sleep.
pub async fn immediate(
    exec: &dyn Executor,
    console: &dyn Console,
    probe: &Probe,
    announcement: &str,
    poll: &PollConfig,
) -> ExitReason {
    let rules = Rules { check_client_count: poll.check_client_count, enforce_timeout: false };
    let mut tick = 0u64;
    loop {
        console.emit(announcement);

        let mut snapshot = probe.snapshot(tick);
        let decided = snapshot.continue_marker || !snapshot.socket_present;
        if rules.check_client_count && tick > 0 && !decided {
            snapshot.clients = probe.clients(exec).await;
        }
        if let Some(reason) = exit::evaluate(&snapshot, &rules) {
            info!(%reason, tick, "{}", reason.describe());
            return reason;
        }

        tokio::time::sleep(poll.poll_interval).await;
        tick += 1;
    }
}

/// Loop of the post step: re-announce until the session ends, nobody shows
/// up within the connect timeout, or the host cancels. Each tick announces
/// before it evaluates.
///
/// The connect budget only shrinks while no client has ever been seen.
pub async fn post(
    exec: &dyn Executor,
    console: &dyn Console,
    probe: &Probe,
    message: &str,
    poll: &PollConfig,
    shutdown: &CancellationToken,
) -> ExitReason {
    let rules = Rules { check_client_count: false, enforce_timeout: true };
    let mut budget = poll.connect_timeout;
    let mut client_seen = false;
    let mut tick = 0u64;
    loop {
        if shutdown.is_cancelled() {
            return ExitReason::HostCancelled;
        }

        let mut snapshot = probe.snapshot(tick);
        if !client_seen && !snapshot.continue_marker && snapshot.socket_present {
            tokio::select! {
                clients = probe.clients(exec) => {
                    if clients.is_connected() {
                        info!("client connected, connect timeout disabled");
                        client_seen = true;
                    }
                    snapshot.clients = clients;
                }
                _ = shutdown.cancelled() => return ExitReason::HostCancelled,
            }
        }
        snapshot.client_seen = client_seen;
        snapshot.connect_budget = Some(budget);

        let status = if client_seen {
            "Waiting for session to end".to_owned()
        } else {
            format!(
                "Waiting for client to connect (at most {} more second(s))",
                budget.as_secs()
            )
        };
        console.emit(&format!("{status}\n{message}"));

        if let Some(reason) = exit::evaluate(&snapshot, &rules) {
            info!(%reason, tick, "{}", reason.describe());
            return reason;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll.poll_interval) => {}
            _ = shutdown.cancelled() => return ExitReason::HostCancelled,
        }
        if !client_seen {
            budget = budget.saturating_sub(poll.poll_interval);
        }
        tick += 1;
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
