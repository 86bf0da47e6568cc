// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host cancellation for the post phase.
//!
//! The listener only cancels a token; the controller owns the teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::shell::{Executor, ShellCommand};

/// Cancel `shutdown` on SIGINT or SIGTERM. Later signals are ignored.
///
/// Handlers are registered before this returns, so a signal arriving before
/// the first poll is not lost.
#[cfg(unix)]
pub fn install(shutdown: CancellationToken) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv(sig: &mut Option<Signal>) {
        if let Some(s) = sig {
            if s.recv().await.is_some() {
                return;
            }
        }
        std::future::pending().await
    }

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();
    if sigterm.is_none() || sigint.is_none() {
        warn!("could not register all signal handlers");
    }

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = recv(&mut sigterm) => info!("received SIGTERM"),
                _ = recv(&mut sigint) => info!("received SIGINT"),
            }
            cancel_once(&shutdown);
        }
    })
}

/// Cancel `shutdown` on Ctrl-C. Later signals are ignored.
#[cfg(not(unix))]
pub fn install(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C");
            cancel_once(&shutdown);
        }
    })
}

fn cancel_once(shutdown: &CancellationToken) {
    if shutdown.is_cancelled() {
        debug!("shutdown already requested, ignoring signal");
    } else {
        shutdown.cancel();
    }
}

/// The session kill command, issued at most once per run.
#[derive(Debug)]
pub struct Teardown {
    command: ShellCommand,
    fired: AtomicBool,
}

impl Teardown {
    pub fn new(command: ShellCommand) -> Self {
        Self { command, fired: AtomicBool::new(false) }
    }

    /// Run the teardown, bounded by `limit`. Returns `false` if it already ran.
    pub async fn fire(&self, exec: &dyn Executor, limit: Duration) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("teardown already issued");
            return false;
        }
        info!(command = %self.command, "killing tmate session");
        match tokio::time::timeout(limit, exec.run(&self.command)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(err = %e, "teardown command failed"),
            Err(_) => warn!(timeout_ms = limit.as_millis() as u64, "teardown command timed out"),
        }
        true
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
