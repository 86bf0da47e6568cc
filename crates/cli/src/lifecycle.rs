// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: setup in the main step, supervision in the post step.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::announce::{annotate, Annotation, Announcement, Console};
use crate::exit::ExitReason;
use crate::install::{self, Downloader, InstallRequest};
use crate::keys::{self, Access, KeySource};
use crate::options::ValidatedOptions;
use crate::platform::Platform;
use crate::shell::Executor;
use crate::signal::Teardown;
use crate::state::{self, PhaseState, StateStore};
use crate::tmate::{self, Tmate};
use crate::watch::{self, Probe};

/// How a phase finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Setup handed the session to the post step.
    Detached,
    /// A wait loop ended.
    Ended(ExitReason),
    /// Post step after a non-detached run.
    NothingToDo,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ended(ExitReason::HostCancelled) => 1,
            Self::Detached | Self::Ended(_) | Self::NothingToDo => 0,
        }
    }

    /// Error annotation for outcomes that fail the step.
    pub fn failure_report(&self) -> Option<String> {
        match self {
            Self::Ended(reason @ ExitReason::HostCancelled) => {
                Some(annotate(Annotation::Error, reason.describe()))
            }
            Self::Detached | Self::Ended(_) | Self::NothingToDo => None,
        }
    }
}

/// Runner facts resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunEnv {
    pub platform: Platform,
    pub actor: String,
    pub ssh_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub socket: PathBuf,
    pub continue_markers: Vec<PathBuf>,
    pub os_release: String,
    pub arch: String,
}

/// External collaborators, swappable in tests.
#[derive(Clone)]
pub struct Services {
    pub exec: Arc<dyn Executor>,
    pub console: Arc<dyn Console>,
    pub state: Arc<dyn StateStore>,
    pub keys: Arc<dyn KeySource>,
    pub downloader: Arc<dyn Downloader>,
}

/// Drives one phase of the lifecycle.
pub struct Controller {
    services: Services,
    env: RunEnv,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl Controller {
    pub fn new(
        services: Services,
        env: RunEnv,
        poll_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self { services, env, poll_interval, shutdown_timeout }
    }

    fn tmate(&self, program: String) -> Tmate {
        let mut tmate = Tmate::for_platform(self.env.platform, program);
        tmate.socket = self.env.socket.clone();
        tmate
    }

    fn probe(&self, tmate: &Tmate) -> Probe {
        Probe::new(tmate, self.env.continue_markers.clone())
    }

    /// Main step: install, launch, then wait in-process or hand off.
    pub async fn setup(&self, inputs: impl Fn(&str) -> String) -> anyhow::Result<Outcome> {
        let Services { exec, console, state, keys: key_source, downloader } = &self.services;

        // Before anything can fail, so the post step never starts a second session.
        state::mark_post(state.as_ref())?;
        let options = ValidatedOptions::from_inputs(inputs)?;

        info!(platform = %self.env.platform, "installing dependencies");
        let request = InstallRequest {
            platform: self.env.platform,
            install_dependencies: options.install_dependencies,
            sudo: options.sudo,
            tmp_dir: self.env.tmp_dir.clone(),
            os_release: self.env.os_release.clone(),
            arch: self.env.arch.clone(),
        };
        let program = install::install(exec.as_ref(), downloader.as_ref(), &request).await?;

        if self.env.platform != Platform::Windows {
            info!("generating ssh key");
            keys::ensure_ssh_key(exec.as_ref(), &self.env.ssh_dir).await?;
        }
        let access =
            keys::authorize(key_source.as_ref(), options.access, &self.env.actor, &self.env.ssh_dir)
                .await?;

        let rcfile = tmate::write_rcfile(&self.env.tmp_dir)
            .await
            .with_context(|| format!("writing rc file in {}", self.env.tmp_dir.display()))?;
        let extra =
            tmate::launch_args(&rcfile, access.authorized_keys(), options.server.as_ref());
        let session = tmate::launch(exec.as_ref(), self.tmate(program), &extra).await?;

        let announcement = Announcement {
            connection: session.connection.clone(),
            restricted: matches!(access, Access::Restricted { .. }),
            warning: access.warning().map(str::to_owned),
        };

        if options.detached {
            let message = announcement.annotated();
            let handoff =
                PhaseState { message: message.clone(), teardown: session.teardown_command() };
            handoff.save(state.as_ref())?;
            console.emit(&message);
            info!("session detached, the post step will supervise it");
            return Ok(Outcome::Detached);
        }

        let poll = options.poll_config(self.poll_interval);
        let probe = self.probe(&session.tmate);
        let plain = announcement.plain();
        let reason =
            watch::immediate(exec.as_ref(), console.as_ref(), &probe, &plain, &poll).await;
        Ok(Outcome::Ended(reason))
    }

    /// Post step: supervise a detached session until it ends, times out, or
    /// the host cancels. Only cancellation kills the session.
    pub async fn post(
        &self,
        handoff: Option<PhaseState>,
        inputs: impl Fn(&str) -> String,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Outcome> {
        let Some(handoff) = handoff else {
            info!("no detached session to supervise");
            return Ok(Outcome::NothingToDo);
        };
        let Services { exec, console, .. } = &self.services;

        let options = ValidatedOptions::from_inputs(inputs)?;
        let poll = options.poll_config(self.poll_interval);
        // The persisted teardown names the program and socket setup actually used.
        let tmate = Tmate::from_command(&handoff.teardown)
            .unwrap_or_else(|| self.tmate("tmate".to_owned()));
        let probe = self.probe(&tmate);
        let teardown = Teardown::new(handoff.teardown);

        let reason = watch::post(
            exec.as_ref(),
            console.as_ref(),
            &probe,
            &handoff.message,
            &poll,
            &shutdown,
        )
        .await;
        match reason {
            ExitReason::HostCancelled => {
                teardown.fire(exec.as_ref(), self.shutdown_timeout).await;
            }
            ExitReason::TimedOut => {
                warn!(
                    timeout_secs = poll.connect_timeout.as_secs(),
                    "no client connected before the timeout, leaving the session unsupervised"
                );
            }
            _ => {}
        }
        Ok(Outcome::Ended(reason))
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
