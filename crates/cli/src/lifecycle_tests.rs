// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::assert_err_contains;
use crate::error::TetherError;
use crate::options::{
    CONNECT_TIMEOUT_SECONDS, DETACHED, INSTALL_DEPENDENCIES, LIMIT_ACCESS_TO_ACTOR,
};
use crate::shell::ShellCommand;
use crate::state::{Phase, KEY_IS_POST, KEY_MESSAGE, KEY_TMATE};
use crate::test_support::{
    FakeDownloader, MemoryState, MockExecutor, RecordingConsole, Reply, StaticKeys,
};

const POLL: Duration = Duration::from_secs(5);

struct Harness {
    dir: TempDir,
    exec: Arc<MockExecutor>,
    console: Arc<RecordingConsole>,
    state: Arc<MemoryState>,
    keys: Arc<StaticKeys>,
    downloader: Arc<FakeDownloader>,
}

impl Harness {
    /// A runner whose tmate comes up and creates its socket.
    fn new(keys: StaticKeys) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket = dir.path().join("tmate.sock");
        let exec = MockExecutor::new()
            .on("#{tmate_ssh}", Reply::ok("ssh abc@nyc1.tmate.io"))
            .on("#{tmate_web}", Reply::ok("https://tmate.io/t/abc"))
            .hook("new-session", move || {
                let _ = std::fs::write(&socket, "");
            });
        Ok(Self {
            dir,
            exec: Arc::new(exec),
            console: Arc::new(RecordingConsole::default()),
            state: Arc::new(MemoryState::default()),
            keys: Arc::new(keys),
            downloader: Arc::new(FakeDownloader::default()),
        })
    }

    fn with_exec(mut self, exec: MockExecutor) -> Self {
        self.exec = Arc::new(exec);
        self
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn controller(&self) -> Controller {
        let services = Services {
            exec: self.exec.clone(),
            console: self.console.clone(),
            state: self.state.clone(),
            keys: self.keys.clone(),
            downloader: self.downloader.clone(),
        };
        let env = RunEnv {
            platform: Platform::Linux,
            actor: "octocat".to_owned(),
            ssh_dir: self.path(".ssh"),
            tmp_dir: self.dir.path().to_path_buf(),
            socket: self.path("tmate.sock"),
            continue_markers: vec![self.path("continue")],
            os_release: "ID=ubuntu".to_owned(),
            arch: "x86_64".to_owned(),
        };
        Controller::new(services, env, POLL, Duration::from_secs(10))
    }
}

fn inputs(pairs: &[(&str, &str)]) -> impl Fn(&str) -> String {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |name: &str| map.get(name).cloned().unwrap_or_default()
}

fn touch(path: &Path) {
    let _ = std::fs::write(path, "");
}

#[tokio::test]
async fn invalid_option_fails_before_any_command() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    let result =
        h.controller().setup(inputs(&[("tmate-server-host", "not/a/valid/hostname")])).await;

    assert_err_contains!(result, "Invalid value for 'tmate-server-host': 'not/a/valid/hostname'");
    assert!(h.exec.calls().is_empty());
    assert_eq!(h.state.get(KEY_IS_POST).as_deref(), Some("true"));
    Ok(())
}

#[tokio::test]
async fn detached_setup_hands_off_state() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    let outcome = h.controller().setup(inputs(&[(DETACHED, "true")])).await?;

    assert_eq!(outcome, Outcome::Detached);
    assert_eq!(outcome.exit_code(), 0);
    let saved = h.state.snapshot();
    let message = saved.get(KEY_MESSAGE).cloned().unwrap_or_default();
    assert_eq!(
        message,
        "::notice::Web shell: https://tmate.io/t/abc\n::notice::SSH: ssh abc@nyc1.tmate.io"
    );
    let teardown: ShellCommand =
        serde_json::from_str(saved.get(KEY_TMATE).map(String::as_str).unwrap_or(""))?;
    assert_eq!(teardown.args.last().map(String::as_str), Some("kill-session"));
    assert_eq!(h.console.lines(), vec![message]);
    assert_eq!(h.exec.count("tmate_num_clients"), 0);
    Ok(())
}

#[tokio::test]
async fn setup_runs_steps_in_order() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    touch(&h.path("continue"));
    let outcome = h.controller().setup(inputs(&[])).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::ContinueMarkerPresent));
    let programs: Vec<_> = h.exec.calls().iter().map(|c| c.program.clone()).collect();
    let tmate = h.path("tmate").join("tmate").to_string_lossy().into_owned();
    assert_eq!(
        programs,
        vec![
            "sudo",
            "sudo",
            "tar",
            "ssh-keygen",
            tmate.as_str(),
            tmate.as_str(),
            tmate.as_str(),
            tmate.as_str()
        ]
    );
    assert_eq!(h.downloader.urls().len(), 1);
    let rcfile = h.path("tmate.bashrc");
    assert_eq!(std::fs::read_to_string(&rcfile)?, "set +e\n");
    let default_command = tmate::default_command(&rcfile);
    assert_eq!(h.exec.count(&default_command), 1);
    assert_eq!(h.exec.count("kill-session"), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn immediate_mode_reannounces_until_clients_leave() -> anyhow::Result<()> {
    let exec = MockExecutor::new()
        .on("#{tmate_ssh}", Reply::ok("ssh abc@nyc1.tmate.io"))
        .on_seq("tmate_num_clients", vec![Reply::ok("1"), Reply::ok("0")]);
    let h = Harness::new(StaticKeys::default())?.with_exec(exec);
    touch(&h.path("tmate.sock"));

    let outcome = h.controller().setup(inputs(&[(INSTALL_DEPENDENCIES, "false")])).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::NoConnectedClients));
    assert_eq!(h.console.lines(), vec!["SSH: ssh abc@nyc1.tmate.io"; 3]);
    assert_eq!(h.exec.count("kill-session"), 0);
    Ok(())
}

#[tokio::test]
async fn restricted_access_passes_authorized_keys() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::new(["ssh-ed25519 AAAA"]))?;
    touch(&h.path("continue"));
    let restricted = inputs(&[(LIMIT_ACCESS_TO_ACTOR, "true"), (INSTALL_DEPENDENCIES, "false")]);
    h.controller().setup(restricted).await?;

    let keys_path = h.path(".ssh").join("authorized_keys");
    let start = h.exec.calls().into_iter().find(|c| c.args.iter().any(|a| a == "new-session"));
    let start = start.ok_or_else(|| anyhow::anyhow!("no new-session issued"))?;
    assert_eq!(start.args[2..4], ["-a".to_owned(), keys_path.to_string_lossy().into_owned()]);
    assert!(h.console.joined().contains("or: ssh -i <path-to-private-SSH-key> abc@nyc1.tmate.io"));
    Ok(())
}

#[tokio::test]
async fn restricted_access_without_keys_never_launches() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    let result = h.controller().setup(inputs(&[(LIMIT_ACCESS_TO_ACTOR, "true")])).await;

    let err = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err.downcast_ref::<TetherError>(), Some(TetherError::IdentityLookup(_))));
    assert_eq!(h.exec.count("new-session"), 0);
    Ok(())
}

#[tokio::test]
async fn launch_failure_is_fatal() -> anyhow::Result<()> {
    let exec = MockExecutor::new().on("wait tmate-ready", Reply::Fail(1));
    let h = Harness::new(StaticKeys::default())?.with_exec(exec);
    let result = h.controller().setup(inputs(&[(INSTALL_DEPENDENCIES, "false")])).await;

    assert_err_contains!(result, "failed to launch tmate session");
    assert_eq!(h.exec.count("new-session"), 1);
    Ok(())
}

#[tokio::test]
async fn post_without_handoff_does_nothing() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    let outcome = h.controller().post(None, inputs(&[]), CancellationToken::new()).await?;
    assert_eq!(outcome, Outcome::NothingToDo);
    assert!(h.exec.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_post_kills_once_and_fails() -> anyhow::Result<()> {
    let exec = MockExecutor::new().on("tmate_num_clients", Reply::Hang);
    let h = Harness::new(StaticKeys::default())?.with_exec(exec);
    touch(&h.path("tmate.sock"));
    let teardown = Tmate::new("/tmp/tmate/tmate", h.path("tmate.sock")).kill_session();
    let handoff = PhaseState { message: "::notice::SSH: ssh a@b".to_owned(), teardown };

    let shutdown = CancellationToken::new();
    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        canceller.cancel();
        canceller.cancel();
    });

    let outcome = h.controller().post(Some(handoff), inputs(&[]), shutdown).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::HostCancelled));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(
        outcome.failure_report().as_deref(),
        Some("::error::Exiting debugging session because the job was cancelled")
    );
    assert_eq!(h.exec.count("kill-session"), 1);
    // The probe reuses the persisted program.
    assert!(h.exec.rendered().iter().all(|c| c.starts_with("/tmp/tmate/tmate -S ")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unattended_post_leaves_session_running() -> anyhow::Result<()> {
    let exec = MockExecutor::new().on("tmate_num_clients", Reply::ok("0"));
    let h = Harness::new(StaticKeys::default())?.with_exec(exec);
    touch(&h.path("tmate.sock"));
    let handoff = PhaseState {
        message: "msg".to_owned(),
        teardown: Tmate::new("tmate", h.path("tmate.sock")).kill_session(),
    };

    let outcome = h
        .controller()
        .post(Some(handoff), inputs(&[(CONNECT_TIMEOUT_SECONDS, "10")]), CancellationToken::new())
        .await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::TimedOut));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(h.exec.count("kill-session"), 0);
    Ok(())
}

#[yare::parameterized(
    detached     = { Outcome::Detached },
    nothing      = { Outcome::NothingToDo },
    timed_out    = { Outcome::Ended(ExitReason::TimedOut) },
    continued    = { Outcome::Ended(ExitReason::ContinueMarkerPresent) },
    no_clients   = { Outcome::Ended(ExitReason::NoConnectedClients) },
)]
fn clean_outcomes_report_nothing(outcome: Outcome) {
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.failure_report(), None);
}

#[tokio::test(start_paused = true)]
async fn two_phase_round_trip() -> anyhow::Result<()> {
    let h = Harness::new(StaticKeys::default())?;
    let controller = h.controller();
    let detached = inputs(&[(DETACHED, "true"), (INSTALL_DEPENDENCIES, "false")]);
    assert_eq!(controller.setup(&detached).await?, Outcome::Detached);

    let Phase::PostCleanup(handoff) = Phase::load(h.state.as_ref())? else {
        anyhow::bail!("expected post phase");
    };
    let marker = h.path("continue");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        touch(&marker);
    });
    let outcome = controller.post(handoff, &detached, CancellationToken::new()).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::ContinueMarkerPresent));
    assert_eq!(h.exec.count("new-session"), 1);
    assert_eq!(h.exec.count("kill-session"), 0);
    let lines = h.console.lines();
    let waiting = "Waiting for client to connect (at most 600 more second(s))\n::notice::";
    assert!(lines[1].starts_with(waiting));
    Ok(())
}
