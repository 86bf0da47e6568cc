// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end phase tests: the real executor and state file driving a
//! scripted stand-in for tmate placed first on `PATH`.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use tether::config::Config;
use tether::exit::ExitReason;
use tether::lifecycle::Outcome;
use tether::run::run;

const FAKE_TMATE: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$*" >> "$dir/calls.log"
sock=""
if [ "$1" = "-S" ]; then sock="$2"; shift 2; fi
case "$*" in
  *new-session*) : > "$sock" ;;
  *kill-session*) rm -f "$sock" ;;
  "display -p #{tmate_ssh}") echo "ssh fake@tmate.test" ;;
  "display -p #{tmate_web}") echo "https://tmate.test/t/fake" ;;
  "display -p #{tmate_num_clients}") cat "$dir/clients" 2>/dev/null || echo 0 ;;
esac
"#;

const FAKE_KEYGEN: &str = r#"#!/bin/sh
for arg; do last="$arg"; done
: > "$last"
"#;

struct Runner {
    dir: TempDir,
    old_path: String,
}

impl Runner {
    fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin)?;
        std::fs::create_dir_all(dir.path().join("workspace"))?;
        for (name, body) in [("tmate", FAKE_TMATE), ("ssh-keygen", FAKE_KEYGEN)] {
            let path = bin.join(name);
            std::fs::write(&path, body)?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        let old_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{old_path}", bin.display()));
        Ok(Self { dir, old_path })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self, inputs: &[(&str, &str)]) -> Config {
        let mut config = Config {
            install_dependencies: "false".into(),
            workspace: Some(self.path("workspace")),
            state_file: Some(self.path("state")),
            home: Some(self.dir.path().to_path_buf()),
            socket: Some(self.path("tmate.sock")),
            tmp_dir: Some(self.dir.path().to_path_buf()),
            ..Config::test()
        };
        for (name, value) in inputs {
            let value = (*value).to_owned();
            match *name {
                "detached" => config.detached = value,
                "check-num-clients" => config.check_num_clients = value,
                "connect-timeout-seconds" => config.connect_timeout_seconds = value,
                "tmate-server-host" => config.tmate_server_host = value,
                other => unreachable!("unhandled input {other}"),
            }
        }
        config
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("bin").join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn state(&self) -> String {
        std::fs::read_to_string(self.path("state")).unwrap_or_default()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.old_path);
    }
}

fn touch_after(path: &Path, after: Duration) {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = std::fs::write(path, "");
    });
}

#[tokio::test]
#[serial]
async fn invalid_input_records_post_and_runs_nothing() -> anyhow::Result<()> {
    let runner = Runner::new()?;
    let result = run(runner.config(&[("tmate-server-host", "not/a/valid/hostname")])).await;

    let err = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(err.to_string(), "Invalid value for 'tmate-server-host': 'not/a/valid/hostname'");
    assert!(runner.state().starts_with("isPost<<"));
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
async fn immediate_session_ends_when_clients_leave() -> anyhow::Result<()> {
    let runner = Runner::new()?;
    std::fs::write(runner.path("bin").join("clients"), "0\n")?;

    let outcome = run(runner.config(&[])).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::NoConnectedClients));
    let calls = runner.calls();
    assert!(calls[0].ends_with("new-session -d"));
    let rcfile = runner.path("tmate.bashrc");
    let default_command =
        format!("set-option -g default-command bash --rcfile {} ;", rcfile.display());
    assert!(calls[0].contains(&default_command));
    assert_eq!(calls.iter().filter(|c| c.contains("kill-session")).count(), 0);
    assert_eq!(std::fs::read_to_string(&rcfile)?, "set +e\n");
    Ok(())
}

#[tokio::test]
#[serial]
async fn detached_session_is_supervised_by_post_step() -> anyhow::Result<()> {
    let runner = Runner::new()?;
    let inputs = [("detached", "true")];

    assert_eq!(run(runner.config(&inputs)).await?, Outcome::Detached);
    let state = runner.state();
    assert!(state.contains("message<<"));
    assert!(state.contains("\"kill-session\""));

    // Second invocation of the same binary: the state file now says "post".
    touch_after(&runner.path("workspace").join("continue"), Duration::from_millis(100));
    let outcome = run(runner.config(&inputs)).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::ContinueMarkerPresent));
    assert_eq!(outcome.exit_code(), 0);
    let calls = runner.calls();
    assert_eq!(calls.iter().filter(|c| c.contains("new-session")).count(), 1);
    assert_eq!(calls.iter().filter(|c| c.contains("kill-session")).count(), 0);
    Ok(())
}

#[tokio::test]
#[serial]
async fn cancelled_post_step_kills_session() -> anyhow::Result<()> {
    let runner = Runner::new()?;
    let inputs = [("detached", "true")];
    assert_eq!(run(runner.config(&inputs)).await?, Outcome::Detached);

    let pid = std::process::id().to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tokio::process::Command::new("kill").args(["-TERM", &pid]).status().await;
    });
    let outcome = run(runner.config(&inputs)).await?;

    assert_eq!(outcome, Outcome::Ended(ExitReason::HostCancelled));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(runner.calls().iter().filter(|c| c.contains("kill-session")).count(), 1);
    assert!(!runner.path("tmate.sock").exists());
    Ok(())
}
