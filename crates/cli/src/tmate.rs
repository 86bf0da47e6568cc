// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tmate command surface and session launch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TetherError;
use crate::options::ServerOverrides;
use crate::platform::Platform;
use crate::shell::{self, Executor, ShellCommand};

/// Contents of the rc file. `~/.profile` on some images enables `set -e`,
/// which would close the session on the first failing command.
pub const RCFILE_CONTENTS: &str = "set +e\n";

pub const RCFILE_NAME: &str = "tmate.bashrc";

const SEPARATOR: &str = ";";

/// How to invoke tmate against the control socket of this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tmate {
    pub program: String,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    pub socket: PathBuf,
}

impl Tmate {
    pub fn new(program: impl Into<String>, socket: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), env: Vec::new(), socket: socket.into() }
    }

    /// Handle for `program` using the platform's socket path and environment.
    pub fn for_platform(platform: Platform, program: impl Into<String>) -> Self {
        let mut tmate = Self::new(program, platform.socket_path());
        if platform == Platform::Windows {
            // Keeps the MSYS2 login shell in the working directory.
            tmate.env.push(("CHERE_INVOKING".to_owned(), "1".to_owned()));
        }
        tmate
    }

    /// Recover the handle from a command built by [`Tmate::base`].
    pub fn from_command(cmd: &ShellCommand) -> Option<Self> {
        match cmd.args.as_slice() {
            [flag, socket, ..] if flag == "-S" => Some(Self {
                program: cmd.program.clone(),
                env: cmd.env.clone(),
                socket: PathBuf::from(socket),
            }),
            _ => None,
        }
    }

    fn base(&self) -> ShellCommand {
        let mut cmd = ShellCommand::new(&self.program);
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        cmd.arg("-S").arg(self.socket.to_string_lossy())
    }

    pub fn new_session(&self, extra: &[String]) -> ShellCommand {
        self.base().args(extra.iter().cloned()).args(["new-session", "-d"])
    }

    pub fn wait_ready(&self) -> ShellCommand {
        self.base().args(["wait", "tmate-ready"])
    }

    pub fn display(&self, format: &str) -> ShellCommand {
        self.base().args(["display", "-p", format])
    }

    /// Polled every tick, so kept out of the job log.
    pub fn num_clients(&self) -> ShellCommand {
        self.display("#{tmate_num_clients}").quiet()
    }

    pub fn kill_session(&self) -> ShellCommand {
        self.base().arg("kill-session")
    }
}

/// Shell started inside the session; sources `rcfile` to undo `set -e`.
pub fn default_command(rcfile: &Path) -> String {
    format!("bash --rcfile {}", shell::quote(&rcfile.to_string_lossy()))
}

/// Launch-time flags placed between the socket and `new-session`.
pub fn launch_args(
    rcfile: &Path,
    authorized_keys: Option<&Path>,
    server: Option<&ServerOverrides>,
) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = authorized_keys {
        args.push("-a".to_owned());
        args.push(path.to_string_lossy().into_owned());
    }
    set_option(&mut args, "default-command", &default_command(rcfile));
    if let Some(server) = server {
        set_option(&mut args, "tmate-server-host", &server.host);
        set_option(&mut args, "tmate-server-port", &server.port);
        if let Some(ref fp) = server.rsa_fingerprint {
            set_option(&mut args, "tmate-server-rsa-fingerprint", fp);
        }
        if let Some(ref fp) = server.ed25519_fingerprint {
            set_option(&mut args, "tmate-server-ed25519-fingerprint", fp);
        }
    }
    args
}

fn set_option(args: &mut Vec<String>, name: &str, value: &str) {
    args.extend(["set-option", "-g", name, value, SEPARATOR].map(str::to_owned));
}

/// Write the rc file for [`default_command`] into `dir`.
pub async fn write_rcfile(dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(RCFILE_NAME);
    tokio::fs::write(&path, RCFILE_CONTENTS).await?;
    Ok(path)
}

/// Connection strings reported by tmate once the session is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStrings {
    pub ssh: String,
    /// Absent when the server has no web endpoint.
    pub web: Option<String>,
}

/// The one live session of this run.
#[derive(Debug, Clone)]
pub struct Session {
    pub tmate: Tmate,
    pub connection: ConnectionStrings,
}

impl Session {
    /// Command that ends the session; persisted for the post phase.
    pub fn teardown_command(&self) -> ShellCommand {
        self.tmate.kill_session()
    }
}

/// Start the session, wait for it to register and fetch its connection strings.
pub async fn launch(
    exec: &dyn Executor,
    tmate: Tmate,
    extra: &[String],
) -> Result<Session, TetherError> {
    info!(socket = %tmate.socket.display(), "starting tmate session");
    exec.run(&tmate.new_session(extra)).await.map_err(TetherError::Launch)?;
    exec.run(&tmate.wait_ready()).await.map_err(TetherError::Launch)?;

    let ssh = exec.run(&tmate.display("#{tmate_ssh}")).await.map_err(TetherError::Launch)?;
    let web = exec.run(&tmate.display("#{tmate_web}")).await.map_err(TetherError::Launch)?;
    debug!(%ssh, %web, "tmate session ready");

    let connection = ConnectionStrings { ssh, web: Some(web).filter(|w| !w.is_empty()) };
    Ok(Session { tmate, connection })
}

#[cfg(test)]
#[path = "tmate_tests.rs"]
mod tests;
