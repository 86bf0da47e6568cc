// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-platform installation of tmate and its runtime dependencies.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use tracing::{debug, info};

use crate::error::TetherError;
use crate::platform::Platform;
use crate::shell::{Executor, ShellCommand};

pub const TMATE_VERSION: &str = "2.4.0";

/// Boxed future returned by [`Downloader::download`].
pub type DownloadFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Fetches a URL into a local file.
pub trait Downloader: Send + Sync {
    fn download<'a>(&'a self, url: &'a str, dest: &'a Path) -> DownloadFuture<'a>;
}

/// Downloader backed by a shared reqwest client.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        debug!(url, dest = %dest.display(), "downloading");
        let bytes = self.client.get(url).send().await?.error_for_status()?.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download<'a>(&'a self, url: &'a str, dest: &'a Path) -> DownloadFuture<'a> {
        Box::pin(self.fetch(url, dest))
    }
}

/// Linux package managers the installer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
    Pacman,
}

impl PackageManager {
    /// Pick from the `ID=` (then `ID_LIKE=`) fields of `/etc/os-release`; apt otherwise.
    pub fn detect(os_release: &str) -> Self {
        let field = |name: &str| {
            os_release
                .lines()
                .find_map(|line| line.strip_prefix(name)?.strip_prefix('='))
                .map(|v| v.trim().trim_matches('"').to_lowercase())
                .unwrap_or_default()
        };
        let id = field("ID");
        let like = field("ID_LIKE");
        std::iter::once(id.as_str())
            .chain(like.split_whitespace())
            .find_map(Self::from_id)
            .unwrap_or(Self::Apt)
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" => Some(Self::Apt),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Some(Self::Dnf),
            "amzn" => Some(Self::Yum),
            "alpine" => Some(Self::Apk),
            "arch" | "manjaro" => Some(Self::Pacman),
            _ => None,
        }
    }

    /// Commands installing the ssh client and xz, optionally under sudo.
    pub fn commands(&self, sudo: bool) -> Vec<ShellCommand> {
        let cmd = |program: &str| {
            if sudo {
                ShellCommand::new("sudo").arg(program)
            } else {
                ShellCommand::new(program)
            }
        };
        match self {
            Self::Apt => vec![
                cmd("apt-get").arg("update"),
                cmd("apt-get").args(["install", "-y", "openssh-client", "xz-utils"]),
            ],
            Self::Dnf => vec![cmd("dnf").args(["install", "-y", "openssh-clients", "xz"])],
            Self::Yum => vec![cmd("yum").args(["install", "-y", "openssh-clients", "xz"])],
            Self::Apk => vec![cmd("apk").args(["add", "--no-cache", "openssh-client", "xz"])],
            Self::Pacman => vec![cmd("pacman").args(["-Sy", "--noconfirm", "openssh", "xz"])],
        }
    }
}

/// Release asset suffix for a Rust `std::env::consts::ARCH` value.
pub fn arch_suffix(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" => Some("amd64"),
        "aarch64" => Some("arm64v8"),
        "arm" => Some("arm32v7"),
        "x86" => Some("i386"),
        _ => None,
    }
}

pub fn release_url(suffix: &str) -> String {
    format!(
        "https://github.com/tmate-io/tmate/releases/download/{TMATE_VERSION}/\
         tmate-{TMATE_VERSION}-static-linux-{suffix}.tar.xz"
    )
}

/// Inputs to a dependency install.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub platform: Platform,
    pub install_dependencies: bool,
    pub sudo: bool,
    pub tmp_dir: PathBuf,
    /// Contents of `/etc/os-release`; empty when unreadable.
    pub os_release: String,
    pub arch: String,
}

/// Install what the platform needs and return the tmate program to invoke.
pub async fn install(
    exec: &dyn Executor,
    downloader: &dyn Downloader,
    req: &InstallRequest,
) -> Result<String, TetherError> {
    if !req.install_dependencies {
        debug!("dependency install disabled, using tmate from PATH");
        return Ok("tmate".to_owned());
    }
    match req.platform {
        Platform::MacOs => {
            run_all(exec, &[ShellCommand::new("brew").args(["install", "tmate"])]).await?;
            Ok("tmate".to_owned())
        }
        Platform::Windows => {
            let pacman = ShellCommand::new("pacman").args(["-S", "--noconfirm", "tmate"]);
            run_all(exec, &[pacman]).await?;
            Ok("tmate".to_owned())
        }
        Platform::Linux => {
            install_linux(exec, downloader, req).await.map_err(TetherError::DependencyInstall)
        }
    }
}

async fn run_all(exec: &dyn Executor, cmds: &[ShellCommand]) -> Result<(), TetherError> {
    for cmd in cmds {
        exec.run(cmd).await.map_err(|e| TetherError::DependencyInstall(e.into()))?;
    }
    Ok(())
}

async fn install_linux(
    exec: &dyn Executor,
    downloader: &dyn Downloader,
    req: &InstallRequest,
) -> anyhow::Result<String> {
    let manager = PackageManager::detect(&req.os_release);
    info!(?manager, sudo = req.sudo && req.platform.supports_sudo(), "installing dependencies");
    for cmd in manager.commands(req.sudo && req.platform.supports_sudo()) {
        exec.run(&cmd).await?;
    }

    let suffix = arch_suffix(&req.arch)
        .with_context(|| format!("no tmate release for architecture {}", req.arch))?;
    let url = release_url(suffix);
    let archive = req.tmp_dir.join(format!("tmate-{TMATE_VERSION}.tar.xz"));
    downloader.download(&url, &archive).await.with_context(|| format!("downloading {url}"))?;

    let dir = req.tmp_dir.join("tmate");
    let program = dir.join("tmate");
    if tokio::fs::try_exists(&program).await.unwrap_or(false) {
        tokio::fs::remove_file(&program)
            .await
            .with_context(|| format!("removing stale {}", program.display()))?;
    }
    tokio::fs::create_dir_all(&dir).await.with_context(|| format!("creating {}", dir.display()))?;

    let extract = ShellCommand::new("tar")
        .arg("x")
        .arg("-C")
        .arg(dir.to_string_lossy())
        .arg("-f")
        .arg(archive.to_string_lossy())
        .arg("--strip-components=1");
    exec.run(&extract).await?;
    tokio::fs::remove_file(&archive)
        .await
        .with_context(|| format!("removing {}", archive.display()))?;

    info!(path = %program.display(), version = TMATE_VERSION, "installed tmate");
    Ok(program.to_string_lossy().into_owned())
}

#[cfg(test)]
#[path = "install_tests.rs"]
mod tests;
