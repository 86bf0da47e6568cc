// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH key material: the runner's own key pair and, for restricted access,
//! the actor's registered public keys.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::TetherError;
use crate::options::AccessMode;
use crate::shell::{Executor, ShellCommand};

/// Boxed future returned by [`KeySource::public_keys`].
pub type KeysFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + 'a>>;

/// Lookup of an identity's registered public keys.
pub trait KeySource: Send + Sync {
    fn public_keys<'a>(&'a self, actor: &'a str) -> KeysFuture<'a>;
}

/// `GET {api}/users/{actor}/keys` on the GitHub REST API.
pub struct GithubKeys {
    client: reqwest::Client,
    api_url: String,
}

impl GithubKeys {
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self { client, api_url: api_url.trim_end_matches('/').to_owned() }
    }

    async fn fetch(&self, actor: &str) -> anyhow::Result<Vec<String>> {
        #[derive(Deserialize)]
        struct PublicKey {
            key: String,
        }

        let url = format!("{}/users/{actor}/keys", self.api_url);
        debug!(%url, "fetching public keys");
        let keys: Vec<PublicKey> = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(keys.into_iter().map(|k| k.key).collect())
    }
}

impl KeySource for GithubKeys {
    fn public_keys<'a>(&'a self, actor: &'a str) -> KeysFuture<'a> {
        Box::pin(self.fetch(actor))
    }
}

/// Generate `id_rsa` in `ssh_dir` unless one already exists.
pub async fn ensure_ssh_key(exec: &dyn Executor, ssh_dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(ssh_dir)
        .await
        .with_context(|| format!("creating {}", ssh_dir.display()))?;
    let key = ssh_dir.join("id_rsa");
    if tokio::fs::try_exists(&key).await.unwrap_or(false) {
        debug!(path = %key.display(), "ssh key already present");
        return Ok(());
    }
    let cmd = ShellCommand::new("ssh-keygen")
        .args(["-q", "-t", "rsa", "-N", "", "-f"])
        .arg(key.to_string_lossy());
    exec.run(&cmd).await.context("generating ssh key")?;
    info!(path = %key.display(), "generated ssh key");
    Ok(())
}

/// Who the session admits, as decided before launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Anyone with the connection string; `warning` explains a fallback.
    Open { warning: Option<String> },
    /// Only holders of the keys written to `authorized_keys`.
    Restricted { authorized_keys: PathBuf },
}

impl Access {
    pub fn authorized_keys(&self) -> Option<&Path> {
        match self {
            Self::Restricted { authorized_keys } => Some(authorized_keys),
            Self::Open { .. } => None,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Open { warning } => warning.as_deref(),
            Self::Restricted { .. } => None,
        }
    }
}

/// Resolve the access mode into concrete launch settings.
pub async fn authorize(
    source: &dyn KeySource,
    mode: AccessMode,
    actor: &str,
    ssh_dir: &Path,
) -> anyhow::Result<Access> {
    if mode == AccessMode::Open {
        return Ok(Access::Open { warning: None });
    }

    let keys = match source.public_keys(actor).await {
        Ok(keys) => keys,
        Err(e) if mode == AccessMode::Auto => {
            warn!(actor, err = %e, "public key lookup failed, leaving session open");
            Vec::new()
        }
        Err(e) => {
            let message = format!("Could not fetch public SSH keys for {actor}: {e}");
            return Err(TetherError::IdentityLookup(message).into());
        }
    };

    if keys.is_empty() {
        let message = format!("No public SSH keys registered with {actor}'s GitHub profile");
        if mode == AccessMode::Restricted {
            return Err(TetherError::IdentityLookup(message).into());
        }
        return Ok(Access::Open { warning: Some(format!("{message}; access is not restricted")) });
    }

    tokio::fs::create_dir_all(ssh_dir)
        .await
        .with_context(|| format!("creating {}", ssh_dir.display()))?;
    let path = ssh_dir.join("authorized_keys");
    let mut contents = keys.join("\n");
    contents.push('\n');
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(actor, count = keys.len(), "restricted session to registered keys");
    Ok(Access::Restricted { authorized_keys: path })
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
