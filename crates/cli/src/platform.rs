// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-platform paths and conventions for the runner OS.

use std::path::{Path, PathBuf};

/// Runner operating system families that need different tmate handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    /// Windows runners drive tmate through MSYS2.
    Windows,
}

/// MSYS2 root on hosted Windows runners.
const MSYS_ROOT: &str = "C:/msys64";

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// Scratch directory that tmate and the login shell agree on.
    pub fn tmp_dir(&self) -> PathBuf {
        match self {
            Self::Windows => PathBuf::from(format!("{MSYS_ROOT}/tmp")),
            Self::Linux | Self::MacOs => PathBuf::from("/tmp"),
        }
    }

    /// Control socket for the one session of this run.
    pub fn socket_path(&self) -> PathBuf {
        self.tmp_dir().join("tmate.sock")
    }

    /// Fixed location of the continue marker (the workspace one is added by the probe).
    pub fn default_continue_marker(&self) -> PathBuf {
        match self {
            Self::Windows => PathBuf::from(format!("{MSYS_ROOT}/continue")),
            Self::Linux | Self::MacOs => PathBuf::from("/continue"),
        }
    }

    /// Both continue-marker candidates, fixed path first.
    pub fn continue_markers(&self, workspace: Option<&Path>) -> Vec<PathBuf> {
        let mut markers = vec![self.default_continue_marker()];
        if let Some(ws) = workspace {
            markers.push(ws.join("continue"));
        }
        markers
    }

    /// Whether dependency installs go through `sudo` when requested.
    pub fn supports_sudo(&self) -> bool {
        matches!(self, Self::Linux)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => f.write_str("linux"),
            Self::MacOs => f.write_str("macos"),
            Self::Windows => f.write_str("windows"),
        }
    }
}
