// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod announce;
pub mod config;
pub mod error;
pub mod exit;
pub mod http;
pub mod install;
pub mod keys;
pub mod lifecycle;
pub mod options;
pub mod platform;
pub mod run;
pub mod shell;
pub mod signal;
pub mod state;
pub mod test_support;
pub mod tmate;
pub mod watch;
