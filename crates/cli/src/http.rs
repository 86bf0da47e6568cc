// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared HTTP client setup.

use std::sync::Once;
use std::time::Duration;

static CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (reqwest is built without one).
pub fn ensure_crypto_provider() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Client used for key lookups and release downloads.
pub fn client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    ensure_crypto_provider();
    Ok(reqwest::Client::builder()
        .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}
