// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared HTTP client construction.

use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
fn ensure_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build a client with the process-wide crypto provider in place.
pub(crate) fn client(timeout: Duration) -> reqwest::Client {
    ensure_crypto_provider();
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_default()
}
