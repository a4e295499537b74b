// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Configuration for the session coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Lead time before expiry at which a token counts as stale (ms).
    /// Leeway so the token is still accepted when it reaches the server.
    #[serde(default = "default_stale_lead_ms")]
    pub stale_lead_ms: u64,

    /// Upper bound of random extra lead added per staleness check (ms).
    /// Spreads refreshes of processes started simultaneously. Zero disables.
    #[serde(default = "default_stale_jitter_ms")]
    pub stale_jitter_ms: u64,

    /// Wait before re-reading the store after a denied refresh (ms),
    /// giving a concurrent refresher time to finish persisting.
    #[serde(default = "default_reconcile_wait_ms")]
    pub reconcile_wait_ms: u64,

    /// Hard cap on any single session acquisition (ms), independent of
    /// caller-supplied cancellation.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_stale_lead_ms() -> u64 {
    60_000
}

fn default_stale_jitter_ms() -> u64 {
    10_000
}

fn default_reconcile_wait_ms() -> u64 {
    1_000
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stale_lead_ms: default_stale_lead_ms(),
            stale_jitter_ms: default_stale_jitter_ms(),
            reconcile_wait_ms: default_reconcile_wait_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn stale_lead(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stale_lead_ms)
    }

    pub fn reconcile_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconcile_wait_ms)
    }

    pub fn acquire_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Configuration for the call-intercepting agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the service, e.g. `http://localhost:9800`.
    pub service: String,

    /// Per-request timeout (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl AgentConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into(), request_timeout_ms: default_request_timeout_ms() }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}
