// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle events delivered to the persistence handler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One externally observable session lifecycle transition.
///
/// Exactly one event is emitted per transition, synchronously, in the
/// order transitions complete. Events carry the resulting session data
/// (absent for the failure variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEvent {
    /// A session was established by account creation or login.
    Create,
    /// Account creation or login failed; no session exists.
    CreateFailed,
    /// An existing session was refreshed or successfully resumed.
    Update,
    /// A resumed credential was rejected or unreachable; no session exists.
    NetworkError,
}

impl SessionEvent {
    /// Wire-format name for this event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateFailed => "create-failed",
            Self::Update => "update",
            Self::NetworkError => "network-error",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
