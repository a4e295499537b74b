// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error classification for session coordination.
//!
//! The distinction that matters operationally is denial vs. transport:
//! a denial means the refresh token was consumed (possibly by a concurrent
//! refresher and therefore reconcilable), a transport failure means the
//! stored credential is still presumed valid and must not be touched.

use std::fmt;

/// Classified failures in the session coordination layer.
///
/// Cloneable so a single production result can be fanned out to every
/// caller joined on the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No stored credential where one was expected: the session was
    /// revoked or cleared by another process.
    Revoked { sub: String },
    /// A stored or freshly produced credential carries a different subject
    /// than the one requested. Corrupt or foreign storage; never retried.
    SubjectMismatch { expected: String, actual: String },
    /// The issuer rejected the refresh token as already used or invalid.
    RefreshDenied { detail: String },
    /// Network-level failure reaching the issuer or the service.
    Transport { detail: String },
    /// The service reported the live access token is no longer accepted.
    Expired,
    /// The external store failed to read or write.
    Store { detail: String },
    /// Acquisition exceeded its hard deadline or was cancelled while waiting.
    Timeout,
    /// Structured non-expiry error from the service.
    Protocol { status: u16, code: String, message: String },
}

impl SessionError {
    /// Whether this failure means the refresh token was consumed elsewhere
    /// and the store should be re-read before giving up.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::RefreshDenied { .. })
    }

    /// Whether this failure is transient and leaves the stored credential
    /// presumed valid.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport { detail: detail.into() }
    }

    pub fn store(detail: impl Into<String>) -> Self {
        Self::Store { detail: detail.into() }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revoked { sub } => write!(f, "session revoked for {sub}"),
            Self::SubjectMismatch { expected, actual } => {
                write!(f, "stored session subject mismatch: expected {expected}, got {actual}")
            }
            Self::RefreshDenied { detail } => write!(f, "refresh denied: {detail}"),
            Self::Transport { detail } => write!(f, "transport error: {detail}"),
            Self::Expired => f.write_str("ExpiredToken"),
            Self::Store { detail } => write!(f, "store error: {detail}"),
            Self::Timeout => f.write_str("acquisition timed out"),
            Self::Protocol { status, code, message } => {
                write!(f, "{code} (HTTP {status}): {message}")
            }
        }
    }
}

impl std::error::Error for SessionError {}
