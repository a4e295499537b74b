// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential value types held by the coordinator.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// An immutable set of tokens issued for one subject.
///
/// A refresh always yields a new `TokenSet`; nothing mutates one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Issuer this set was obtained from.
    pub iss: String,
    /// Subject (account identifier) the tokens belong to.
    pub sub: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds. `None` means no known expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl TokenSet {
    /// Whether the access token expires within `lead` of now.
    pub fn expires_within(&self, lead: Duration) -> bool {
        match self.expires_at_ms {
            Some(expires_at) => expires_at < epoch_ms() + lead.as_millis() as u64,
            None => false,
        }
    }

    /// The token to present when revoking this set (refresh preferred,
    /// since revoking it invalidates the whole grant).
    pub fn revocable_token(&self) -> &str {
        self.refresh_token.as_deref().unwrap_or(&self.access_token)
    }
}

/// The cached credential value: a token set plus the proof-of-possession
/// key handle it is bound to, when the issuer requires one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token_set: TokenSet,
    /// Opaque handle to a bound proof-of-possession key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_key: Option<String>,
}

impl Session {
    pub fn sub(&self) -> &str {
        &self.token_set.sub
    }

    /// Whether `other` carries different tokens than this session.
    /// Used to detect a refresh completed by another process.
    pub fn tokens_differ(&self, other: &Session) -> bool {
        self.token_set.access_token != other.token_set.access_token
            || self.token_set.refresh_token != other.token_set.refresh_token
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
