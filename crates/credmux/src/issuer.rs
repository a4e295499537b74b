// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Issuer transport: token refresh and revocation.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::error::SessionError;
use crate::session::{epoch_ms, Session, TokenSet};

/// Token endpoint operations the coordinator needs. Object-safe.
pub trait Issuer: Send + Sync {
    /// Exchange the session's refresh token for a new token set.
    ///
    /// Fails with [`SessionError::RefreshDenied`] when the issuer reports
    /// the refresh token was already consumed or is otherwise invalid,
    /// and [`SessionError::Transport`] for anything network-shaped.
    fn refresh<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<TokenSet, SessionError>>;

    /// Best-effort revocation of a token at the issuer.
    fn revoke<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), SessionError>>;
}

/// OAuth token response from the issuer.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth error response from the issuer.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP issuer speaking the standard form-encoded token endpoint protocol.
pub struct HttpIssuer {
    http: reqwest::Client,
    iss: String,
    token_url: String,
    revoke_url: Option<String>,
    client_id: String,
}

impl HttpIssuer {
    pub fn new(
        iss: impl Into<String>,
        token_url: impl Into<String>,
        revoke_url: Option<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http: crate::http::client(Duration::from_secs(30)),
            iss: iss.into(),
            token_url: token_url.into(),
            revoke_url,
            client_id: client_id.into(),
        }
    }

    async fn do_refresh(&self, session: &Session) -> Result<TokenSet, SessionError> {
        let prev = &session.token_set;
        let refresh_token = prev
            .refresh_token
            .as_deref()
            .ok_or_else(|| SessionError::RefreshDenied {
                detail: "no refresh token available".to_owned(),
            })?;

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| SessionError::transport(format!("refresh request: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::transport(format!("read refresh body: {e}")))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                if err.error == "invalid_grant" {
                    return Err(SessionError::RefreshDenied {
                        detail: err.error_description.unwrap_or(err.error),
                    });
                }
                return Err(SessionError::transport(format!(
                    "{}: {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                )));
            }
            return Err(SessionError::transport(format!("refresh failed (HTTP {status})")));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::transport(format!("parse refresh response: {e}")))?;

        Ok(TokenSet {
            iss: self.iss.clone(),
            sub: prev.sub.clone(),
            access_token: token.access_token,
            // The issuer may rotate the refresh token; keep the old one
            // when it does not.
            refresh_token: token.refresh_token.or_else(|| prev.refresh_token.clone()),
            expires_at_ms: token.expires_in.map(|s| epoch_ms() + s * 1000),
        })
    }

    async fn do_revoke(&self, token: &str) -> Result<(), SessionError> {
        let Some(revoke_url) = &self.revoke_url else {
            return Ok(());
        };
        let resp = self
            .http
            .post(revoke_url)
            .form(&[("token", token), ("client_id", &self.client_id)])
            .send()
            .await
            .map_err(|e| SessionError::transport(format!("revoke request: {e}")))?;
        if !resp.status().is_success() {
            return Err(SessionError::transport(format!(
                "revoke failed (HTTP {})",
                resp.status()
            )));
        }
        Ok(())
    }
}

impl Issuer for HttpIssuer {
    fn refresh<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<TokenSet, SessionError>> {
        Box::pin(self.do_refresh(session))
    }

    fn revoke<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(self.do_revoke(token))
    }
}
