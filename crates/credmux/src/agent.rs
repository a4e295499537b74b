// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call interceptor: wraps outbound service calls for the held session
//! and transparently survives one access-token expiry.
//!
//! The first caller to observe an expiry performs the refresh; callers
//! failing concurrently wait on the same refresh and then replay their
//! original call once with the new token. A second expiry on the replay
//! is surfaced as a hard failure, never retried again.

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};

use crate::config::AgentConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;

/// Service endpoint for account creation.
const ACCOUNT_PATH: &str = "/v1/account";
/// Service endpoint for session create (login), validate (GET) and
/// revoke (DELETE).
const SESSION_PATH: &str = "/v1/session";
/// Service endpoint exchanging a refresh token for new tokens.
const REFRESH_PATH: &str = "/v1/session/refresh";

/// The session data the agent holds and hands to the persistence handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSessionData {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

/// Parameters for [`Agent::create_account`].
#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountParams {
    pub handle: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// Session payload returned by the account, login, and refresh endpoints.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    sub: String,
    #[serde(default)]
    handle: Option<String>,
    access_token: String,
    refresh_token: String,
}

/// Subject info returned by `GET /v1/session`.
#[derive(Debug, Deserialize)]
struct SessionInfo {
    sub: String,
    #[serde(default)]
    handle: Option<String>,
}

/// Service error envelope.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

type PersistHandler = Box<dyn Fn(SessionEvent, Option<&AgentSessionData>) + Send + Sync>;
type SharedRefresh = Shared<BoxFuture<'static, Result<(), SessionError>>>;

/// Session-holding client for one service.
pub struct Agent {
    config: AgentConfig,
    http: reqwest::Client,
    session: RwLock<Option<AgentSessionData>>,
    /// The in-flight refresh, if any. The first expired caller drives it;
    /// everyone else joins and observes the same outcome, success or
    /// failure, instead of issuing their own refresh call.
    refresh_inflight: std::sync::Mutex<Option<SharedRefresh>>,
    persist: std::sync::Mutex<Option<PersistHandler>>,
}

impl Agent {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_config(AgentConfig::new(service))
    }

    pub fn with_config(config: AgentConfig) -> Self {
        let http = crate::http::client(config.request_timeout());
        Self {
            config,
            http,
            session: RwLock::new(None),
            refresh_inflight: std::sync::Mutex::new(None),
            persist: std::sync::Mutex::new(None),
        }
    }

    /// Replace the persistence handler. Past events are never re-delivered.
    pub fn set_persist_handler(
        &self,
        handler: impl Fn(SessionEvent, Option<&AgentSessionData>) + Send + Sync + 'static,
    ) {
        let mut persist =
            self.persist.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *persist = Some(Box::new(handler));
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn session(&self) -> Option<AgentSessionData> {
        self.session.read().await.clone()
    }

    /// Create a new account and establish a session with it.
    pub async fn create_account(
        &self,
        params: &CreateAccountParams,
    ) -> Result<AgentSessionData, SessionError> {
        let body = serde_json::to_value(params)
            .map_err(|e| SessionError::transport(format!("encode request: {e}")))?;
        match self.send(Method::POST, ACCOUNT_PATH, None, Some(&body)).await {
            Ok(value) => self.adopt_session(value, SessionEvent::Create).await,
            Err(err) => {
                self.emit(SessionEvent::CreateFailed, None);
                Err(err)
            }
        }
    }

    /// Establish a session for an existing account.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<AgentSessionData, SessionError> {
        let body = serde_json::to_value(LoginRequest { identifier, password })
            .map_err(|e| SessionError::transport(format!("encode request: {e}")))?;
        match self.send(Method::POST, SESSION_PATH, None, Some(&body)).await {
            Ok(value) => self.adopt_session(value, SessionEvent::Create).await,
            Err(err) => {
                self.emit(SessionEvent::CreateFailed, None);
                Err(err)
            }
        }
    }

    /// Resume a previously persisted session, validating it against the
    /// service. The validation call goes through the interceptor, so an
    /// expired-but-refreshable session is refreshed on the way in.
    pub async fn resume_session(
        &self,
        session: AgentSessionData,
    ) -> Result<AgentSessionData, SessionError> {
        let sub = session.sub.clone();
        *self.session.write().await = Some(session);

        let info = match self.call(Method::GET, SESSION_PATH, None).await {
            Ok(value) => {
                serde_json::from_value::<SessionInfo>(value)
                    .map_err(|e| SessionError::transport(format!("invalid session info: {e}")))
            }
            Err(err) => Err(err),
        };

        match info {
            Ok(info) if info.sub == sub => {
                let current = {
                    let mut guard = self.session.write().await;
                    if let Some(s) = guard.as_mut() {
                        s.handle = info.handle.or(s.handle.take());
                    }
                    guard.clone()
                };
                match current {
                    Some(current) => {
                        self.emit(SessionEvent::Update, Some(&current));
                        Ok(current)
                    }
                    // Session cleared out from under us mid-resume.
                    None => {
                        self.emit(SessionEvent::NetworkError, None);
                        Err(SessionError::Revoked { sub })
                    }
                }
            }
            Ok(info) => {
                *self.session.write().await = None;
                self.emit(SessionEvent::NetworkError, None);
                Err(SessionError::SubjectMismatch { expected: sub, actual: info.sub })
            }
            Err(err) => {
                *self.session.write().await = None;
                self.emit(SessionEvent::NetworkError, None);
                Err(err)
            }
        }
    }

    /// Best-effort logout: revoke the session at the service and drop it.
    pub async fn logout(&self) {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            if let Err(e) = self
                .send(Method::DELETE, SESSION_PATH, Some(&session.refresh_token), None)
                .await
            {
                tracing::debug!(err = %e, "session revocation on logout failed");
            }
        }
    }

    /// Make an authorized service call, transparently refreshing the
    /// session and replaying the call once if the access token expired.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, SessionError> {
        let access = self.session.read().await.as_ref().map(|s| s.access_token.clone());

        let first = self.send(method.clone(), path, access.as_deref(), body).await;
        let stale = match (&first, &access) {
            // Only an authorized, non-refresh call qualifies for a replay.
            (Err(SessionError::Expired), Some(token)) if path != REFRESH_PATH => token.clone(),
            _ => return first,
        };

        if self.refresh_session(&stale).await.is_err() {
            // The prior credential stays untouched; the original expiry
            // surfaces so the caller can retry later.
            return first;
        }

        let access = self.session.read().await.as_ref().map(|s| s.access_token.clone());
        self.send(method, path, access.as_deref(), body).await
    }

    /// Refresh the held session, deduplicating concurrent refreshers.
    ///
    /// `stale_token` is the access token the caller saw rejected; if the
    /// held session has already rotated past it, another caller finished
    /// the refresh and there is nothing to do. Otherwise join the
    /// in-flight attempt when one exists, or become the caller driving it.
    async fn refresh_session(&self, stale_token: &str) -> Result<(), SessionError> {
        if let Some(session) = self.session.read().await.as_ref() {
            if session.access_token != stale_token {
                return Ok(());
            }
        }

        let (attempt, driver) = {
            let mut inflight = self
                .refresh_inflight
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match inflight.as_ref() {
                Some(existing) => (existing.clone(), None),
                None => {
                    let (tx, rx) = oneshot::channel::<Result<(), SessionError>>();
                    let shared = rx
                        .map(|recv| match recv {
                            Ok(result) => result,
                            Err(_) => {
                                Err(SessionError::transport("refresh attempt abandoned"))
                            }
                        })
                        .boxed()
                        .shared();
                    *inflight = Some(shared.clone());
                    (shared, Some(tx))
                }
            }
        };

        let Some(tx) = driver else {
            return attempt.await;
        };

        let result = self.perform_refresh(stale_token).await;
        self.refresh_inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let _ = tx.send(result.clone());
        result
    }

    async fn perform_refresh(&self, stale_token: &str) -> Result<(), SessionError> {
        let refresh_token = {
            let session = self.session.read().await;
            match session.as_ref() {
                // Lost the race against an attempt that finished between
                // our staleness check and winning the slot.
                Some(s) if s.access_token != stale_token => return Ok(()),
                Some(s) => s.refresh_token.clone(),
                None => return Err(SessionError::Revoked { sub: String::new() }),
            }
        };

        let value = self
            .send(Method::POST, REFRESH_PATH, Some(&refresh_token), None)
            .await?;
        let updated = self.adopt_session(value, SessionEvent::Update).await?;
        tracing::debug!(sub = %updated.sub, "session refreshed");
        Ok(())
    }

    /// Parse a session payload, store it, and emit the lifecycle event.
    async fn adopt_session(
        &self,
        value: Value,
        event: SessionEvent,
    ) -> Result<AgentSessionData, SessionError> {
        let resp: SessionResponse = match serde_json::from_value(value) {
            Ok(resp) => resp,
            Err(e) => {
                if event == SessionEvent::Create {
                    self.emit(SessionEvent::CreateFailed, None);
                }
                return Err(SessionError::transport(format!("invalid session payload: {e}")));
            }
        };
        let data = AgentSessionData {
            sub: resp.sub,
            handle: resp.handle,
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
        };
        *self.session.write().await = Some(data.clone());
        self.emit(event, Some(&data));
        Ok(data)
    }

    /// Invoke the persistence handler synchronously. Handler behavior is
    /// not this component's concern and never affects the transition.
    fn emit(&self, event: SessionEvent, session: Option<&AgentSessionData>) {
        let persist = self.persist.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handler) = persist.as_ref() {
            handler(event, session);
        }
    }

    /// One HTTP round-trip with error classification.
    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, SessionError> {
        let url = format!("{}{}", self.config.service, path);
        let mut req = self.http.request(method, &url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SessionError::transport(format!("{path}: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SessionError::transport(format!("{path}: read body: {e}")))?;

        if status.is_success() {
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| SessionError::transport(format!("{path}: invalid body: {e}")));
        }

        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(err) if status.as_u16() == 400 && err.error == "ExpiredToken" => {
                Err(SessionError::Expired)
            }
            Ok(err) => Err(SessionError::Protocol {
                status: status.as_u16(),
                code: err.error,
                message: err.message.unwrap_or_default(),
            }),
            Err(_) => Err(SessionError::transport(format!("{path}: HTTP {status}"))),
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
