// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session coordinator: the credential specialization of the cached getter.
//!
//! One coordinator serves all identities sharing a store. Per identity it
//! guarantees at most one in-flight refresh in this process; duplicate
//! refreshes from sibling processes sharing the store are reconciled
//! after the fact instead of surfacing as errors.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::SessionError;
use crate::getter::{CachePolicy, CachedGetter, GetOptions, Producer};
use crate::issuer::Issuer;
use crate::lock::LockProvider;
use crate::session::Session;
use crate::store::ValueStore;

/// Coordinates refreshes of stored sessions against an issuer.
pub struct SessionCoordinator {
    getter: CachedGetter<Session>,
    locks: Arc<dyn LockProvider>,
    store: Arc<dyn ValueStore<Session>>,
    issuer: Arc<dyn Issuer>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn ValueStore<Session>>,
        issuer: Arc<dyn Issuer>,
        locks: Arc<dyn LockProvider>,
        config: CoordinatorConfig,
    ) -> Self {
        let producer = Arc::new(SessionProducer {
            store: Arc::clone(&store),
            issuer: Arc::clone(&issuer),
            config: config.clone(),
        });
        let policy = Arc::new(SessionPolicy {
            issuer: Arc::clone(&issuer),
            config: config.clone(),
        });
        let getter = CachedGetter::new(Arc::clone(&store), producer, policy);
        Self { getter, locks, store, issuer, config }
    }

    /// Get a usable session for `sub`.
    ///
    /// The acquisition is bounded by the configured hard timeout. A
    /// cancellation token aborts *waiting* only; an in-flight refresh
    /// always runs to completion so a freshly issued token is never
    /// dropped unpersisted.
    pub async fn get(
        &self,
        sub: &str,
        options: GetOptions,
        signal: Option<CancellationToken>,
    ) -> Result<Session, SessionError> {
        let lock_name = format!("credmux:{sub}");
        let _lock = self.locks.acquire(&lock_name).await;

        let acquisition = tokio::time::timeout(self.config.acquire_timeout(), async {
            self.getter.get(sub, options).await
        });
        let session = match signal {
            Some(token) => tokio::select! {
                res = acquisition => res.map_err(|_| SessionError::Timeout)??,
                _ = token.cancelled() => return Err(SessionError::Timeout),
            },
            None => acquisition.await.map_err(|_| SessionError::Timeout)??,
        };

        // Fool-proofing against invalid session storage.
        if session.sub() != sub {
            return Err(SessionError::SubjectMismatch {
                expected: sub.to_owned(),
                actual: session.sub().to_owned(),
            });
        }
        Ok(session)
    }

    /// Convenience wrapper mirroring the tri-state refresh request:
    /// `Some(true)` forces a refresh even when fresh, `Some(false)` never
    /// refreshes even when stale, `None` refreshes only when stale.
    pub async fn get_session(
        &self,
        sub: &str,
        refresh: Option<bool>,
    ) -> Result<Session, SessionError> {
        let options = GetOptions {
            no_cache: refresh == Some(true),
            allow_stale: refresh == Some(false),
        };
        self.get(sub, options, None).await
    }

    /// Revoke the stored session for `sub` at the issuer (best-effort)
    /// and remove it from the store.
    pub async fn revoke(&self, sub: &str) -> Result<(), SessionError> {
        if let Some(session) = self.store.get(sub).await? {
            if let Err(e) = self.issuer.revoke(session.token_set.revocable_token()).await {
                tracing::warn!(sub, err = %e, "token revocation at issuer failed");
            }
        }
        self.store.del(sub).await
    }
}

/// Producer performing the actual issuer refresh, plus the recovery
/// paths that make concurrent refreshers safe.
struct SessionProducer {
    store: Arc<dyn ValueStore<Session>>,
    issuer: Arc<dyn Issuer>,
    config: CoordinatorConfig,
}

impl SessionProducer {
    async fn refresh(&self, sub: &str, stored: Option<Session>) -> Result<Session, SessionError> {
        // A refresh needs a previous session. An absent stored value means
        // it was cleared elsewhere (revocation, another process's logout):
        // tell the store so observers without a subscribe/notify channel
        // still learn about it, and fail without touching the network.
        let Some(stored) = stored else {
            let _ = self.store.del(sub).await;
            return Err(SessionError::Revoked { sub: sub.to_owned() });
        };

        if stored.sub() != sub {
            return Err(SessionError::SubjectMismatch {
                expected: sub.to_owned(),
                actual: stored.sub().to_owned(),
            });
        }

        match self.issuer.refresh(&stored).await {
            Ok(token_set) => {
                if token_set.sub != sub {
                    return Err(SessionError::SubjectMismatch {
                        expected: sub.to_owned(),
                        actual: token_set.sub,
                    });
                }
                Ok(Session { token_set, dpop_key: stored.dpop_key })
            }
            // Refresh tokens are single-use: a denial usually means another
            // process won the race. Give it time to persist, then adopt its
            // result when the stored tokens have changed.
            Err(err) if err.is_denial() => {
                tokio::time::sleep(self.config.reconcile_wait()).await;
                match self.store.get(sub).await {
                    Ok(Some(current)) if current.tokens_differ(&stored) => {
                        tracing::debug!(sub, "adopting concurrently refreshed session");
                        Ok(current)
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

impl Producer<Session> for SessionProducer {
    fn produce<'a>(
        &'a self,
        id: &'a str,
        _options: GetOptions,
        stored: Option<Session>,
    ) -> BoxFuture<'a, Result<Session, SessionError>> {
        Box::pin(self.refresh(id, stored))
    }
}

/// Staleness and eviction policy for stored sessions.
struct SessionPolicy {
    issuer: Arc<dyn Issuer>,
    config: CoordinatorConfig,
}

impl CachePolicy<Session> for SessionPolicy {
    fn is_stale(&self, _id: &str, session: &Session) -> bool {
        let mut lead = self.config.stale_lead();
        if self.config.stale_jitter_ms > 0 {
            // Randomized so simultaneously started processes do not all
            // refresh at the same instant.
            lead += std::time::Duration::from_millis(rand::random_range(
                0..self.config.stale_jitter_ms,
            ));
        }
        session.token_set.expires_within(lead)
    }

    fn delete_on_error(&self, err: &SessionError, _id: &str, session: &Session) -> bool {
        // Not possible to refresh without a refresh token.
        if session.token_set.refresh_token.is_none() {
            return true;
        }
        // An unreconciled denial or corrupt storage is unrecoverable.
        matches!(
            err,
            SessionError::RefreshDenied { .. }
                | SessionError::SubjectMismatch { .. }
                | SessionError::Revoked { .. }
        )
    }

    fn on_store_error<'a>(&'a self, id: &'a str, session: &'a Session) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // A credential that cannot be durably recorded must not stay
            // live at the issuer.
            if let Err(e) = self.issuer.revoke(session.token_set.revocable_token()).await {
                tracing::warn!(id, err = %e, "failed to revoke unpersistable token");
            }
        })
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
