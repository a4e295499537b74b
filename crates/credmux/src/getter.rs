// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic single-flight cache over an external store.
//!
//! Wrapping a store in a [`CachedGetter`] guarantees that at most one
//! fresh producer call is ever active per identity, cache-wide: every
//! concurrent `get` for the same identity joins the in-flight production
//! and observes its single result. Production runs on a detached task so
//! that a caller abandoning its wait can never discard a refreshed value
//! before it has been persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::store::ValueStore;

/// Options for a single cached read.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Produce a fresh value even if the stored one is not stale.
    pub no_cache: bool,
    /// Never produce for staleness; return the stored value as-is.
    /// An absent stored value still triggers production.
    pub allow_stale: bool,
}

/// Produces a fresh value for an identity, given whatever the store
/// currently holds. This is where the network refresh happens.
pub trait Producer<V>: Send + Sync {
    fn produce<'a>(
        &'a self,
        id: &'a str,
        options: GetOptions,
        stored: Option<V>,
    ) -> BoxFuture<'a, Result<V, SessionError>>;
}

/// Staleness, eviction, and compensation policy for cached values.
pub trait CachePolicy<V>: Send + Sync {
    /// Whether the stored value must be refreshed before being returned.
    fn is_stale(&self, id: &str, value: &V) -> bool;

    /// Whether a failed production should evict the stored value.
    /// Only consulted when a stored value existed when production began.
    fn delete_on_error(&self, err: &SessionError, id: &str, value: &V) -> bool;

    /// Compensating action when a freshly produced value cannot be
    /// persisted (e.g. revoke it at the issuer). The store error is
    /// propagated afterwards regardless.
    fn on_store_error<'a>(&'a self, _id: &'a str, _value: &'a V) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

type SharedProduction<V> = Shared<BoxFuture<'static, Result<V, SessionError>>>;
type InflightMap<V> = Arc<Mutex<HashMap<String, SharedProduction<V>>>>;

/// Stale-aware keyed cache with single-flight production.
pub struct CachedGetter<V> {
    store: Arc<dyn ValueStore<V>>,
    producer: Arc<dyn Producer<V>>,
    policy: Arc<dyn CachePolicy<V>>,
    inflight: InflightMap<V>,
}

impl<V: Clone + Send + Sync + 'static> CachedGetter<V> {
    pub fn new(
        store: Arc<dyn ValueStore<V>>,
        producer: Arc<dyn Producer<V>>,
        policy: Arc<dyn CachePolicy<V>>,
    ) -> Self {
        Self { store, producer, policy, inflight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Read the stored value without any staleness handling.
    pub async fn get_stored(&self, id: &str) -> Result<Option<V>, SessionError> {
        self.store.get(id).await
    }

    /// Get the value for `id`, producing a fresh one when required.
    ///
    /// Joins an in-flight production for the same identity instead of
    /// starting a second one. All joined callers observe the same result.
    pub async fn get(&self, id: &str, options: GetOptions) -> Result<V, SessionError> {
        if let Some(pending) = self.pending(id) {
            return pending.await;
        }

        let stored = self.store.get(id).await?;
        if let Some(value) = &stored {
            if !options.no_cache && (options.allow_stale || !self.policy.is_stale(id, value)) {
                return Ok(value.clone());
            }
        }

        self.join_or_produce(id, options, stored).await
    }

    fn pending(&self, id: &str) -> Option<SharedProduction<V>> {
        self.inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Join the in-flight production for `id`, or start one.
    ///
    /// The entry is inserted before the producing task is spawned, and the
    /// task removes it before publishing its result, so a completed result
    /// is never served from the in-flight map.
    fn join_or_produce(
        &self,
        id: &str,
        options: GetOptions,
        stored: Option<V>,
    ) -> SharedProduction<V> {
        let mut inflight =
            self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = inflight.get(id) {
            return existing.clone();
        }

        let (tx, rx) = oneshot::channel::<Result<V, SessionError>>();
        let shared = rx
            .map(|recv| match recv {
                Ok(result) => result,
                Err(_) => Err(SessionError::transport("producer task aborted")),
            })
            .boxed()
            .shared();
        inflight.insert(id.to_owned(), shared.clone());

        let store = Arc::clone(&self.store);
        let producer = Arc::clone(&self.producer);
        let policy = Arc::clone(&self.policy);
        let map = Arc::clone(&self.inflight);
        let id = id.to_owned();
        tokio::spawn(async move {
            let result = produce_and_persist(&*store, &*producer, &*policy, &id, options, stored)
                .await;
            map.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
            let _ = tx.send(result);
        });

        shared
    }
}

/// Run one production: invoke the producer, persist on success (with
/// compensation if the store write fails), evict on failure when the
/// policy says so, and hand the original result to all joined callers.
async fn produce_and_persist<V: Clone>(
    store: &dyn ValueStore<V>,
    producer: &dyn Producer<V>,
    policy: &dyn CachePolicy<V>,
    id: &str,
    options: GetOptions,
    stored: Option<V>,
) -> Result<V, SessionError> {
    match producer.produce(id, options, stored.clone()).await {
        Ok(value) => {
            if let Err(store_err) = store.set(id, value.clone()).await {
                tracing::warn!(id, err = %store_err, "failed to persist produced value, compensating");
                policy.on_store_error(id, &value).await;
                return Err(store_err);
            }
            Ok(value)
        }
        Err(err) => {
            if let Some(prev) = &stored {
                if policy.delete_on_error(&err, id, prev) {
                    if let Err(del_err) = store.del(id).await {
                        tracing::warn!(id, err = %del_err, "failed to evict value after error");
                    }
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
#[path = "getter_tests.rs"]
mod tests;
