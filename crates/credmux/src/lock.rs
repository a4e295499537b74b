// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named mutual-exclusion regions for refresh coordination.
//!
//! The lock is best-effort: its absence does not break correctness, it
//! only raises the chance of a duplicate cross-process refresh that the
//! coordinator then reconciles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::OwnedMutexGuard;

/// Held for the duration of a locked region. Dropping releases the lock.
pub struct LockGuard {
    _guard: Option<OwnedMutexGuard<()>>,
}

/// Provides named locks scoped to a credential identity. Object-safe.
pub trait LockProvider: Send + Sync {
    fn acquire<'a>(&'a self, name: &'a str) -> BoxFuture<'a, LockGuard>;
}

/// No-op provider for runtimes without a cross-task locking primitive.
pub struct NoopLock;

impl LockProvider for NoopLock {
    fn acquire<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, LockGuard> {
        Box::pin(async { LockGuard { _guard: None } })
    }
}

/// In-process named locks backed by one tokio mutex per name.
pub struct LocalLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }
}

impl Default for LocalLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for LocalLocks {
    fn acquire<'a>(&'a self, name: &'a str) -> BoxFuture<'a, LockGuard> {
        let slot = {
            let mut slots =
                self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(slots.entry(name.to_owned()).or_default())
        };
        Box::pin(async move { LockGuard { _guard: Some(slot.lock_owned().await) } })
    }
}
