// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credmux: coordinated credential refresh for shared session stores.
//!
//! Three layers, each usable on its own:
//!
//! - [`getter::CachedGetter`]: a generic single-flight cache over an
//!   external [`store::ValueStore`]. At most one producer call per
//!   identity; concurrent readers join the in-flight production.
//! - [`coordinator::SessionCoordinator`]: the credential specialization.
//!   Staleness-driven token refresh against an [`issuer::Issuer`], with
//!   reconciliation when a sibling process consumed the refresh token
//!   first.
//! - [`agent::Agent`]: a session-holding service client that intercepts
//!   expired-token failures, refreshes once, and replays the call.

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod getter;
mod http;
pub mod issuer;
pub mod lock;
pub mod session;
pub mod store;

pub use agent::{Agent, AgentSessionData, CreateAccountParams};
pub use config::{AgentConfig, CoordinatorConfig};
pub use coordinator::SessionCoordinator;
pub use error::SessionError;
pub use events::SessionEvent;
pub use getter::{CachedGetter, CachePolicy, GetOptions, Producer};
pub use issuer::{HttpIssuer, Issuer};
pub use lock::{LocalLocks, LockGuard, LockProvider, NoopLock};
pub use session::{Session, TokenSet};
pub use store::{FileStore, MemoryStore, ValueStore};
