// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session coordination against a mock OAuth issuer, with a
//! file store shared the way sibling processes would share it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use credmux::session::epoch_ms;
use credmux::store::ValueStore;
use credmux::{
    CoordinatorConfig, FileStore, GetOptions, HttpIssuer, LocalLocks, Session,
    SessionCoordinator, SessionError, TokenSet,
};

struct IssuerState {
    generation: u32,
    refresh_calls: u32,
    revoke_calls: u32,
    deny: bool,
}

type SharedState = Arc<Mutex<IssuerState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, IssuerState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn token(
    State(state): State<SharedState>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut s = lock(&state);
    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        );
    }
    if s.deny {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token already used",
            })),
        );
    }
    s.refresh_calls += 1;
    s.generation += 1;
    let n = s.generation;
    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("access-{n}"),
            "refresh_token": format!("refresh-{n}"),
            "expires_in": 3600,
        })),
    )
}

async fn revoke(State(state): State<SharedState>) -> impl IntoResponse {
    lock(&state).revoke_calls += 1;
    StatusCode::OK
}

async fn start_issuer(state: SharedState) -> String {
    let app = Router::new()
        .route("/token", post(token))
        .route("/revoke", post(revoke))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

fn stale_session(iss: &str, sub: &str) -> Session {
    Session {
        token_set: TokenSet {
            iss: iss.to_owned(),
            sub: sub.to_owned(),
            access_token: "access-0".to_owned(),
            refresh_token: Some("refresh-0".to_owned()),
            expires_at_ms: Some(epoch_ms() + 1_000),
        },
        dpop_key: None,
    }
}

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        stale_lead_ms: 60_000,
        stale_jitter_ms: 0,
        reconcile_wait_ms: 300,
        acquire_timeout_ms: 5_000,
    }
}

fn coordinator(base: &str, store: Arc<FileStore<Session>>) -> SessionCoordinator {
    let issuer = Arc::new(HttpIssuer::new(
        base,
        format!("{base}/token"),
        Some(format!("{base}/revoke")),
        "test-client",
    ));
    SessionCoordinator::new(store, issuer, Arc::new(LocalLocks::new()), test_config())
}

fn issuer_state() -> SharedState {
    Arc::new(Mutex::new(IssuerState {
        generation: 0,
        refresh_calls: 0,
        revoke_calls: 0,
        deny: false,
    }))
}

// -- Refresh persisted through the file store ---------------------------------

#[tokio::test]
async fn refresh_survives_coordinator_restart() {
    let state = issuer_state();
    let base = start_issuer(Arc::clone(&state)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    let store = Arc::new(FileStore::new(&path));
    store.set("alice", stale_session(&base, "alice")).await.expect("seed");

    let coord = coordinator(&base, Arc::clone(&store));
    let session = coord.get("alice", GetOptions::default(), None).await.expect("get");
    assert_eq!(session.token_set.access_token, "access-1");
    assert_eq!(lock(&state).refresh_calls, 1);
    drop(coord);

    // A fresh coordinator on the same file serves the refreshed session
    // without going back to the issuer.
    let coord = coordinator(&base, Arc::new(FileStore::new(&path)));
    let session = coord.get("alice", GetOptions::default(), None).await.expect("get");
    assert_eq!(session.token_set.access_token, "access-1");
    assert_eq!(lock(&state).refresh_calls, 1);
}

// -- Denial reconciliation across processes -----------------------------------

#[tokio::test]
async fn denied_refresh_adopts_sibling_process_session() {
    let state = issuer_state();
    lock(&state).deny = true;
    let base = start_issuer(Arc::clone(&state)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    let store = Arc::new(FileStore::new(&path));
    store.set("alice", stale_session(&base, "alice")).await.expect("seed");

    // A "sibling process" finishes its refresh and persists while our
    // refresh is being denied.
    let sibling: FileStore<Session> = FileStore::new(&path);
    let winner_iss = base.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let winner = Session {
            token_set: TokenSet {
                iss: winner_iss,
                sub: "alice".to_owned(),
                access_token: "sibling-access".to_owned(),
                refresh_token: Some("sibling-refresh".to_owned()),
                expires_at_ms: Some(epoch_ms() + 3_600_000),
            },
            dpop_key: None,
        };
        sibling.set("alice", winner).await.expect("sibling write");
    });

    let coord = coordinator(&base, store);
    let session = coord.get("alice", GetOptions::default(), None).await.expect("get");
    assert_eq!(session.token_set.access_token, "sibling-access");
}

// -- Unreconciled denial ------------------------------------------------------

#[tokio::test]
async fn unreconciled_denial_evicts_stored_session() {
    let state = issuer_state();
    lock(&state).deny = true;
    let base = start_issuer(Arc::clone(&state)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    let store = Arc::new(FileStore::new(&path));
    store.set("alice", stale_session(&base, "alice")).await.expect("seed");

    let coord = coordinator(&base, Arc::clone(&store));
    let err = coord.get("alice", GetOptions::default(), None).await.expect_err("should fail");
    assert!(matches!(err, SessionError::RefreshDenied { .. }));
    assert_eq!(store.get("alice").await.expect("get"), None);
}

// -- Revocation ---------------------------------------------------------------

#[tokio::test]
async fn revoke_hits_issuer_and_clears_store() {
    let state = issuer_state();
    let base = start_issuer(Arc::clone(&state)).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");

    let store = Arc::new(FileStore::new(&path));
    store.set("alice", stale_session(&base, "alice")).await.expect("seed");

    let coord = coordinator(&base, Arc::clone(&store));
    coord.revoke("alice").await.expect("revoke");
    assert_eq!(lock(&state).revoke_calls, 1);
    assert_eq!(store.get("alice").await.expect("get"), None);
}

// -- Transport failure leaves the store intact --------------------------------

#[tokio::test]
async fn unreachable_issuer_keeps_stored_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sessions.json");
    // Nothing is listening here.
    let base = "http://127.0.0.1:1";

    let store = Arc::new(FileStore::new(&path));
    store.set("alice", stale_session(base, "alice")).await.expect("seed");

    let coord = coordinator(base, Arc::clone(&store));
    let err = coord.get("alice", GetOptions::default(), None).await.expect_err("should fail");
    assert!(err.is_transport());
    assert!(store.get("alice").await.expect("get").is_some());
}
