//! Webhook ingestion endpoint (`POST /wh`) plus health and introspection routes.
//!
//! Checks run in order: body ceiling, timestamp, signature, JSON, message dedupe.
//! Accepted envelopes are acknowledged before any side effect; mark-read and routing
//! happen on detached tasks.

use crate::adapters::webhook::signature::{
    SIGNATURE_HEADER, TIMESTAMP_HEADER, verify_signature, verify_timestamp,
};
use crate::domain::Envelope;
use crate::domain::jid;
use crate::ports::EngineControlPort;
use crate::shared::config::ServerSettings;
use crate::shared::shutdown::{CancelRx, cancelled};
use crate::usecases::dedupe::DedupeCache;
use crate::usecases::router::Router as EnvelopeRouter;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Request validation applied before an envelope is accepted.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    pub secret: Option<String>,
    pub require_sig: bool,
    pub use_timestamp: bool,
    pub ts_skew: Duration,
    pub body_limit: usize,
}

impl IngestPolicy {
    pub fn from_settings(s: &ServerSettings) -> Self {
        Self {
            secret: s.secret.clone(),
            require_sig: s.require_sig,
            use_timestamp: s.use_timestamp,
            ts_skew: s.ts_skew,
            body_limit: s.body_limit,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestRejection {
    #[error("stale or missing timestamp")]
    Timestamp,

    #[error("bad signature")]
    Signature,

    #[error("bad json: {0}")]
    Json(String),
}

impl IntoResponse for IngestRejection {
    fn into_response(self) -> Response {
        let status = match self {
            IngestRejection::Timestamp | IngestRejection::Signature => StatusCode::UNAUTHORIZED,
            IngestRejection::Json(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({"ok": false, "error": self.to_string()}))).into_response()
    }
}

pub struct IngestState {
    pub policy: IngestPolicy,
    pub dedupe: Arc<DedupeCache>,
    pub router: Arc<EnvelopeRouter>,
    pub engine: Arc<dyn EngineControlPort>,
}

pub fn router(state: Arc<IngestState>) -> Router {
    let limit = state.policy.body_limit;
    Router::new()
        .route("/wh", post(webhook))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index))
        .route("/debug/profiles", get(debug_profiles))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<IngestState>,
    mut cancel: CancelRx,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancelled(&mut cancel).await })
        .await
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Runs the synchronous checks and decodes the envelope.
pub fn validate(
    policy: &IngestPolicy,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Envelope, IngestRejection> {
    if policy.use_timestamp
        && !verify_timestamp(header(headers, TIMESTAMP_HEADER), policy.ts_skew, Utc::now())
    {
        return Err(IngestRejection::Timestamp);
    }
    if policy.require_sig {
        if let Some(secret) = policy.secret.as_deref().filter(|s| !s.is_empty()) {
            if !verify_signature(secret, body, header(headers, SIGNATURE_HEADER)) {
                return Err(IngestRejection::Signature);
            }
        }
    }
    serde_json::from_slice(body).map_err(|e| IngestRejection::Json(e.to_string()))
}

async fn webhook(
    State(state): State<Arc<IngestState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, IngestRejection> {
    let env = match validate(&state.policy, &headers, &body) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "webhook rejected");
            return Err(e);
        }
    };
    if env.is_message() && state.dedupe.seen(&env.message_id) {
        debug!(id = %env.message_id, "duplicate message");
        return Ok(Json(json!({"ok": true, "dup": true})));
    }

    if env.is_message() && !env.is_outbound() && !env.message_id.is_empty() {
        let engine = Arc::clone(&state.engine);
        let env = env.clone();
        tokio::spawn(async move { mark_read(engine.as_ref(), &env).await });
    }
    let router = Arc::clone(&state.router);
    tokio::spawn(async move { router.route(&env).await });

    Ok(Json(json!({"ok": true})))
}

async fn mark_read(engine: &dyn EngineControlPort, env: &Envelope) {
    let chat = jid::canonical_chat_id(&env.chat_id);
    if chat.is_empty() {
        return;
    }
    let sender = if jid::is_group(&chat) {
        Some(env.sender_id.as_str()).filter(|s| !s.trim().is_empty())
    } else {
        None
    };
    let ids = [env.message_id.clone()];
    if let Err(e) = engine.mark_read(&chat, &ids, sender, None).await {
        warn!(chat = %chat, id = %env.message_id, error = %e, "mark read failed");
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

async fn index() -> &'static str {
    "whserver: POST /wh"
}

async fn debug_profiles(State(state): State<Arc<IngestState>>) -> Json<serde_json::Value> {
    let profiles = state.router.profiles().snapshot_all();
    Json(json!({"count": profiles.len(), "profiles": profiles}))
}
