//! Engine control surface: outbound sends, presence, receipts, history and raw event intake.
//!
//! Every mutating route answers `{success, message, id?}`; domain failures become 500.

use crate::domain::{DomainError, RawEvent};
use crate::ports::{HistoryEntry, PresenceMedia};
use crate::shared::shutdown::{CancelRx, cancelled};
use crate::usecases::engine::Engine;
use crate::usecases::media::MediaInput;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    #[serde(default)]
    pub message: String,
    /// Local file to send as media; `message` becomes its caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingRequest {
    pub recipient: String,
    pub typing: bool,
    #[serde(default)]
    pub media: PresenceMedia,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub recipient: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub chat: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub struct ControlState {
    pub engine: Arc<Engine>,
    pub events: mpsc::Sender<RawEvent>,
}

type Reply = (StatusCode, Json<ControlResponse>);

fn ok(message: &str, id: Option<String>) -> Reply {
    (
        StatusCode::OK,
        Json(ControlResponse {
            success: true,
            message: message.to_string(),
            id,
        }),
    )
}

fn fail(status: StatusCode, message: impl Into<String>) -> Reply {
    (
        status,
        Json(ControlResponse {
            success: false,
            message: message.into(),
            id: None,
        }),
    )
}

fn domain_fail(e: DomainError) -> Reply {
    let status = match e {
        DomainError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e.to_string())
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/api/send", post(send))
        .route("/api/typing", post(typing))
        .route("/api/markread", post(mark_read))
        .route("/api/history", get(history))
        .route("/events", post(ingest_event))
        .with_state(state)
}

/// Serves until `cancel` flips.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ControlState>,
    mut cancel: CancelRx,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancelled(&mut cancel).await })
        .await
}

async fn send(State(state): State<Arc<ControlState>>, Json(req): Json<SendRequest>) -> Reply {
    if req.recipient.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "recipient is required");
    }
    let media_path = req
        .media_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let sent = match media_path {
        Some(p) => {
            let path = PathBuf::from(p);
            let data = match tokio::fs::read(&path).await {
                Ok(d) => d,
                Err(e) => {
                    return fail(
                        StatusCode::BAD_REQUEST,
                        format!("cannot read {}: {}", path.display(), e),
                    );
                }
            };
            let input = MediaInput::from_file(&path, data, req.message.clone());
            state.engine.send_media(&req.recipient, input).await
        }
        None if req.message.trim().is_empty() => {
            return fail(StatusCode::BAD_REQUEST, "message or media_path is required");
        }
        None => state.engine.send_text(&req.recipient, &req.message).await,
    };
    match sent {
        Ok(id) => ok("sent", Some(id)),
        Err(e) => {
            warn!(recipient = %req.recipient, error = %e, "send failed");
            domain_fail(e)
        }
    }
}

async fn typing(State(state): State<Arc<ControlState>>, Json(req): Json<TypingRequest>) -> Reply {
    match state
        .engine
        .set_typing(&req.recipient, req.typing, req.media)
        .await
    {
        Ok(()) => ok(if req.typing { "composing" } else { "paused" }, None),
        Err(e) => domain_fail(e),
    }
}

async fn mark_read(
    State(state): State<Arc<ControlState>>,
    Json(req): Json<MarkReadRequest>,
) -> Reply {
    if req.message_ids.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "message_ids is required");
    }
    match state
        .engine
        .mark_read(
            &req.recipient,
            &req.message_ids,
            req.sender.as_deref(),
            req.receipt_type.as_deref(),
        )
        .await
    {
        Ok(()) => ok("marked", None),
        Err(e) => domain_fail(e),
    }
}

async fn history(
    State(state): State<Arc<ControlState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, Reply> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    state
        .engine
        .recent_history(&q.chat, limit)
        .await
        .map(Json)
        .map_err(domain_fail)
}

async fn ingest_event(
    State(state): State<Arc<ControlState>>,
    Json(event): Json<RawEvent>,
) -> Reply {
    let kind = event.kind().to_string();
    match state.events.send(event).await {
        Ok(()) => ok("queued", None),
        Err(_) => {
            info!(event_type = %kind, "event loop closed, event dropped");
            fail(StatusCode::SERVICE_UNAVAILABLE, "event loop stopped")
        }
    }
}
