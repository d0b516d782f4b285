//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{DomainError, Envelope, MediaKind, MediaTicket, Profile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Optional protocol features; absent ones return `DomainError::Unsupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub status: bool,
}

/// What the chat-presence indicator shows while composing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMedia {
    #[default]
    Text,
    Audio,
}

impl PresenceMedia {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("audio") {
            PresenceMedia::Audio
        } else {
            PresenceMedia::Text
        }
    }
}

/// Result of uploading a blob to the protocol's media store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadedMedia {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub direct_path: String,
    #[serde(default, with = "crate::domain::events::b64_bytes")]
    pub media_key: Vec<u8>,
    #[serde(default, with = "crate::domain::events::b64_bytes")]
    pub file_sha256: Vec<u8>,
    #[serde(default, with = "crate::domain::events::b64_bytes")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(default)]
    pub file_length: u64,
}

/// A media message ready to be sent (blob already uploaded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub kind: MediaKind,
    pub upload: UploadedMedia,
    pub mimetype: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub title: String,
    /// Audio only.
    #[serde(default)]
    pub seconds: u32,
    /// Audio only; 64 samples in 0..=100.
    #[serde(default)]
    pub waveform: Vec<u8>,
}

/// Protocol client boundary. Session, pairing and transport encryption live behind it.
#[async_trait::async_trait]
pub trait ProtocolGateway: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Send a plain text message. Returns the protocol message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError>;

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, DomainError>;

    /// Send an already uploaded media message. Returns the protocol message id.
    async fn send_media(&self, to: &str, media: &OutboundMedia) -> Result<String, DomainError>;

    /// Post a status (story) update. Returns the protocol id.
    async fn send_status(&self, media: &OutboundMedia) -> Result<String, DomainError>;

    /// Composing (`true`) or paused (`false`) indicator in a chat.
    async fn set_chat_presence(
        &self,
        chat: &str,
        composing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError>;

    /// Global availability.
    async fn send_presence(&self, available: bool) -> Result<(), DomainError>;

    /// Send read (or `played`) receipts. Group chats need the sender of the messages.
    async fn mark_read(
        &self,
        chat: &str,
        sender: Option<&str>,
        ids: &[String],
        receipt_type: &str,
    ) -> Result<(), DomainError>;

    /// Address-book name for a contact, if known.
    async fn contact_name(&self, jid: &str) -> Result<Option<String>, DomainError>;

    /// Subject of a group, if known.
    async fn group_name(&self, jid: &str) -> Result<Option<String>, DomainError>;

    /// Fetch and decrypt a media blob from the credentials stored in a ticket.
    async fn download(&self, ticket: &MediaTicket) -> Result<Vec<u8>, DomainError>;
}

/// One row of the message history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Durable message history (append + recent query).
#[async_trait::async_trait]
pub trait HistoryPort: Send + Sync {
    /// Insert or replace by message id.
    async fn save_message(&self, entry: &HistoryEntry) -> Result<(), DomainError>;

    /// Most recent `limit` messages of a chat, oldest first.
    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, DomainError>;
}

/// Append-only envelope log.
#[async_trait::async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Append one serialized envelope. Returns the file actually written.
    async fn append(&self, env: &Envelope, payload: &[u8]) -> Result<PathBuf, DomainError>;
}

/// Detached envelope delivery. Failures are the adapter's to log.
pub trait WebhookPort: Send + Sync {
    fn dispatch(&self, payload: Vec<u8>);
}

/// Profile snapshot persistence. One document per chat.
#[async_trait::async_trait]
pub trait ProfileSnapshotPort: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Profile>, DomainError>;

    async fn save(&self, profile: &Profile) -> Result<(), DomainError>;
}

/// Reply from the downstream business service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessReply {
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub lead_score: f64,
    #[serde(default)]
    pub category: String,
}

/// Downstream conversational service (consumed, not implemented here).
#[async_trait::async_trait]
pub trait BusinessPort: Send + Sync {
    async fn ask(
        &self,
        session_id: &str,
        message: &str,
        channel: &str,
    ) -> Result<BusinessReply, DomainError>;
}

/// Engine control surface as seen from the ingestion process.
#[async_trait::async_trait]
pub trait EngineControlPort: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError>;

    async fn set_typing(
        &self,
        chat: &str,
        typing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError>;

    async fn mark_read(
        &self,
        chat: &str,
        ids: &[String],
        sender: Option<&str>,
        receipt_type: Option<&str>,
    ) -> Result<(), DomainError>;
}
