//! Domain entities. Pure data structures for the core business.
//!
//! No protocol/IO types here. Raw protocol events are mapped into these by the normalizer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical event type names carried in `Envelope::event_type`.
pub mod event_type {
    pub const MESSAGE: &str = "message";
    pub const RECEIPT: &str = "receipt";
    pub const CHAT_PRESENCE: &str = "chat_presence";
    pub const PRESENCE: &str = "presence";
    pub const TYPING: &str = "typing";
    pub const GROUP_UPDATE: &str = "group_update";
    pub const JOINED_GROUP: &str = "joined_group";
    pub const HISTORY_SYNC: &str = "history_sync";
    pub const CONNECTED: &str = "connected";
    pub const LOGGED_OUT: &str = "logged_out";
    pub const OFFLINE_SYNC_COMPLETED: &str = "offline_sync_completed";
    pub const IDENTITY_CHANGE: &str = "identity_change";

    /// Connection lifecycle / device events. Partitioned by host in the folder sink.
    pub fn is_device_event(t: &str) -> bool {
        matches!(
            t,
            CONNECTED | LOGGED_OUT | HISTORY_SYNC | OFFLINE_SYNC_COMPLETED | IDENTITY_CHANGE
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }
}

/// Media metadata plus the credentials needed to fetch the blob later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTicket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub direct_path: String,
    /// Base64 (standard alphabet).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_key: String,
    /// Base64 SHA-256 of the plaintext file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_hash: String,
    /// Base64 SHA-256 of the encrypted file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encrypted_file_hash: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub file_length: u64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub seconds: u32,
}

impl MediaTicket {
    /// True when the ticket carries enough to re-fetch the blob without the live event.
    pub fn is_downloadable(&self) -> bool {
        self.kind.is_some()
            && !self.media_key.is_empty()
            && (!self.direct_path.is_empty() || !self.url.is_empty())
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

/// Canonical normalized record of one protocol event.
///
/// Receipts carry `message_ids`; every other event carries at most `message_id`.
/// `at` is stamped when the envelope is serialized for forwarding (see [`Envelope::to_wire`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub receipt_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaTicket>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn message(
        direction: Direction,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type::MESSAGE.to_string(),
            direction: Some(direction),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            message_id: message_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn receipt(
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        receipt_type: impl Into<String>,
        message_ids: Vec<String>,
    ) -> Self {
        Self {
            event_type: event_type::RECEIPT.to_string(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            receipt_type: receipt_type.into(),
            message_ids,
            ..Default::default()
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Some(Direction::Out)
    }

    pub fn is_message(&self) -> bool {
        self.event_type == event_type::MESSAGE
    }

    /// Serializes for forwarding: stamps `at` with `now` and falls back to `default_extra`
    /// when the envelope carries no extra params of its own.
    pub fn to_wire(
        &self,
        now: DateTime<Utc>,
        default_extra: &HashMap<String, serde_json::Value>,
    ) -> serde_json::Result<Vec<u8>> {
        let mut stamped = self.clone();
        stamped.at = Some(now);
        if stamped.extra.is_empty() && !default_extra.is_empty() {
            stamped.extra = default_extra.clone();
        }
        serde_json::to_vec(&stamped)
    }
}

/// RFC3339 with second precision and `Z` suffix, the format used on the wire for headers.
pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
