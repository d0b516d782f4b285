//! Raw protocol events as delivered by the protocol gateway.
//!
//! One tagged variant per event kind. The normalizer matches on the variant and uses the
//! typed accessors below; nothing inspects fields dynamically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binary fields travel as standard base64 strings on the gateway wire.
pub mod b64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub chat: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub push_name: String,
    /// Display name of the group when the gateway knows it.
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Common shape of image/audio/video/document payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub direct_path: String,
    #[serde(default, with = "b64_bytes")]
    pub media_key: Vec<u8>,
    #[serde(default, with = "b64_bytes")]
    pub file_sha256: Vec<u8>,
    #[serde(default, with = "b64_bytes")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(default)]
    pub file_length: u64,
    #[serde(default)]
    pub seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text: Option<String>,
    #[serde(default)]
    pub image: Option<MediaPayload>,
    #[serde(default)]
    pub audio: Option<MediaPayload>,
    #[serde(default)]
    pub video: Option<MediaPayload>,
    #[serde(default)]
    pub document: Option<MediaPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub info: MessageInfo,
    #[serde(default)]
    pub message: Option<MessageContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub chat: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// Empty for delivery receipts; `read`, `played`, `sender`, ... otherwise.
    #[serde(default)]
    pub receipt_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPresenceEvent {
    pub chat: String,
    #[serde(default)]
    pub sender: String,
    /// `composing` or `paused`.
    #[serde(default)]
    pub state: String,
    /// Empty for text, `audio` while recording.
    #[serde(default)]
    pub media: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub from: String,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEvent {
    pub jid: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    ChatPresence(ChatPresenceEvent),
    Presence(PresenceEvent),
    GroupInfo(GroupEvent),
    JoinedGroup(GroupEvent),
    HistorySync,
    Connected,
    LoggedOut,
    OfflineSyncCompleted,
    IdentityChange {
        #[serde(default)]
        jid: Option<String>,
    },
    /// Any event kind this bridge has no dedicated handling for.
    Unknown { name: String },
}

impl RawEvent {
    /// Canonical event type name used in the envelope.
    pub fn kind(&self) -> &str {
        use crate::domain::entities::event_type as et;
        match self {
            RawEvent::Message(_) => et::MESSAGE,
            RawEvent::Receipt(_) => et::RECEIPT,
            RawEvent::ChatPresence(_) => et::CHAT_PRESENCE,
            RawEvent::Presence(_) => et::PRESENCE,
            RawEvent::GroupInfo(_) => et::GROUP_UPDATE,
            RawEvent::JoinedGroup(_) => et::JOINED_GROUP,
            RawEvent::HistorySync => et::HISTORY_SYNC,
            RawEvent::Connected => et::CONNECTED,
            RawEvent::LoggedOut => et::LOGGED_OUT,
            RawEvent::OfflineSyncCompleted => et::OFFLINE_SYNC_COMPLETED,
            RawEvent::IdentityChange { .. } => et::IDENTITY_CHANGE,
            RawEvent::Unknown { name } => name.as_str(),
        }
    }

    /// Raw chat address carried by the event, if any.
    pub fn chat_address(&self) -> Option<&str> {
        let addr = match self {
            RawEvent::Message(m) => m.info.chat.as_str(),
            RawEvent::Receipt(r) => r.chat.as_str(),
            RawEvent::ChatPresence(p) => p.chat.as_str(),
            RawEvent::GroupInfo(g) | RawEvent::JoinedGroup(g) => g.jid.as_str(),
            RawEvent::IdentityChange { jid } => jid.as_deref().unwrap_or(""),
            _ => "",
        };
        if addr.trim().is_empty() { None } else { Some(addr) }
    }
}
