//! Maps raw protocol events into canonical envelopes.
//!
//! Everything here is pure. Chat names need gateway lookups, so the engine pre-fetches a
//! [`NameContext`] and runs the ordered [`NameStrategy`] list over it.

use crate::domain::entities::{Direction, Envelope, MediaKind, MediaTicket, rfc3339};
use crate::domain::events::{MediaPayload, MessageContent, MessageEvent, RawEvent};
use crate::domain::jid::{self, ChatKind};
use crate::ports::HistoryEntry;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::json;

/// Extended text, then plain conversation, then image caption, then video caption.
pub fn message_text(content: &MessageContent) -> String {
    let non_empty = |s: Option<&str>| s.filter(|t| !t.is_empty()).map(str::to_string);
    non_empty(content.extended_text.as_deref())
        .or_else(|| non_empty(content.conversation.as_deref()))
        .or_else(|| non_empty(content.image.as_ref().map(|m| m.caption.as_str())))
        .or_else(|| non_empty(content.video.as_ref().map(|m| m.caption.as_str())))
        .unwrap_or_default()
}

/// The media payload of a message, first of image, audio, video, document.
pub fn media_payload(content: &MessageContent) -> Option<(MediaKind, &MediaPayload)> {
    [
        (MediaKind::Image, content.image.as_ref()),
        (MediaKind::Audio, content.audio.as_ref()),
        (MediaKind::Video, content.video.as_ref()),
        (MediaKind::Document, content.document.as_ref()),
    ]
    .into_iter()
    .find_map(|(kind, p)| p.map(|p| (kind, p)))
}

fn b64(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        STANDARD.encode(bytes)
    }
}

/// Builds a ticket with the re-download credentials of `payload`.
pub fn media_ticket(kind: MediaKind, payload: &MediaPayload) -> MediaTicket {
    MediaTicket {
        kind: Some(kind),
        mimetype: payload.mimetype.clone(),
        title: if kind == MediaKind::Document {
            payload.title.clone()
        } else {
            String::new()
        },
        url: payload.url.clone(),
        caption: payload.caption.clone(),
        direct_path: payload.direct_path.clone(),
        media_key: b64(&payload.media_key),
        file_hash: b64(&payload.file_sha256),
        encrypted_file_hash: b64(&payload.file_enc_sha256),
        file_length: payload.file_length,
        seconds: if kind == MediaKind::Audio {
            payload.seconds
        } else {
            0
        },
        ..Default::default()
    }
}

fn message_envelope(m: &MessageEvent) -> Envelope {
    let direction = if m.info.is_from_me {
        Direction::Out
    } else {
        Direction::In
    };
    let chat = jid::canonical_chat_id(&m.info.chat);
    let sender = if m.info.is_from_me {
        String::new()
    } else {
        jid::canonical_chat_id(&m.info.sender)
    };
    let mut env = Envelope::message(direction, chat, sender, m.info.id.clone(), "");
    if let Some(content) = &m.message {
        env.text = message_text(content);
        env.media = media_payload(content).map(|(kind, payload)| {
            let mut ticket = media_ticket(kind, payload);
            ticket.direction = Some(direction);
            ticket.chat_id = env.chat_id.clone();
            ticket.sender_id = env.sender_id.clone();
            ticket.message_id = env.message_id.clone();
            ticket.at = m.info.timestamp;
            ticket
        });
    }
    env
}

/// Canonical envelope for a raw event. `chat_name` is left for the engine to resolve.
///
/// Messages authored by this account come back with `direction = out`.
pub fn normalize(event: &RawEvent) -> Envelope {
    match event {
        RawEvent::Message(m) => message_envelope(m),
        RawEvent::Receipt(r) => Envelope::receipt(
            jid::canonical_chat_id(&r.chat),
            jid::canonical_chat_id(&r.sender),
            r.receipt_type.clone(),
            r.message_ids.clone(),
        ),
        RawEvent::ChatPresence(p) => {
            let mut env = Envelope::new(event.kind());
            env.chat_id = jid::canonical_chat_id(&p.chat);
            env.sender_id = jid::canonical_chat_id(&p.sender);
            env.extra.insert("state".into(), json!(p.state));
            env.extra.insert("media".into(), json!(p.media));
            env
        }
        RawEvent::Presence(p) => {
            let mut env = Envelope::new(event.kind());
            env.sender_id = jid::canonical_chat_id(&p.from);
            env.extra.insert("unavailable".into(), json!(p.unavailable));
            if let Some(seen) = p.last_seen {
                env.extra.insert("last_seen".into(), json!(rfc3339(seen)));
            }
            env
        }
        RawEvent::GroupInfo(g) | RawEvent::JoinedGroup(g) => {
            let mut env = Envelope::new(event.kind());
            env.chat_id = jid::canonical_chat_id(&g.jid);
            env.chat_name = g.name.clone();
            env
        }
        _ => {
            let mut env = Envelope::new(event.kind());
            if let Some(addr) = event.chat_address() {
                env.chat_id = jid::canonical_chat_id(addr);
            }
            env
        }
    }
}

/// History row for a message envelope.
pub fn history_entry(env: &Envelope, at: DateTime<Utc>) -> HistoryEntry {
    let media = env.media.as_ref();
    let is_from_me = env.is_outbound();
    HistoryEntry {
        id: env.message_id.clone(),
        chat_id: env.chat_id.clone(),
        sender: if is_from_me {
            "me".to_string()
        } else {
            env.sender_id.clone()
        },
        content: env.text.clone(),
        timestamp: at,
        is_from_me,
        media_type: media.and_then(|m| m.kind).map(|k| k.as_str().to_string()),
        filename: media.map(|m| m.title.clone()).filter(|t| !t.is_empty()),
        url: None,
    }
}

/// Everything the name strategies may look at, fetched up front.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    /// Canonical chat id.
    pub chat_id: String,
    /// Group subject carried by the event itself.
    pub event_subject: String,
    /// Group subject from the gateway's group directory.
    pub directory_subject: Option<String>,
    /// Address-book name from the gateway.
    pub contact_name: Option<String>,
    pub push_name: String,
    /// User part of the message sender.
    pub sender_user: String,
}

impl NameContext {
    pub fn is_group(&self) -> bool {
        jid::chat_kind(&self.chat_id) == ChatKind::Group
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStrategy {
    GroupSubject,
    GroupDirectory,
    GroupFallback,
    ContactBook,
    PushName,
    SenderUser,
    AddressUser,
}

pub const GROUP_NAME_STRATEGIES: &[NameStrategy] = &[
    NameStrategy::GroupSubject,
    NameStrategy::GroupDirectory,
    NameStrategy::GroupFallback,
];

pub const CONTACT_NAME_STRATEGIES: &[NameStrategy] = &[
    NameStrategy::ContactBook,
    NameStrategy::PushName,
    NameStrategy::SenderUser,
    NameStrategy::AddressUser,
];

fn present(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

impl NameStrategy {
    pub fn resolve(&self, ctx: &NameContext) -> Option<String> {
        match self {
            NameStrategy::GroupSubject => present(&ctx.event_subject),
            NameStrategy::GroupDirectory => ctx.directory_subject.as_deref().and_then(present),
            NameStrategy::GroupFallback => Some(format!("Group {}", jid::user_part(&ctx.chat_id))),
            NameStrategy::ContactBook => ctx.contact_name.as_deref().and_then(present),
            NameStrategy::PushName => present(&ctx.push_name),
            NameStrategy::SenderUser => present(&ctx.sender_user),
            NameStrategy::AddressUser => present(jid::user_part(&ctx.chat_id)),
        }
    }
}

/// First strategy that produces a name, or empty.
pub fn resolve_chat_name(ctx: &NameContext) -> String {
    let strategies = if ctx.is_group() {
        GROUP_NAME_STRATEGIES
    } else {
        CONTACT_NAME_STRATEGIES
    };
    strategies
        .iter()
        .find_map(|s| s.resolve(ctx))
        .unwrap_or_default()
}
