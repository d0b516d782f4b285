//! In-memory port implementations for use-case and HTTP tests.

use crate::domain::{DomainError, Envelope, MediaKind, MediaTicket};
use crate::ports::{
    BusinessPort, BusinessReply, Capabilities, EngineControlPort, EnvelopeSink, HistoryEntry,
    HistoryPort, OutboundMedia, PresenceMedia, ProtocolGateway, UploadedMedia, WebhookPort,
};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Records every gateway call as a short string; the first `fail_sends` sends fail.
#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<Vec<String>>,
    pub status: bool,
    pub fail_sends: AtomicU32,
    pub contact: Option<String>,
    pub group: Option<String>,
    pub sent_media: Mutex<Vec<OutboundMedia>>,
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn maybe_fail(&self) -> Result<(), DomainError> {
        let left = self.fail_sends.load(Ordering::SeqCst);
        if left > 0 {
            self.fail_sends.store(left - 1, Ordering::SeqCst);
            return Err(DomainError::Gateway("transient".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProtocolGateway for FakeGateway {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            status: self.status,
        }
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError> {
        self.record(format!("send_text {to} {text}"));
        self.maybe_fail()?;
        Ok("OUT-1".into())
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, DomainError> {
        self.record(format!("upload {} {}", kind.as_str(), data.len()));
        Ok(UploadedMedia {
            url: "https://cdn.local/x".into(),
            direct_path: "/v/x".into(),
            media_key: vec![9, 9],
            file_sha256: vec![1],
            file_enc_sha256: vec![2],
            file_length: data.len() as u64,
        })
    }

    async fn send_media(&self, to: &str, media: &OutboundMedia) -> Result<String, DomainError> {
        self.record(format!("send_media {to} {}", media.kind.as_str()));
        self.maybe_fail()?;
        self.sent_media.lock().unwrap().push(media.clone());
        Ok("OUT-M".into())
    }

    async fn send_status(&self, media: &OutboundMedia) -> Result<String, DomainError> {
        self.record(format!("send_status {}", media.kind.as_str()));
        Ok("STATUS-1".into())
    }

    async fn set_chat_presence(
        &self,
        chat: &str,
        composing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError> {
        self.record(format!("presence {chat} {composing} {media:?}"));
        Ok(())
    }

    async fn send_presence(&self, available: bool) -> Result<(), DomainError> {
        self.record(format!("available {available}"));
        Ok(())
    }

    async fn mark_read(
        &self,
        chat: &str,
        sender: Option<&str>,
        ids: &[String],
        receipt_type: &str,
    ) -> Result<(), DomainError> {
        self.record(format!(
            "mark_read {chat} {} {} {receipt_type}",
            sender.unwrap_or("-"),
            ids.join(",")
        ));
        Ok(())
    }

    async fn contact_name(&self, _jid: &str) -> Result<Option<String>, DomainError> {
        Ok(self.contact.clone())
    }

    async fn group_name(&self, _jid: &str) -> Result<Option<String>, DomainError> {
        Ok(self.group.clone())
    }

    async fn download(&self, ticket: &MediaTicket) -> Result<Vec<u8>, DomainError> {
        self.record(format!("download {}", ticket.direct_path));
        Ok(b"blob".to_vec())
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    pub rows: Mutex<Vec<HistoryEntry>>,
}

#[async_trait::async_trait]
impl HistoryPort for MemoryHistory {
    async fn save_message(&self, entry: &HistoryEntry) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|r| r.id != entry.id);
        rows.push(entry.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, DomainError> {
        let rows = self.rows.lock().unwrap();
        let matching: Vec<_> = rows.iter().filter(|r| r.chat_id == chat_id).cloned().collect();
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub envelopes: Mutex<Vec<Envelope>>,
}

impl MemorySink {
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EnvelopeSink for MemorySink {
    async fn append(&self, env: &Envelope, _payload: &[u8]) -> Result<PathBuf, DomainError> {
        self.envelopes.lock().unwrap().push(env.clone());
        Ok(PathBuf::from("memory"))
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    pub payloads: Mutex<Vec<serde_json::Value>>,
}

impl RecordingWebhook {
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

impl WebhookPort for RecordingWebhook {
    fn dispatch(&self, payload: Vec<u8>) {
        let v = serde_json::from_slice(&payload).unwrap_or(serde_json::Value::Null);
        self.payloads.lock().unwrap().push(v);
    }
}

/// Engine control surface that only records calls.
#[derive(Default)]
pub struct FakeEngineControl {
    pub calls: Mutex<Vec<String>>,
}

impl FakeEngineControl {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EngineControlPort for FakeEngineControl {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError> {
        self.calls.lock().unwrap().push(format!("send {to} {text}"));
        Ok("ID".into())
    }

    async fn set_typing(
        &self,
        chat: &str,
        typing: bool,
        _media: PresenceMedia,
    ) -> Result<(), DomainError> {
        self.calls.lock().unwrap().push(format!("typing {chat} {typing}"));
        Ok(())
    }

    async fn mark_read(
        &self,
        chat: &str,
        ids: &[String],
        sender: Option<&str>,
        _receipt_type: Option<&str>,
    ) -> Result<(), DomainError> {
        self.calls.lock().unwrap().push(format!(
            "markread {chat} {} {}",
            ids.join(","),
            sender.unwrap_or("-")
        ));
        Ok(())
    }
}

/// Business backend returning a fixed reply (or an error when `reply` is `None`).
pub struct FakeBusiness {
    pub reply: Option<String>,
    pub asked: Mutex<Vec<(String, String)>>,
}

impl FakeBusiness {
    pub fn replying(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(str::to_string),
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl BusinessPort for FakeBusiness {
    async fn ask(
        &self,
        session_id: &str,
        message: &str,
        _channel: &str,
    ) -> Result<BusinessReply, DomainError> {
        self.asked
            .lock()
            .unwrap()
            .push((session_id.to_string(), message.to_string()));
        match &self.reply {
            Some(r) => Ok(BusinessReply {
                reply: r.clone(),
                ..Default::default()
            }),
            None => Err(DomainError::Backend("unreachable".into())),
        }
    }
}
