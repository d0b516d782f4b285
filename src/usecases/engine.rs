//! Event loop and outbound facade.
//!
//! Raw protocol events arrive on an mpsc channel. Each one is normalized and handled on
//! its own task: history write, sink append, webhook dispatch and handler callback run
//! independently and a failure in one never blocks the others or stops the loop.
//!
//! Outbound sends go through the per-class [`SendPolicy`]; a successful send is recorded
//! in history and forwarded as a `direction = out` envelope.

use crate::domain::entities::{Direction, Envelope, MediaKind, MediaTicket};
use crate::domain::events::{MessageEvent, RawEvent};
use crate::domain::jid::{self, STATUS_BROADCAST};
use crate::domain::DomainError;
use crate::ports::{
    EnvelopeSink, EventHandlers, HistoryEntry, HistoryPort, NoopHandlers, OutboundMedia,
    PresenceMedia, ProtocolGateway, UploadedMedia, WebhookPort,
};
use crate::shared::shutdown::{CancelRx, cancelled};
use crate::usecases::audio::{DEFAULT_AUDIO_SECONDS, analyze_ogg_opus, placeholder_waveform};
use crate::usecases::dedupe::{DEFAULT_SWEEP_EVERY, DedupeCache};
use crate::usecases::media::MediaInput;
use crate::usecases::normalizer::{self, NameContext, history_entry, resolve_chat_name};
use crate::usecases::send_policy::SendPolicy;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Window in which an identical receipt (chat, type, ids) is dropped.
pub const RECEIPT_DEDUPE_WINDOW: Duration = Duration::from_secs(5);

pub struct Engine {
    gateway: Arc<dyn ProtocolGateway>,
    history: Arc<dyn HistoryPort>,
    sink: Option<Arc<dyn EnvelopeSink>>,
    webhook: Option<Arc<dyn WebhookPort>>,
    handlers: Arc<dyn EventHandlers>,
    forward_extra: HashMap<String, serde_json::Value>,
    text_policy: SendPolicy,
    media_policy: SendPolicy,
    status_policy: SendPolicy,
    receipts: Arc<DedupeCache>,
    cancel: CancelRx,
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn ProtocolGateway>,
        history: Arc<dyn HistoryPort>,
        cancel: CancelRx,
    ) -> Self {
        Self {
            gateway,
            history,
            sink: None,
            webhook: None,
            handlers: Arc::new(NoopHandlers),
            forward_extra: HashMap::new(),
            text_policy: SendPolicy::text(),
            media_policy: SendPolicy::media(),
            status_policy: SendPolicy::status(),
            receipts: Arc::new(DedupeCache::new(RECEIPT_DEDUPE_WINDOW)),
            cancel,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EnvelopeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookPort>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn with_handlers(mut self, handlers: Arc<dyn EventHandlers>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_forward_extra(mut self, extra: HashMap<String, serde_json::Value>) -> Self {
        self.forward_extra = extra;
        self
    }

    /// Consumes raw events until the channel closes or shutdown starts. One task per event.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<RawEvent>) {
        let sweeper = self
            .receipts
            .spawn_sweeper(DEFAULT_SWEEP_EVERY, self.cancel.clone());
        let mut cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancelled(&mut cancel) => break,
                ev = events.recv() => match ev {
                    Some(ev) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.handle_event(ev).await });
                    }
                    None => break,
                },
            }
        }
        sweeper.abort();
        info!("event loop stopped");
    }

    /// Normalizes one event and runs its side effects.
    pub async fn handle_event(&self, event: RawEvent) {
        let mut env = normalizer::normalize(&event);
        match &event {
            RawEvent::Message(m) => self.on_message(&mut env, m).await,
            RawEvent::Receipt(r) => {
                let key = format!(
                    "{}|{}|{}",
                    env.chat_id,
                    env.receipt_type,
                    env.message_ids.join(",")
                );
                if self.receipts.seen(&key) {
                    debug!(key = %key, "duplicate receipt dropped");
                    return;
                }
                info!(
                    chat = %env.chat_id,
                    receipt_type = if env.receipt_type.is_empty() { "delivered" } else { env.receipt_type.as_str() },
                    ids = env.message_ids.len(),
                    "receipt"
                );
                self.forward(&env).await;
                if let Err(e) = self.handlers.on_receipt(&env, r).await {
                    warn!(error = %e, "receipt handler failed");
                }
            }
            RawEvent::ChatPresence(p) => {
                info!(chat = %env.chat_id, state = %p.state, media = %p.media, "chat presence");
                self.forward(&env).await;
            }
            RawEvent::Presence(p) => {
                info!(from = %env.sender_id, online = !p.unavailable, "presence");
                self.forward(&env).await;
                if let Err(e) = self.handlers.on_presence(&env, p).await {
                    warn!(error = %e, "presence handler failed");
                }
            }
            RawEvent::GroupInfo(g) => {
                info!(group = %env.chat_id, "group updated");
                self.forward(&env).await;
                if let Err(e) = self.handlers.on_group_update(&env, g).await {
                    warn!(error = %e, "group handler failed");
                }
            }
            RawEvent::JoinedGroup(_) => {
                info!(group = %env.chat_id, "joined group");
                self.forward(&env).await;
            }
            RawEvent::Connected => {
                info!("connected");
                if let Err(e) = self.gateway.send_presence(true).await {
                    warn!(error = %e, "failed to announce availability");
                }
                self.forward(&env).await;
            }
            RawEvent::LoggedOut => {
                warn!("logged out, the session may need to be paired again");
                self.forward(&env).await;
            }
            _ => {
                info!(event_type = %env.event_type, chat = %env.chat_id, "event");
                self.forward(&env).await;
            }
        }
    }

    async fn on_message(&self, env: &mut Envelope, m: &MessageEvent) {
        let ctx = self
            .name_context(
                &env.chat_id,
                &m.info.group_name,
                &m.info.push_name,
                jid::user_part(&jid::canonical_chat_id(&m.info.sender)),
            )
            .await;
        env.chat_name = resolve_chat_name(&ctx);

        let media = env.media.as_ref().and_then(|t| t.kind).map(|k| k.as_str());
        if env.is_outbound() {
            // authored on another device of this account
            info!(chat = %env.chat_id, id = %env.message_id, media, "own message echo");
            self.forward(env).await;
            return;
        }

        let at = m.info.timestamp.unwrap_or_else(Utc::now);
        if let Err(e) = self.history.save_message(&history_entry(env, at)).await {
            warn!(chat = %env.chat_id, id = %env.message_id, error = %e, "history write failed");
        }
        info!(
            kind = ?jid::chat_kind(&env.chat_id),
            chat = %env.chat_id,
            from = %env.sender_id,
            id = %env.message_id,
            media,
            text = %preview(&env.text, 80),
            "inbound message"
        );
        self.forward(env).await;
        if let Err(e) = self.handlers.on_message(env, m).await {
            warn!(error = %e, "message handler failed");
        }
    }

    async fn name_context(
        &self,
        chat_id: &str,
        event_subject: &str,
        push_name: &str,
        sender_user: &str,
    ) -> NameContext {
        let mut ctx = NameContext {
            chat_id: chat_id.to_string(),
            event_subject: event_subject.to_string(),
            push_name: push_name.to_string(),
            sender_user: sender_user.to_string(),
            ..Default::default()
        };
        if ctx.is_group() {
            if event_subject.trim().is_empty() {
                ctx.directory_subject = self.gateway.group_name(chat_id).await.unwrap_or_else(|e| {
                    debug!(chat = chat_id, error = %e, "group lookup failed");
                    None
                });
            }
        } else if !chat_id.is_empty() {
            ctx.contact_name = self.gateway.contact_name(chat_id).await.unwrap_or_else(|e| {
                debug!(chat = chat_id, error = %e, "contact lookup failed");
                None
            });
        }
        ctx
    }

    /// Sink append and webhook dispatch. Sink failures go to `on_error`.
    async fn forward(&self, env: &Envelope) {
        let payload = match env.to_wire(Utc::now(), &self.forward_extra) {
            Ok(p) => p,
            Err(e) => {
                warn!(event_type = %env.event_type, error = %e, "failed to serialize envelope");
                return;
            }
        };
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(env, &payload).await {
                warn!(event_type = %env.event_type, error = %e, "sink append failed");
                self.handlers.on_error(&e).await;
            }
        }
        if let Some(webhook) = &self.webhook {
            webhook.dispatch(payload);
        }
    }

    /// History row and `out` envelope for a message this process sent.
    async fn record_outbound(
        &self,
        chat: &str,
        id: &str,
        text: &str,
        media: Option<MediaTicket>,
    ) {
        let mut env = Envelope::message(Direction::Out, chat, "", id, text);
        env.media = media;
        if let Err(e) = self.history.save_message(&history_entry(&env, Utc::now())).await {
            warn!(chat, id, error = %e, "history write failed");
        }
        if chat != STATUS_BROADCAST {
            let ctx = self.name_context(chat, "", "", "").await;
            env.chat_name = resolve_chat_name(&ctx);
        }
        self.forward(&env).await;
    }

    fn recipient(to: &str) -> Result<String, DomainError> {
        let chat = jid::canonical_chat_id(to);
        if chat.is_empty() {
            return Err(DomainError::Gateway("empty recipient".into()));
        }
        Ok(chat)
    }

    /// Sends a text message. Returns the protocol message id.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String, DomainError> {
        let chat = Self::recipient(to)?;
        let gateway = &self.gateway;
        let to_ref = chat.as_str();
        let mut cancel = self.cancel.clone();
        let id = self
            .text_policy
            .run(&mut cancel, move || gateway.send_text(to_ref, text))
            .await?;
        info!(chat = %chat, id = %id, text = %preview(text, 80), "outbound message");
        self.record_outbound(&chat, &id, text, None).await;
        Ok(id)
    }

    /// Fills in audio duration and waveform when the caller left them empty.
    fn prepare_audio(input: &mut MediaInput) {
        if input.kind != MediaKind::Audio {
            return;
        }
        if (input.seconds == 0 || input.waveform.is_empty()) && input.is_ogg_opus() {
            match analyze_ogg_opus(&input.data) {
                Ok((secs, wave)) => {
                    if input.seconds == 0 {
                        input.seconds = secs;
                    }
                    if input.waveform.is_empty() {
                        input.waveform = wave;
                    }
                }
                Err(e) => debug!(error = %e, "audio metadata scan failed"),
            }
        }
        if input.seconds == 0 {
            input.seconds = DEFAULT_AUDIO_SECONDS;
        }
        if input.waveform.is_empty() {
            input.waveform = placeholder_waveform(input.seconds);
        }
    }

    fn outbound_media(input: &MediaInput, upload: UploadedMedia) -> OutboundMedia {
        OutboundMedia {
            kind: input.kind,
            upload,
            mimetype: input.mimetype.clone(),
            caption: input.caption.clone(),
            title: input.file_name.clone(),
            seconds: input.seconds,
            waveform: input.waveform.clone(),
        }
    }

    fn outbound_ticket(chat: &str, id: &str, media: &OutboundMedia) -> MediaTicket {
        MediaTicket {
            direction: Some(Direction::Out),
            chat_id: chat.to_string(),
            message_id: id.to_string(),
            kind: Some(media.kind),
            mimetype: media.mimetype.clone(),
            title: media.title.clone(),
            url: media.upload.url.clone(),
            caption: media.caption.clone(),
            at: Some(Utc::now()),
            direct_path: media.upload.direct_path.clone(),
            media_key: b64(&media.upload.media_key),
            file_hash: b64(&media.upload.file_sha256),
            encrypted_file_hash: b64(&media.upload.file_enc_sha256),
            file_length: media.upload.file_length,
            seconds: media.seconds,
            ..Default::default()
        }
    }

    /// Uploads and sends a media message. Each attempt re-uploads.
    pub async fn send_media(&self, to: &str, mut input: MediaInput) -> Result<String, DomainError> {
        let chat = Self::recipient(to)?;
        Self::prepare_audio(&mut input);
        let gateway = &self.gateway;
        let input_ref = &input;
        let to_ref = chat.as_str();
        let mut cancel = self.cancel.clone();
        let (id, media) = self
            .media_policy
            .run(&mut cancel, move || async move {
                let upload = gateway.upload(&input_ref.data, input_ref.kind).await?;
                let media = Self::outbound_media(input_ref, upload);
                let id = gateway.send_media(to_ref, &media).await?;
                Ok::<_, DomainError>((id, media))
            })
            .await?;
        info!(
            chat = %chat,
            id = %id,
            media = media.kind.as_str(),
            caption = %preview(&media.caption, 60),
            "outbound media"
        );
        let ticket = Self::outbound_ticket(&chat, &id, &media);
        self.record_outbound(&chat, &id, &input.caption, Some(ticket))
            .await;
        Ok(id)
    }

    /// Posts a status update. Fails with `Unsupported` when the client cannot.
    pub async fn post_status(&self, mut input: MediaInput) -> Result<String, DomainError> {
        if !self.gateway.capabilities().status {
            return Err(DomainError::Unsupported("status posts".into()));
        }
        Self::prepare_audio(&mut input);
        let gateway = &self.gateway;
        let input_ref = &input;
        let mut cancel = self.cancel.clone();
        let (id, media) = self
            .status_policy
            .run(&mut cancel, move || async move {
                let upload = gateway.upload(&input_ref.data, input_ref.kind).await?;
                let media = Self::outbound_media(input_ref, upload);
                let id = gateway.send_status(&media).await?;
                Ok::<_, DomainError>((id, media))
            })
            .await?;
        info!(id = %id, media = media.kind.as_str(), "status posted");
        let ticket = Self::outbound_ticket(STATUS_BROADCAST, &id, &media);
        self.record_outbound(STATUS_BROADCAST, &id, &input.caption, Some(ticket))
            .await;
        Ok(id)
    }

    pub async fn set_typing(
        &self,
        chat: &str,
        typing: bool,
        media: PresenceMedia,
    ) -> Result<(), DomainError> {
        let chat = Self::recipient(chat)?;
        self.gateway.set_chat_presence(&chat, typing, media).await
    }

    /// Read receipts, or `played` for voice notes. Groups need the message sender.
    pub async fn mark_read(
        &self,
        chat: &str,
        ids: &[String],
        sender: Option<&str>,
        receipt_type: Option<&str>,
    ) -> Result<(), DomainError> {
        if ids.is_empty() {
            return Ok(());
        }
        let chat = Self::recipient(chat)?;
        let sender = sender
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(jid::canonical_chat_id);
        let played = receipt_type
            .map(|t| t.trim().eq_ignore_ascii_case("played"))
            .unwrap_or(false);
        let kind = if played { "played" } else { "read" };
        self.gateway
            .mark_read(&chat, sender.as_deref(), ids, kind)
            .await?;
        debug!(chat = %chat, ids = ids.len(), receipt_type = kind, "marked");
        Ok(())
    }

    /// Fetches a media blob from the credentials stored in a ticket.
    pub async fn download_media(&self, ticket: &MediaTicket) -> Result<Vec<u8>, DomainError> {
        if !ticket.is_downloadable() {
            return Err(DomainError::Media(
                "ticket lacks download credentials".into(),
            ));
        }
        self.gateway.download(ticket).await
    }

    /// Most recent messages of a chat, oldest first.
    pub async fn recent_history(
        &self,
        chat: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, DomainError> {
        self.history
            .recent_messages(&jid::canonical_chat_id(chat), limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{MediaPayload, MessageContent, MessageInfo, ReceiptEvent};
    use crate::shared::shutdown::cancel_pair;
    use crate::usecases::testing::{FakeGateway, MemoryHistory, MemorySink, RecordingWebhook};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    struct Harness {
        engine: Arc<Engine>,
        gateway: Arc<FakeGateway>,
        history: Arc<MemoryHistory>,
        sink: Arc<MemorySink>,
        webhook: Arc<RecordingWebhook>,
        handled: Arc<CountingHandlers>,
        _tx: tokio::sync::watch::Sender<bool>,
    }

    #[derive(Default)]
    struct CountingHandlers {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl EventHandlers for CountingHandlers {
        async fn on_message(&self, env: &Envelope, _raw: &MessageEvent) -> Result<(), DomainError> {
            self.messages.lock().unwrap().push(env.message_id.clone());
            Ok(())
        }
    }

    fn harness(gateway: FakeGateway) -> Harness {
        let (tx, rx) = cancel_pair();
        let gateway = Arc::new(gateway);
        let history = Arc::new(MemoryHistory::default());
        let sink = Arc::new(MemorySink::default());
        let webhook = Arc::new(RecordingWebhook::default());
        let handled = Arc::new(CountingHandlers::default());
        let engine = Engine::new(gateway.clone(), history.clone(), rx)
            .with_sink(sink.clone())
            .with_webhook(webhook.clone())
            .with_handlers(handled.clone());
        Harness {
            engine: Arc::new(engine),
            gateway,
            history,
            sink,
            webhook,
            handled,
            _tx: tx,
        }
    }

    fn inbound(id: &str, from_me: bool) -> RawEvent {
        RawEvent::Message(MessageEvent {
            info: MessageInfo {
                id: id.into(),
                chat: "549111@lid".into(),
                sender: "549111@lid".into(),
                is_from_me: from_me,
                push_name: "Ana".into(),
                ..Default::default()
            },
            message: Some(MessageContent {
                conversation: Some("hola".into()),
                ..Default::default()
            }),
        })
    }

    #[tokio::test]
    async fn test_inbound_message_side_effects() {
        let h = harness(FakeGateway::default());
        h.engine.handle_event(inbound("M1", false)).await;

        let rows = h.history.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chat_id, "549111@s.whatsapp.net");
        assert!(!rows[0].is_from_me);

        let sunk = h.sink.envelopes();
        assert_eq!(sunk.len(), 1);
        assert_eq!(sunk[0].chat_name, "Ana");

        let hooks = h.webhook.payloads();
        assert_eq!(hooks[0]["direction"], "in");
        assert!(hooks[0]["at"].is_string());
        assert_eq!(*h.handled.messages.lock().unwrap(), vec!["M1"]);
    }

    #[tokio::test]
    async fn test_own_message_forwarded_as_out_without_callback() {
        let h = harness(FakeGateway::default());
        h.engine.handle_event(inbound("M2", true)).await;
        assert!(h.handled.messages.lock().unwrap().is_empty());
        assert!(h.history.rows.lock().unwrap().is_empty());
        assert_eq!(h.webhook.payloads()[0]["direction"], "out");
    }

    #[tokio::test]
    async fn test_duplicate_receipts_dropped() {
        let h = harness(FakeGateway::default());
        let receipt = RawEvent::Receipt(ReceiptEvent {
            chat: "1@s.whatsapp.net".into(),
            sender: "1@s.whatsapp.net".into(),
            message_ids: vec!["A".into()],
            receipt_type: "read".into(),
        });
        h.engine.handle_event(receipt.clone()).await;
        h.engine.handle_event(receipt).await;
        assert_eq!(h.sink.envelopes().len(), 1);
    }

    #[tokio::test]
    async fn test_connected_reannounces_presence() {
        let h = harness(FakeGateway::default());
        h.engine.handle_event(RawEvent::Connected).await;
        assert_eq!(h.gateway.calls(), vec!["available true"]);
        assert_eq!(h.sink.envelopes()[0].event_type, "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_retries_then_records_outbound() {
        let gw = FakeGateway {
            contact: Some("Ana Pérez".into()),
            ..Default::default()
        };
        gw.fail_sends.store(1, Ordering::SeqCst);
        let h = harness(gw);
        let id = h.engine.send_text("+549111", "hola!").await.unwrap();
        assert_eq!(id, "OUT-1");
        assert_eq!(h.gateway.calls().len(), 2);

        let rows = h.history.rows.lock().unwrap().clone();
        assert!(rows[0].is_from_me);
        assert_eq!(rows[0].sender, "me");
        let out = &h.sink.envelopes()[0];
        assert!(out.is_outbound());
        assert_eq!(out.chat_id, "549111@s.whatsapp.net");
        assert_eq!(out.chat_name, "Ana Pérez");
    }

    #[tokio::test]
    async fn test_send_voice_note_fills_audio_metadata() {
        let h = harness(FakeGateway::default());
        let input = MediaInput {
            data: b"not really ogg".to_vec(),
            kind: MediaKind::Audio,
            mimetype: "audio/ogg; codecs=opus".into(),
            caption: String::new(),
            file_name: "note.ogg".into(),
            seconds: 0,
            waveform: Vec::new(),
        };
        h.engine.send_media("1@s.whatsapp.net", input).await.unwrap();
        let sent = h.gateway.sent_media.lock().unwrap().clone();
        assert_eq!(sent[0].seconds, DEFAULT_AUDIO_SECONDS);
        assert_eq!(sent[0].waveform.len(), 64);

        let out = &h.sink.envelopes()[0];
        let ticket = out.media.as_ref().unwrap();
        assert_eq!(ticket.kind, Some(MediaKind::Audio));
        assert_eq!(ticket.media_key, "CQk=");
        assert_eq!(
            h.history.rows.lock().unwrap()[0].media_type.as_deref(),
            Some("audio")
        );
    }

    #[tokio::test]
    async fn test_status_requires_capability() {
        let h = harness(FakeGateway::default());
        let input = MediaInput::from_file(std::path::Path::new("a.jpg"), vec![1], "");
        assert!(matches!(
            h.engine.post_status(input.clone()).await,
            Err(DomainError::Unsupported(_))
        ));

        let h = harness(FakeGateway {
            status: true,
            ..Default::default()
        });
        assert_eq!(h.engine.post_status(input).await.unwrap(), "STATUS-1");
        assert_eq!(h.sink.envelopes()[0].chat_id, STATUS_BROADCAST);
    }

    #[tokio::test]
    async fn test_mark_read_played_with_group_sender() {
        let h = harness(FakeGateway::default());
        h.engine
            .mark_read(
                "1@g.us",
                &["A".to_string(), "B".to_string()],
                Some("5@lid"),
                Some("Played"),
            )
            .await
            .unwrap();
        h.engine.mark_read("1@g.us", &[], None, None).await.unwrap();
        assert_eq!(
            h.gateway.calls(),
            vec!["mark_read 1@g.us 5@s.whatsapp.net A,B played"]
        );
    }

    #[tokio::test]
    async fn test_download_media_needs_credentials() {
        let h = harness(FakeGateway::default());
        let raw = MediaPayload {
            media_key: vec![1],
            direct_path: "/v/t".into(),
            ..Default::default()
        };
        let ticket = normalizer::media_ticket(MediaKind::Image, &raw);
        assert_eq!(h.engine.download_media(&ticket).await.unwrap(), b"blob");
        assert!(matches!(
            h.engine.download_media(&MediaTicket::default()).await,
            Err(DomainError::Media(_))
        ));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_close() {
        let h = harness(FakeGateway::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(Arc::clone(&h.engine).run(rx));
        tx.send(inbound("M3", false)).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        for _ in 0..50 {
            if !h.sink.envelopes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.sink.envelopes().len(), 1);
    }
}
