//! Routing of ingested envelopes: profile bookkeeping, aggregation and paced replies.
//!
//! Outbound echoes only update profiles. Inbound messages touch the profile, pass the
//! filter chain and feed the aggregator; typing signals extend a live window. When a
//! window fires the last inbound text of the chat goes to the business backend and the
//! answer is sent back through the engine with a typing simulation.

use crate::domain::entities::event_type;
use crate::domain::jid;
use crate::domain::{DomainError, Envelope};
use crate::ports::{BusinessPort, EngineControlPort, PresenceMedia};
use crate::shared::config::ReplyPacing;
use crate::shared::shutdown::{CancelRx, sleep_or_cancel};
use crate::usecases::aggregator::{Aggregator, WindowObserver, WindowReason};
use crate::usecases::filters::FilterChain;
use crate::usecases::profile_service::ProfileStore;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Minimum spacing between two typing-driven window extensions of one chat.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(700);
pub const BUSINESS_CHANNEL: &str = "whatsapp";

const TYPING_STATES: [&str; 3] = ["composing", "typing", "recording"];
const LOG_PREVIEW_CHARS: usize = 80;

#[derive(Default)]
struct LastSeen {
    /// Last inbound envelope per chat. A chat without an entry never gets typing resets.
    by_chat: HashMap<String, Envelope>,
    chat_by_sender: HashMap<String, String>,
    active_chat: String,
    typing_at: HashMap<String, Instant>,
}

pub struct Router {
    engine: Arc<dyn EngineControlPort>,
    backend: Arc<dyn BusinessPort>,
    profiles: Arc<ProfileStore>,
    filters: FilterChain,
    pacing: ReplyPacing,
    aggregator: OnceLock<Arc<Aggregator>>,
    last: Mutex<LastSeen>,
    cancel: CancelRx,
}

impl Router {
    pub fn new(
        engine: Arc<dyn EngineControlPort>,
        backend: Arc<dyn BusinessPort>,
        profiles: Arc<ProfileStore>,
        filters: FilterChain,
        pacing: ReplyPacing,
        cancel: CancelRx,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            backend,
            profiles,
            filters,
            pacing,
            aggregator: OnceLock::new(),
            last: Mutex::new(LastSeen::default()),
            cancel,
        })
    }

    /// Creates the aggregator that reports back to this router. Call once.
    pub fn start_aggregator(self: &Arc<Self>, window: Duration) -> Arc<Aggregator> {
        let observer: Arc<dyn WindowObserver> = self.clone();
        let agg = Aggregator::new(window, observer, self.cancel.clone());
        if self.aggregator.set(Arc::clone(&agg)).is_err() {
            warn!("aggregator already attached, keeping the first one");
        }
        agg
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub async fn route(&self, env: &Envelope) {
        if env.is_message() {
            self.on_message(env).await;
        } else if env.event_type == event_type::RECEIPT {
            self.on_receipt(env);
        } else {
            self.on_any(env);
        }
    }

    async fn on_message(&self, env: &Envelope) {
        let chat = jid::canonical_chat_id(&env.chat_id);
        if env.is_outbound() {
            if !chat.is_empty() {
                self.profiles.append_media(&chat, env).await;
                self.profiles.record_outbound(&chat).await;
            }
            debug!(chat = %chat, "outbound echo recorded");
            return;
        }

        self.profiles.touch_inbound(env).await;
        if !chat.is_empty() {
            self.profiles.append_media(&chat, env).await;
        }

        if let Some(filter) = self.filters.rejected_by(env) {
            info!(chat = %chat, from = %env.sender_id, filter, "message filtered");
            return;
        }
        if chat.is_empty() {
            return;
        }

        let sender = jid::canonical_chat_id(&env.sender_id);
        {
            let mut last = self.lock_last();
            if !sender.is_empty() {
                last.chat_by_sender.insert(sender.clone(), chat.clone());
            }
            last.active_chat = chat.clone();
            last.by_chat.insert(chat.clone(), env.clone());
        }
        if let Some(agg) = self.aggregator.get() {
            agg.add(&chat);
        }
        info!(
            chat = %chat,
            from = %sender,
            text = %preview(&env.text),
            text_len = env.text.trim().chars().count(),
            "message"
        );
    }

    fn on_receipt(&self, env: &Envelope) {
        if let Some(filter) = self.filters.rejected_by(env) {
            debug!(chat = %env.chat_id, filter, "receipt filtered");
            return;
        }
        if !env.message_ids.is_empty() {
            info!(
                chat = %env.chat_id,
                count = env.message_ids.len(),
                receipt_type = %env.receipt_type,
                "receipt"
            );
        }
    }

    fn on_any(&self, env: &Envelope) {
        if is_typing_event(env) {
            self.on_typing(env);
            return;
        }
        if let Some(filter) = self.filters.rejected_by(env) {
            debug!(event_type = %env.event_type, chat = %env.chat_id, filter, "event filtered");
            return;
        }
        info!(event_type = %env.event_type, chat = %env.chat_id, from = %env.sender_id, "event");
    }

    fn on_typing(&self, env: &Envelope) {
        let Some(agg) = self.aggregator.get() else {
            return;
        };
        let raw = jid::canonical_chat_id(&env.chat_id);
        let sender = jid::canonical_chat_id(&env.sender_id);
        let chat = {
            let mut last = self.lock_last();
            let mut chat = match last.chat_by_sender.get(&sender) {
                Some(mapped) if *mapped != raw => mapped.clone(),
                _ => raw,
            };
            if chat.is_empty() {
                chat = last.active_chat.clone();
            }
            if chat.is_empty() || !last.by_chat.contains_key(&chat) {
                return;
            }
            let now = Instant::now();
            if let Some(prev) = last.typing_at.get(&chat) {
                if now.duration_since(*prev) < TYPING_DEBOUNCE {
                    return;
                }
            }
            last.typing_at.insert(chat.clone(), now);
            chat
        };
        agg.touch(&chat);
    }

    async fn flush(&self, chat: &str, count: usize) -> Result<(), DomainError> {
        let mut cancel = self.cancel.clone();
        sleep_or_cancel(self.pacing.pre_reply_delay, &mut cancel).await?;

        let last = self.lock_last().by_chat.get(chat).cloned();
        let reply = match last {
            Some(env) if !env.text.trim().is_empty() => self.ask_backend(&env).await,
            _ => None,
        };
        let reply = reply.unwrap_or_else(|| fallback_reply(count));
        let waited = self.reply_with_typing(chat, &reply).await?;
        info!(
            chat = %chat,
            count,
            reply_len = reply.chars().count(),
            reply = %preview(&reply),
            typing_ms = waited.as_millis() as u64,
            "reply sent"
        );
        Ok(())
    }

    async fn ask_backend(&self, env: &Envelope) -> Option<String> {
        let session = format!("wa-{}", jid::user_part(&jid::canonical_chat_id(&env.sender_id)));
        match self.backend.ask(&session, &env.text, BUSINESS_CHANNEL).await {
            Ok(r) if !r.reply.trim().is_empty() => Some(r.reply),
            Ok(_) => None,
            Err(e) => {
                warn!(session = %session, error = %e, "business backend failed");
                None
            }
        }
    }

    /// Typing on, paced wait, send, short pause, typing off. Returns the paced wait.
    pub async fn reply_with_typing(&self, chat: &str, text: &str) -> Result<Duration, DomainError> {
        let mut cancel = self.cancel.clone();
        if let Err(e) = self.engine.set_typing(chat, true, PresenceMedia::Text).await {
            debug!(chat = %chat, error = %e, "typing on failed");
        }
        let wait = reply_wait(&self.pacing, text, self.jitter());
        sleep_or_cancel(wait, &mut cancel).await?;
        if let Err(e) = self.engine.send_text(chat, text).await {
            warn!(chat = %chat, error = %e, "reply send failed");
        }
        sleep_or_cancel(self.pacing.typing_pause, &mut cancel).await?;
        if let Err(e) = self.engine.set_typing(chat, false, PresenceMedia::Text).await {
            debug!(chat = %chat, error = %e, "typing off failed");
        }
        Ok(wait)
    }

    fn jitter(&self) -> Duration {
        if self.pacing.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..self.pacing.jitter_ms))
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, LastSeen> {
        self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl WindowObserver for Router {
    fn on_transition(&self, chat: &str, reason: WindowReason, count: usize, window: Duration) {
        if reason != WindowReason::Fire {
            info!(chat = %chat, %reason, count, window_secs = window.as_secs(), "aggregation window");
        }
    }

    async fn on_flush(&self, chat: &str, count: usize) {
        if let Err(e) = self.flush(chat, count).await {
            warn!(chat = %chat, count, error = %e, "flush aborted");
        }
    }
}

/// `base + per_char * chars + jitter`, capped at `max_wait`.
pub fn reply_wait(pacing: &ReplyPacing, text: &str, jitter: Duration) -> Duration {
    let chars = text.chars().count() as u32;
    (pacing.base_wait + pacing.per_char * chars + jitter).min(pacing.max_wait)
}

pub fn fallback_reply(count: usize) -> String {
    format!("Received {count} message(s) in the window.")
}

/// Whether an envelope signals that the user is composing.
pub fn is_typing_event(env: &Envelope) -> bool {
    let et = env.event_type.trim().to_ascii_lowercase();
    let state = env
        .extra
        .get("state")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase());
    let typing_state = state.as_deref().is_some_and(|s| TYPING_STATES.contains(&s));

    if et == event_type::CHAT_PRESENCE && typing_state {
        return true;
    }
    if et == event_type::TYPING || et == event_type::PRESENCE {
        if typing_state {
            return true;
        }
        let flag = match env.extra.get("typing") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
            _ => false,
        };
        if state.is_none() && flag {
            return true;
        }
    }
    let rt = env.receipt_type.trim().to_ascii_lowercase();
    rt == "composing" || rt == "typing"
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= LOG_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut s: String = trimmed.chars().take(LOG_PREVIEW_CHARS).collect();
    s.push('…');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::profile_json::ProfileJsonStore;
    use crate::domain::Direction;
    use crate::shared::shutdown::cancel_pair;
    use crate::usecases::testing::{FakeBusiness, FakeEngineControl};
    use serde_json::json;

    struct Harness {
        router: Arc<Router>,
        engine: Arc<FakeEngineControl>,
        backend: Arc<FakeBusiness>,
        agg: Arc<Aggregator>,
        _dir: tempfile::TempDir,
        _tx: tokio::sync::watch::Sender<bool>,
    }

    fn pacing() -> ReplyPacing {
        ReplyPacing {
            base_wait: Duration::from_millis(100),
            per_char: Duration::from_millis(10),
            jitter_ms: 0,
            max_wait: Duration::from_millis(1000),
            typing_pause: Duration::from_millis(50),
            pre_reply_delay: Duration::from_millis(200),
        }
    }

    fn harness(reply: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(ProfileJsonStore::new(dir.path()));
        let profiles = Arc::new(ProfileStore::new(snapshots, dir.path()));
        let engine = Arc::new(FakeEngineControl::default());
        let backend = Arc::new(FakeBusiness::replying(reply));
        let (tx, rx) = cancel_pair();
        let router = Router::new(
            engine.clone(),
            backend.clone(),
            profiles,
            FilterChain::standard(),
            pacing(),
            rx,
        );
        let agg = router.start_aggregator(Duration::from_secs(3));
        Harness {
            router,
            engine,
            backend,
            agg,
            _dir: dir,
            _tx: tx,
        }
    }

    fn inbound(text: &str, id: &str) -> Envelope {
        Envelope::message(Direction::In, "5491100@s.whatsapp.net", "5491100@s.whatsapp.net", id, text)
    }

    fn presence(state: &str) -> Envelope {
        let mut env = Envelope::new(event_type::CHAT_PRESENCE);
        env.chat_id = "5491100@s.whatsapp.net".into();
        env.sender_id = "5491100@s.whatsapp.net".into();
        env.extra.insert("state".into(), json!(state));
        env
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_flushes_once_with_backend_reply() {
        let h = harness(Some("Hola!"));
        h.router.route(&inbound("hola", "A")).await;
        h.router.route(&inbound("¿precio?", "B")).await;
        assert_eq!(h.agg.pending("5491100@s.whatsapp.net"), Some(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let asked = h.backend.asked.lock().unwrap().clone();
        assert_eq!(asked, vec![("wa-5491100".to_string(), "¿precio?".to_string())]);
        assert_eq!(
            h.engine.calls(),
            vec![
                "typing 5491100@s.whatsapp.net true",
                "send 5491100@s.whatsapp.net Hola!",
                "typing 5491100@s.whatsapp.net false",
            ]
        );
        let p = h.router.profiles().get("5491100@s.whatsapp.net").unwrap();
        assert_eq!(p.metrics.msg_in, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_sends_fallback() {
        let h = harness(None);
        h.router.route(&inbound("hola", "A")).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h
            .engine
            .calls()
            .contains(&"send 5491100@s.whatsapp.net Received 1 message(s) in the window.".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_extends_live_window_only() {
        let h = harness(Some("ok"));
        // no message seen yet: ignored
        h.router.route(&presence("composing")).await;
        assert_eq!(h.agg.pending("5491100@s.whatsapp.net"), None);

        h.router.route(&inbound("hola", "A")).await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.router.route(&presence("composing")).await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.agg.pending("5491100@s.whatsapp.net"), Some(1), "typing did not extend");
        assert!(h.engine.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_echo_only_counts() {
        let h = harness(Some("ok"));
        let out = Envelope::message(Direction::Out, "5491100@s.whatsapp.net", "", "O1", "hi");
        h.router.route(&out).await;
        assert_eq!(h.agg.pending("5491100@s.whatsapp.net"), None);
        let p = h.router.profiles().get("5491100@s.whatsapp.net").unwrap();
        assert_eq!(p.metrics.msg_out, 1);
        assert_eq!(p.metrics.msg_in, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_message_still_touches_profile() {
        let h = harness(Some("ok"));
        let anon = Envelope::message(Direction::In, "5491100@s.whatsapp.net", "", "A", "hola");
        h.router.route(&anon).await;
        assert_eq!(h.agg.pending("5491100@s.whatsapp.net"), None);
        assert!(h.router.profiles().get("5491100@s.whatsapp.net").is_some());
    }

    #[test]
    fn test_typing_detection() {
        assert!(is_typing_event(&presence("composing")));
        assert!(is_typing_event(&presence(" Recording ")));
        assert!(!is_typing_event(&presence("paused")));

        let mut flag = Envelope::new(event_type::TYPING);
        flag.extra.insert("typing".into(), json!("1"));
        assert!(is_typing_event(&flag));

        let mut receipt = Envelope::new(event_type::RECEIPT);
        receipt.receipt_type = "composing".into();
        assert!(is_typing_event(&receipt));

        assert!(!is_typing_event(&Envelope::new(event_type::GROUP_UPDATE)));
    }

    #[test]
    fn test_reply_wait_capped() {
        let p = pacing();
        assert_eq!(reply_wait(&p, "hola", Duration::ZERO), Duration::from_millis(140));
        assert_eq!(reply_wait(&p, &"x".repeat(500), Duration::ZERO), p.max_wait);
    }
}
