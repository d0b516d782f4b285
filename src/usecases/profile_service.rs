//! In-memory profile registry with write-through snapshots.
//!
//! Memory is authoritative. Every mutation copies the touched profile out of the lock
//! and persists it through [`ProfileSnapshotPort`]; a failed write is logged and the
//! next mutation simply writes again. Mutations on one key run under a per-key gate
//! held until the snapshot lands, so the file never trails memory.

use crate::domain::jid::{self, sanitize_path_part};
use crate::domain::profile::DEFAULT_MEDIA_CAP;
use crate::domain::{Direction, Envelope, Profile};
use crate::ports::ProfileSnapshotPort;
use chrono::{Local, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const TAG_CONTACTS_LOG: &str = "out.contacts_ndjson";
pub const TAG_GROUP_LOG_PREFIX: &str = "out.group.";

pub struct ProfileStore {
    snapshots: Arc<dyn ProfileSnapshotPort>,
    profiles: Mutex<HashMap<String, Profile>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Root of the NDJSON outbox whose paths are recorded in profile tags.
    log_base: PathBuf,
    media_cap: usize,
}

impl ProfileStore {
    pub fn new(snapshots: Arc<dyn ProfileSnapshotPort>, log_base: impl Into<PathBuf>) -> Self {
        Self {
            snapshots,
            profiles: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            log_base: log_base.into(),
            media_cap: DEFAULT_MEDIA_CAP,
        }
    }

    pub fn with_media_cap(mut self, cap: usize) -> Self {
        self.media_cap = cap;
        self
    }

    /// Resident copy of a profile, if any.
    pub fn get(&self, key: &str) -> Option<Profile> {
        let key = jid::canonical_chat_id(key);
        self.lock().get(&key).cloned()
    }

    /// Copies of every resident profile, sorted by key.
    pub fn snapshot_all(&self) -> Vec<Profile> {
        let mut all: Vec<Profile> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Applies an inbound message: identity, last seen, counters, streak and log tags.
    /// Keyed by chat, falling back to the sender. Returns the updated copy.
    pub async fn touch_inbound(&self, env: &Envelope) -> Option<Profile> {
        let raw_key = if env.chat_id.trim().is_empty() {
            &env.sender_id
        } else {
            &env.chat_id
        };
        let key = jid::canonical_chat_id(raw_key);
        if key.is_empty() {
            return None;
        }
        let gate = self.gate(&key);
        let _serialized = gate.lock().await;
        self.ensure_resident(&key).await;

        let now = Utc::now();
        let today = Local::now().date_naive();
        let chat = jid::canonical_chat_id(&env.chat_id);
        let copy = {
            let mut profiles = self.lock();
            let p = profiles
                .entry(key.clone())
                .or_insert_with(|| Profile::new(&key, now));
            p.record_inbound(now, today, &env.chat_name, &env.message_id, &env.text);
            if !chat.is_empty() {
                if jid::is_group(&chat) {
                    p.tags.insert(
                        format!("{TAG_GROUP_LOG_PREFIX}{chat}"),
                        self.log_path("groups", &chat),
                    );
                } else {
                    p.tags
                        .insert(TAG_CONTACTS_LOG.to_string(), self.log_path("contacts", &chat));
                }
            }
            p.clone()
        };
        self.persist(&copy).await;
        Some(copy)
    }

    /// Counts one outbound message for `chat`.
    pub async fn record_outbound(&self, chat: &str) -> Option<Profile> {
        let key = jid::canonical_chat_id(chat);
        if key.is_empty() {
            return None;
        }
        let gate = self.gate(&key);
        let _serialized = gate.lock().await;
        self.ensure_resident(&key).await;
        let now = Utc::now();
        let copy = {
            let mut profiles = self.lock();
            let p = profiles
                .entry(key.clone())
                .or_insert_with(|| Profile::new(&key, now));
            p.record_outbound(now);
            p.clone()
        };
        self.persist(&copy).await;
        Some(copy)
    }

    /// Appends the envelope's media ticket to the chat's history for its direction.
    /// Envelopes without typed media are ignored.
    pub async fn append_media(&self, chat: &str, env: &Envelope) -> Option<Profile> {
        let media = env.media.as_ref().filter(|m| m.kind.is_some())?;
        let key = jid::canonical_chat_id(chat);
        if key.is_empty() {
            return None;
        }
        let direction = env.direction.unwrap_or(Direction::In);
        let mut ticket = media.clone();
        ticket.direction = Some(direction);
        if ticket.chat_id.is_empty() {
            ticket.chat_id = key.clone();
        }
        if ticket.sender_id.is_empty() {
            ticket.sender_id = env.sender_id.clone();
        }
        if ticket.message_id.is_empty() {
            ticket.message_id = env.message_id.clone();
        }
        if ticket.caption.is_empty() {
            ticket.caption = env.text.clone();
        }
        let now = Utc::now();
        ticket.at = Some(env.at.or(ticket.at).unwrap_or(now));

        let gate = self.gate(&key);
        let _serialized = gate.lock().await;
        self.ensure_resident(&key).await;
        let copy = {
            let mut profiles = self.lock();
            let p = profiles
                .entry(key.clone())
                .or_insert_with(|| Profile::new(&key, now));
            p.push_media(direction, ticket, self.media_cap);
            p.clone()
        };
        self.persist(&copy).await;
        Some(copy)
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(key.to_string()).or_default())
    }

    /// Loads the snapshot of a non-resident profile. Callers hold the key's gate; the
    /// map lock is not held across the disk read.
    async fn ensure_resident(&self, key: &str) {
        if self.lock().contains_key(key) {
            return;
        }
        let loaded = match self.snapshots.load(key).await {
            Ok(p) => p,
            Err(e) => {
                warn!(key = %key, error = %e, "profile snapshot unreadable, starting fresh");
                None
            }
        };
        if let Some(mut p) = loaded {
            p.key = key.to_string();
            self.lock().entry(key.to_string()).or_insert(p);
        }
    }

    async fn persist(&self, profile: &Profile) {
        if let Err(e) = self.snapshots.save(profile).await {
            warn!(key = %profile.key, error = %e, "profile snapshot failed");
        }
    }

    fn log_path(&self, category: &str, chat: &str) -> String {
        self.log_base
            .join(category)
            .join(format!("{}.ndjson", sanitize_path_part(chat)))
            .to_string_lossy()
            .into_owned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Profile>> {
        self.profiles.lock().unwrap_or_else(|e| e.into_inner())
    }
}
