//! Implements EnvelopeSink. Appends envelopes as NDJSON, partitioned by conversation.
//!
//! Layout: `<base>/<category>/<sanitized-key>.ndjson`, category one of
//! `contacts`, `groups`, `devices`, `system`. When a write would push a file past
//! `max_bytes`, it goes to `<file>.part1`, `<file>.part2`, ... Appends always target the
//! newest file, so reading base then parts in order yields lines in write order.

use crate::domain::entities::event_type;
use crate::domain::jid::{self, ChatKind};
use crate::domain::{DomainError, Envelope};
use crate::ports::EnvelopeSink;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Upper bound on rotated siblings per file.
const MAX_PARTS: u32 = 1000;

pub struct FolderSink {
    base_dir: PathBuf,
    /// Rotation ceiling in bytes; `<= 0` disables rotation.
    max_bytes: i64,
    host_id: String,
    /// Serializes rotation decisions and appends.
    write_lock: tokio::sync::Mutex<()>,
}

impl FolderSink {
    pub fn new(base_dir: impl AsRef<Path>, max_bytes: i64, host_id: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_bytes,
            host_id: host_id.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Partition and key for an envelope.
    pub fn category_and_key(&self, env: &Envelope) -> (&'static str, String) {
        let chat = jid::canonical_chat_id(&env.chat_id);
        if !chat.is_empty() {
            return match jid::chat_kind(&chat) {
                ChatKind::Group => ("groups", chat),
                ChatKind::Status if !env.sender_id.trim().is_empty() => {
                    ("contacts", jid::canonical_chat_id(&env.sender_id))
                }
                _ => ("contacts", chat),
            };
        }
        if event_type::is_device_event(&env.event_type) {
            return ("devices", self.host_id.clone());
        }
        ("system", env.event_type.clone())
    }

    /// File an envelope belongs to before rotation.
    pub fn path_for(&self, env: &Envelope) -> PathBuf {
        let (category, key) = self.category_and_key(env);
        self.base_dir
            .join(category)
            .join(format!("{}.ndjson", jid::sanitize_path_part(&key)))
    }

    /// Path of the `.contacts` / `.groups` log for a chat id, as recorded in profile tags.
    pub fn chat_log_path(&self, chat_id: &str) -> PathBuf {
        let env = Envelope {
            chat_id: chat_id.to_string(),
            ..Default::default()
        };
        self.path_for(&env)
    }

    async fn size_of(path: &Path) -> Result<Option<u64>, DomainError> {
        match fs::metadata(path).await {
            Ok(m) => Ok(Some(m.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::Sink(e.to_string())),
        }
    }

    /// True when `incoming` more bytes fit in a file of size `current`.
    fn fits(&self, current: Option<u64>, incoming: u64) -> bool {
        match current {
            None | Some(0) => true,
            Some(size) => size.saturating_add(incoming) <= self.max_bytes as u64,
        }
    }

    /// Picks the file to append `incoming` bytes to: the newest existing file (base or
    /// highest `.partN`), or the next part once that one is full. Never moves backwards.
    async fn rotate_target(&self, path: PathBuf, incoming: u64) -> Result<PathBuf, DomainError> {
        if self.max_bytes <= 0 {
            return Ok(path);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part = |i: u32| {
            if i == 0 {
                path.clone()
            } else {
                path.with_file_name(format!("{}.part{}", name, i))
            }
        };

        let mut current = 0;
        while current < MAX_PARTS && Self::size_of(&part(current + 1)).await?.is_some() {
            current += 1;
        }
        if self.fits(Self::size_of(&part(current)).await?, incoming) {
            return Ok(part(current));
        }
        if current >= MAX_PARTS {
            return Err(DomainError::Sink(format!(
                "no free rotation slot for {}",
                path.display()
            )));
        }
        Ok(part(current + 1))
    }
}

#[async_trait::async_trait]
impl EnvelopeSink for FolderSink {
    /// Appends payload + newline in a single write.
    async fn append(&self, env: &Envelope, payload: &[u8]) -> Result<PathBuf, DomainError> {
        let base_path = self.path_for(env);
        if let Some(dir) = base_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| DomainError::Sink(e.to_string()))?;
        }
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let path = self.rotate_target(base_path, line.len() as u64).await?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DomainError::Sink(e.to_string()))?;
        f.write_all(&line)
            .await
            .map_err(|e| DomainError::Sink(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| DomainError::Sink(e.to_string()))?;
        debug!(
            path = %path.display(),
            event_type = %env.event_type,
            bytes = line.len(),
            "appended envelope"
        );
        Ok(path)
    }
}
