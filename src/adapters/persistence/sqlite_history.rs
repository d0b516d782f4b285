//! libsql-backed message history. Implements HistoryPort.
//!
//! `chats` holds one row per canonical chat id, `messages` one row per message id
//! (insert-or-replace). Timestamps are unix milliseconds. One file: `<data_dir>/messages.db`.

use crate::domain::DomainError;
use crate::ports::{HistoryEntry, HistoryPort};
use chrono::{TimeZone, Utc};
use libsql::{Database, params};
use std::path::{Path, PathBuf};
use tracing::info;

const CHATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    jid TEXT PRIMARY KEY
)"#;

const MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_jid TEXT NOT NULL,
    sender TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    is_from_me INTEGER NOT NULL DEFAULT 0,
    media_type TEXT,
    filename TEXT,
    url TEXT
)"#;
const MESSAGES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages (chat_jid, timestamp DESC)";

pub struct SqliteHistory {
    db: Database,
    db_path: PathBuf,
}

fn db_err(e: impl std::fmt::Display) -> DomainError {
    DomainError::History(e.to_string())
}

impl SqliteHistory {
    /// Open (or create) the database and ensure the schema. Failure here is fatal at startup.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(db_err)?;
        let db_path = base.join("messages.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        // PRAGMA returns a row; consume it (execute fails when rows are returned).
        let mut wal_rows = conn
            .query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DomainError::History(format!("WAL pragma failed: {}", e)))?;
        while wal_rows.next().await.map_err(db_err)?.is_some() {}

        conn.execute(CHATS_TABLE, ()).await.map_err(db_err)?;
        conn.execute(MESSAGES_TABLE, ()).await.map_err(db_err)?;
        conn.execute(MESSAGES_INDEX, ()).await.map_err(db_err)?;

        info!(path = %db_path.display(), "message history ready");
        Ok(Self { db, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait::async_trait]
impl HistoryPort for SqliteHistory {
    async fn save_message(&self, entry: &HistoryEntry) -> Result<(), DomainError> {
        let conn = self.db.connect().map_err(db_err)?;
        conn.execute(
            "INSERT OR IGNORE INTO chats (jid) VALUES (?1)",
            params![entry.chat_id.as_str()],
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO messages
                (id, chat_jid, sender, content, timestamp, is_from_me, media_type, filename, url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id.as_str(),
                entry.chat_id.as_str(),
                entry.sender.as_str(),
                entry.content.as_str(),
                entry.timestamp.timestamp_millis(),
                entry.is_from_me as i64,
                entry.media_type.clone(),
                entry.filename.clone(),
                entry.url.clone()
            ],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, DomainError> {
        let conn = self.db.connect().map_err(db_err)?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, sender, content, timestamp, is_from_me, media_type, filename, url
                FROM messages
                WHERE chat_jid = ?1
                ORDER BY timestamp DESC
                LIMIT ?2
                "#,
                params![chat_id, limit as i64],
            )
            .await
            .map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let ts_ms: i64 = row.get(3).map_err(db_err)?;
            let from_me: i64 = row.get(4).unwrap_or(0);
            let opt = |i: i32| row.get::<String>(i).ok().filter(|s| !s.is_empty());
            out.push(HistoryEntry {
                id: row.get(0).map_err(db_err)?,
                chat_id: chat_id.to_string(),
                sender: row.get::<String>(1).unwrap_or_default(),
                content: row.get::<String>(2).unwrap_or_default(),
                timestamp: Utc
                    .timestamp_millis_opt(ts_ms)
                    .single()
                    .unwrap_or_default(),
                is_from_me: from_me != 0,
                media_type: opt(5),
                filename: opt(6),
                url: opt(7),
            });
        }
        // oldest first
        out.reverse();
        Ok(out)
    }
}
