//! Implements ProfileSnapshotPort using one JSON file per chat.
//!
//! Files live at `<base>/profiles/<sanitized-chat-id>.json`.

use crate::domain::jid::sanitize_path_part;
use crate::domain::{DomainError, Profile};
use crate::ports::ProfileSnapshotPort;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct ProfileJsonStore {
    dir: PathBuf,
    /// Suffix for temp files so overlapping saves never share one.
    seq: AtomicU64,
}

impl ProfileJsonStore {
    /// `base` is the outbox root; snapshots go to its `profiles/` subdirectory.
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            dir: base.as_ref().join("profiles"),
            seq: AtomicU64::new(0),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_path_part(key)))
    }
}

#[async_trait::async_trait]
impl ProfileSnapshotPort for ProfileJsonStore {
    async fn load(&self, key: &str) -> Result<Option<Profile>, DomainError> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DomainError::Profile(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DomainError::Profile(format!("decode {}: {}", path.display(), e)))
    }

    /// Write-replace: temp file, fsync, rename over the target.
    async fn save(&self, profile: &Profile) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(profile)
            .map_err(|e| DomainError::Profile(e.to_string()))?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DomainError::Profile(format!("create profiles dir: {}", e)))?;

        let path = self.path_for(&profile.key);
        let temp_path = path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        ));
        let written = write_synced(&temp_path, json.as_bytes()).await;
        let renamed = match written {
            Ok(()) => fs::rename(&temp_path, &path)
                .await
                .map_err(|e| DomainError::Profile(format!("atomic rename failed: {}", e))),
            Err(e) => Err(e),
        };
        if renamed.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        renamed
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), DomainError> {
    let mut f = fs::File::create(path)
        .await
        .map_err(|e| DomainError::Profile(format!("create temp file: {}", e)))?;
    f.write_all(bytes)
        .await
        .map_err(|e| DomainError::Profile(format!("write temp file: {}", e)))?;
    f.sync_all()
        .await
        .map_err(|e| DomainError::Profile(format!("sync temp file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn temp_files(base: &Path) -> usize {
        std::fs::read_dir(base.join("profiles"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileJsonStore::new(dir.path());
        let mut p = Profile::new("5@s.whatsapp.net", Utc::now());
        p.name = "Ana & Co".into();
        p.metrics.msg_in = 3;
        store.save(&p).await.unwrap();

        let path = dir.path().join("profiles").join("5_s.whatsapp.net.json");
        assert!(path.exists());
        assert_eq!(temp_files(dir.path()), 0);

        let loaded = store.load("5@s.whatsapp.net").await.unwrap().unwrap();
        assert_eq!(loaded, p);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileJsonStore::new(dir.path());
        assert!(store.load("nobody@s.whatsapp.net").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileJsonStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("profiles")).unwrap();
        std::fs::write(store.path_for("x@s.whatsapp.net"), b"{not json").unwrap();
        assert!(store.load("x@s.whatsapp.net").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_saves_leave_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileJsonStore::new(dir.path()));
        let mut tasks = Vec::new();
        for i in 0..16u64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut p = Profile::new("7@s.whatsapp.net", Utc::now());
                p.metrics.msg_in = i;
                store.save(&p).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let loaded = store.load("7@s.whatsapp.net").await.unwrap().unwrap();
        assert!(loaded.metrics.msg_in < 16);
        assert_eq!(temp_files(dir.path()), 0);
    }
}
