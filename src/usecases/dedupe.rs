//! Time-windowed "seen" set for message ids (and receipt keys).
//!
//! Constructed once and shared by reference; no global state.

use crate::shared::shutdown::{CancelRx, cancelled};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default interval between eviction sweeps.
pub const DEFAULT_SWEEP_EVERY: Duration = Duration::from_secs(60);

pub struct DedupeCache {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true when `id` was already seen within the window (timestamp left as is).
    /// Otherwise records `id` now and returns false. An empty id is never a duplicate.
    pub fn seen(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(first) = seen.get(id) {
            if now.duration_since(*first) <= self.window {
                return true;
            }
        }
        seen.insert(id.to_string(), now);
        false
    }

    /// Drops entries older than the window. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let before = seen.len();
        seen.retain(|_, first| now.duration_since(*first) <= self.window);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic sweep; stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut cancel: CancelRx,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.sweep();
                        if evicted > 0 {
                            debug!(evicted, remaining = cache.len(), "dedupe sweep");
                        }
                    }
                    _ = cancelled(&mut cancel) => break,
                }
            }
        })
    }
}
