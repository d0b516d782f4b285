//! Per-chat debounce windows. Collapses a burst of inbound activity into one flush.
//!
//! - first message starts a window (`count = 1`)
//! - another message before expiry increments `count` and pushes the deadline
//! - a typing signal pushes the deadline of a live window without counting
//! - expiry fires once with `(chat, count)` and clears the window
//!
//! Each window lifecycle owns one timer task. Flushes for the same chat are serialized
//! through a per-chat gate, so a new burst can start while the previous flush is still
//! replying without the two flushes overlapping.

use crate::shared::shutdown::{CancelRx, cancelled};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowReason {
    Start,
    Message,
    Typing,
    Fire,
}

impl fmt::Display for WindowReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowReason::Start => "start",
            WindowReason::Message => "message",
            WindowReason::Typing => "typing",
            WindowReason::Fire => "fire",
        })
    }
}

/// Receives window transitions and flushes.
#[async_trait::async_trait]
pub trait WindowObserver: Send + Sync {
    /// Every start, reset and fire. Called outside the window lock.
    fn on_transition(&self, _chat: &str, _reason: WindowReason, _count: usize, _window: Duration) {}

    /// The window for `chat` expired after `count` buffered messages.
    async fn on_flush(&self, chat: &str, count: usize);
}

#[derive(Debug)]
struct Window {
    count: usize,
    deadline: Instant,
}

pub struct Aggregator {
    window: Duration,
    observer: Arc<dyn WindowObserver>,
    windows: Mutex<HashMap<String, Window>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancelRx,
}

impl Aggregator {
    pub fn new(window: Duration, observer: Arc<dyn WindowObserver>, cancel: CancelRx) -> Arc<Self> {
        Arc::new(Self {
            window,
            observer,
            windows: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            cancel,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Buffers one message for `chat`. Returns the count in the current window.
    pub fn add(self: &Arc<Self>, chat: &str) -> usize {
        if chat.is_empty() {
            return 0;
        }
        let deadline = Instant::now() + self.window;
        let (reason, count) = {
            let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            match windows.get_mut(chat) {
                Some(w) => {
                    w.count += 1;
                    w.deadline = deadline;
                    (WindowReason::Message, w.count)
                }
                None => {
                    windows.insert(chat.to_string(), Window { count: 1, deadline });
                    (WindowReason::Start, 1)
                }
            }
        };
        if reason == WindowReason::Start {
            let this = Arc::clone(self);
            let chat_owned = chat.to_string();
            tokio::spawn(async move { this.run_window(chat_owned).await });
        }
        self.observer.on_transition(chat, reason, count, self.window);
        count
    }

    /// Pushes the deadline of a live window without counting. Returns false (and does
    /// nothing) when `chat` has no buffered messages.
    pub fn touch(&self, chat: &str) -> bool {
        let count = {
            let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            match windows.get_mut(chat) {
                Some(w) => {
                    w.deadline = Instant::now() + self.window;
                    w.count
                }
                None => return false,
            }
        };
        self.observer
            .on_transition(chat, WindowReason::Typing, count, self.window);
        true
    }

    /// Buffered count of the live window for `chat`, if any.
    pub fn pending(&self, chat: &str) -> Option<usize> {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat)
            .map(|w| w.count)
    }

    fn gate(&self, chat: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(chat.to_string()).or_default())
    }

    async fn run_window(self: Arc<Self>, chat: String) {
        let mut cancel = self.cancel.clone();
        loop {
            let deadline = {
                let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
                match windows.get(&chat) {
                    Some(w) => w.deadline,
                    None => return,
                }
            };
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancelled(&mut cancel) => {
                    debug!(chat = %chat, "window dropped on shutdown");
                    return;
                }
            }
            let fired = {
                let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
                match windows.get(&chat) {
                    Some(w) if w.deadline <= Instant::now() => windows.remove(&chat).map(|w| w.count),
                    Some(_) => None,
                    None => return,
                }
            };
            if let Some(count) = fired {
                self.observer
                    .on_transition(&chat, WindowReason::Fire, count, self.window);
                let gate = self.gate(&chat);
                let _serialized = gate.lock().await;
                self.observer.on_flush(&chat, count).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::shutdown::cancel_pair;

    #[derive(Default)]
    struct Recorder {
        flushes: Mutex<Vec<(String, usize, Instant)>>,
        transitions: Mutex<Vec<(String, WindowReason, usize)>>,
    }

    #[async_trait::async_trait]
    impl WindowObserver for Recorder {
        fn on_transition(&self, chat: &str, reason: WindowReason, count: usize, _window: Duration) {
            self.transitions
                .lock()
                .unwrap()
                .push((chat.to_string(), reason, count));
        }

        async fn on_flush(&self, chat: &str, count: usize) {
            self.flushes
                .lock()
                .unwrap()
                .push((chat.to_string(), count, Instant::now()));
        }
    }

    impl Recorder {
        fn flushes(&self) -> Vec<(String, usize, Instant)> {
            self.flushes.lock().unwrap().clone()
        }
        fn reasons(&self) -> Vec<WindowReason> {
            self.transitions.lock().unwrap().iter().map(|t| t.1).collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_messages_flush_once_after_reset() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        let t0 = Instant::now();

        assert_eq!(agg.add("C"), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(agg.add("C"), 2);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(rec.flushes().is_empty(), "flushed before deadline");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let flushes = rec.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].0, "C");
        assert_eq!(flushes[0].1, 2);
        let at = flushes[0].2.duration_since(t0);
        assert!(at >= Duration::from_secs(4) && at < Duration::from_millis(4050), "{at:?}");
        assert_eq!(
            rec.reasons(),
            vec![WindowReason::Start, WindowReason::Message, WindowReason::Fire]
        );
        assert_eq!(agg.pending("C"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_n_counts_all() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        for _ in 0..7 {
            agg.add("C");
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        let flushes = rec.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].1, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_without_messages_starts_nothing() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        assert!(!agg.touch("C"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rec.flushes().is_empty());
        assert!(rec.reasons().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_extends_without_counting() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        let t0 = Instant::now();
        agg.add("C");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(agg.touch("C"));
        tokio::time::sleep(Duration::from_secs(4)).await;
        let flushes = rec.flushes();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].1, 1);
        assert!(flushes[0].2.duration_since(t0) >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_burst_after_fire_starts_fresh() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(1), rec.clone(), rx);
        agg.add("C");
        agg.add("C");
        tokio::time::sleep(Duration::from_secs(2)).await;
        agg.add("C");
        tokio::time::sleep(Duration::from_secs(2)).await;
        let counts: Vec<_> = rec.flushes().iter().map(|f| f.1).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chats_are_independent() {
        let rec = Arc::new(Recorder::default());
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        agg.add("A");
        tokio::time::sleep(Duration::from_secs(2)).await;
        agg.add("B");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let flushed: Vec<_> = rec.flushes().iter().map(|f| f.0.clone()).collect();
        assert_eq!(flushed, vec!["A".to_string()]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rec.flushes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_windows() {
        let rec = Arc::new(Recorder::default());
        let (tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(3), rec.clone(), rx);
        agg.add("C");
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rec.flushes().is_empty());
    }

    struct SlowFlush {
        active: std::sync::atomic::AtomicUsize,
        max_active: std::sync::atomic::AtomicUsize,
        done: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl WindowObserver for SlowFlush {
        async fn on_flush(&self, _chat: &str, _count: usize) {
            use std::sync::atomic::Ordering;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_for_same_chat_never_overlap() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let obs = Arc::new(SlowFlush {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let (_tx, rx) = cancel_pair();
        let agg = Aggregator::new(Duration::from_secs(1), obs.clone(), rx);
        agg.add("C");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // first flush is still running
        agg.add("C");
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(obs.done.load(Ordering::SeqCst), 2);
        assert_eq!(obs.max_active.load(Ordering::SeqCst), 1);
    }
}
