//! Time-bounded, in-memory message store.
//!
//! Messages are appended in arrival order and never re-sorted. Because every
//! entry is stamped with the environment clock at insertion time, creation
//! times are non-decreasing front to back, so eviction only ever needs to pop
//! from the front.
//!
//! Reads filter out anything older than the retention window even when the
//! background eviction task has not run yet.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::env::Environment;

/// How long a message stays readable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// How often the background task sweeps expired messages.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// A single stored message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<I> {
    sender: String,
    content: String,
    created_at: I,
    sent_at_secs: u64,
}

impl<I: Copy> Message<I> {
    /// Who sent the message (`peer3`, `host`, `me`, ...).
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Message text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Monotonic creation time, used for expiry.
    pub fn created_at(&self) -> I {
        self.created_at
    }

    /// Wall-clock creation time in Unix seconds, used for display.
    pub fn sent_at_secs(&self) -> u64 {
        self.sent_at_secs
    }
}

impl<I> fmt::Display for Message<I> {
    /// Renders as `[HH:MM:SS] sender: content` (UTC).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs_of_day = self.sent_at_secs % SECS_PER_DAY;
        write!(
            f,
            "[{:02}:{:02}:{:02}] {}: {}",
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60,
            self.sender,
            self.content
        )
    }
}

/// Ordered, time-bounded message store shared between workers.
///
/// Cloning is cheap and every clone sees the same messages. All operations
/// take a short-lived internal lock that is never held across an `.await`.
#[derive(Clone)]
pub struct MessageStore<E: Environment> {
    env: E,
    retention: Duration,
    messages: Arc<Mutex<VecDeque<Message<E::Instant>>>>,
    eviction: Arc<Mutex<Option<CancellationToken>>>,
}

impl<E: Environment> fmt::Debug for MessageStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore")
            .field("retention", &self.retention)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> MessageStore<E> {
    /// Create an empty store with the given retention window.
    ///
    /// No background eviction runs until [`MessageStore::spawn_eviction`].
    pub fn new(env: E, retention: Duration) -> Self {
        Self {
            env,
            retention,
            messages: Arc::new(Mutex::new(VecDeque::new())),
            eviction: Arc::new(Mutex::new(None)),
        }
    }

    /// Retention window this store enforces.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a message stamped with the current time.
    ///
    /// Returns a copy of the stored message.
    pub fn add(&self, sender: impl Into<String>, content: impl Into<String>) -> Message<E::Instant> {
        let mut messages = self.messages();

        // Stamp under the lock so insertion order and time order agree.
        let message = Message {
            sender: sender.into(),
            content: content.into(),
            created_at: self.env.now(),
            sent_at_secs: self.env.wall_clock_secs(),
        };

        debug_assert!(messages.back().is_none_or(|last| last.created_at <= message.created_at));
        messages.push_back(message.clone());
        message
    }

    /// Up to the `limit` most recent unexpired messages, oldest first.
    ///
    /// `None` returns every unexpired message. Never mutates the store.
    pub fn get(&self, limit: Option<usize>) -> Vec<Message<E::Instant>> {
        let now = self.env.now();
        let messages = self.messages();

        let first_live = messages.partition_point(|m| self.is_expired(m, now));
        let live = messages.len() - first_live;
        let take = limit.map_or(live, |limit| limit.min(live));

        messages.iter().skip(messages.len() - take).cloned().collect()
    }

    /// Pop expired messages from the front. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.env.now();
        let mut messages = self.messages();

        let mut evicted = 0;
        while messages.front().is_some_and(|m| self.is_expired(m, now)) {
            messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Number of stored messages, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.messages().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    /// Start the background eviction task, sweeping every `interval`.
    ///
    /// Replaces (and cancels) a previously running task. Must be called from
    /// within a tokio runtime.
    pub fn spawn_eviction(&self, interval: Duration) -> JoinHandle<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.eviction_slot().replace(token.clone()) {
            previous.cancel();
        }

        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = store.env.sleep(interval) => {
                        let evicted = store.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = store.len(), "evicted expired messages");
                        }
                    },
                }
            }
            tracing::debug!("message eviction stopped");
        })
    }

    /// Stop background eviction. `add` and `get` keep working.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.eviction_slot().take() {
            token.cancel();
        }
    }

    fn is_expired(&self, message: &Message<E::Instant>, now: E::Instant) -> bool {
        now - message.created_at > self.retention
    }

    fn messages(&self) -> MutexGuard<'_, VecDeque<Message<E::Instant>>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn eviction_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.eviction.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
