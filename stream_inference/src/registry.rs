//! Client session registry: maps opaque client identities to their smoothing
//! windows. Entries are created lazily on first sight of an id. Eviction is
//! off by default, matching the original long-lived-client behavior, and can
//! be enabled with a capacity bound and/or idle reaping.

use crate::smoothing::SmoothingWindow;
use dashmap::DashMap;
use ndarray::Array2;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One client's mutable state. The window mutex serializes same-client
/// requests so concurrent updates cannot interleave and break the padding
/// invariant; different clients never contend on it.
pub struct ClientSession {
    window: Mutex<SmoothingWindow>,
    last_seen: Mutex<Instant>,
}

impl ClientSession {
    fn new(window_size: usize) -> Self {
        Self {
            window: Mutex::new(SmoothingWindow::new(window_size)),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Applies one probability batch to this client's window, holding the
    /// window lock for the whole transition.
    pub fn smooth(&self, probs: Array2<f32>) -> Array2<f32> {
        self.window.lock().update(probs)
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ClientSession>>,
    window_size: usize,
    max_clients: Option<usize>,
}

impl SessionRegistry {
    pub fn new(window_size: usize, max_clients: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            window_size,
            max_clients,
        }
    }

    /// Returns the session for `client_id`, creating it on first sight.
    /// Concurrent first requests for the same id resolve to a single entry
    /// through the map's entry API; distinct ids proceed in parallel.
    pub fn get_or_create(&self, client_id: &str) -> Arc<ClientSession> {
        if let Some(existing) = self.sessions.get(client_id) {
            existing.touch();
            return Arc::clone(existing.value());
        }

        if let Some(capacity) = self.max_clients {
            // Best effort: a burst of brand-new ids can briefly overshoot.
            while self.sessions.len() >= capacity {
                if !self.evict_least_recent() {
                    break;
                }
            }
        }

        let session = self
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(ClientSession::new(self.window_size)))
            .value()
            .clone();
        session.touch();
        session
    }

    /// Drops every session idle for at least `ttl`; returns how many were
    /// removed. In-flight requests keep their `Arc` alive until they finish.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.idle_for() < ttl);
        before.saturating_sub(self.sessions.len())
    }

    fn evict_least_recent(&self) -> bool {
        let stalest = self
            .sessions
            .iter()
            .max_by_key(|entry| entry.value().idle_for())
            .map(|entry| entry.key().clone());

        match stalest {
            Some(key) => {
                tracing::debug!(client_id = %key, "evicting least recently seen client session");
                self.sessions.remove(&key).is_some()
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
