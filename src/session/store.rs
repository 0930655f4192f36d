//! TTL-bounded session storage.
//!
//! A `DashMap` keyed by session id gives per-key serialization without
//! cross-key contention; a background sweep reclaims expired entries.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{ExpiryPolicy, Session, SessionId};
use crate::config::SessionSettings;
use crate::error::{MeshError, Result};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    default_ttl: Duration,
    policy: ExpiryPolicy,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            default_ttl: DEFAULT_TTL,
            policy: ExpiryPolicy::Absolute,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new()
            .with_default_ttl(Duration::from_secs(settings.default_ttl_secs))
            .with_policy(settings.expiry_policy)
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Create a session with the given TTL.
    ///
    /// Retries identifier generation on the astronomically unlikely collision
    /// with a live entry.
    pub fn create(&self, ttl: Duration) -> Result<Session> {
        if ttl.is_zero() {
            return Err(MeshError::invalid("session TTL must be non-zero"));
        }

        loop {
            let session = Session::new(ttl);
            match self.sessions.entry(session.id) {
                Entry::Vacant(slot) => {
                    debug!(session_id = %session.id, ttl_secs = ttl.as_secs(), "Session created");
                    slot.insert(session.clone());
                    return Ok(session);
                }
                Entry::Occupied(_) => {
                    warn!(session_id = %session.id, "Session id collision, regenerating");
                }
            }
        }
    }

    pub fn create_default(&self) -> Result<Session> {
        self.create(self.default_ttl)
    }

    /// Look up a session. Expired entries report `Expired` (distinct from
    /// `NotFound`) and are left in place for the sweep to reclaim.
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| MeshError::not_found("session", id))?;
        if !entry.is_active() {
            return Err(MeshError::Expired(id.to_string()));
        }
        Ok(entry.clone())
    }

    /// Record an authenticated access, extending expiry only under the
    /// sliding-window policy.
    pub fn touch(&self, id: &SessionId) -> Result<Session> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| MeshError::not_found("session", id))?;
        if !entry.is_active() {
            return Err(MeshError::Expired(id.to_string()));
        }
        entry.touch(self.policy);
        Ok(entry.clone())
    }

    /// Remove a session. A subsequent `get` reports `NotFound` immediately.
    pub fn delete(&self, id: &SessionId) -> Result<()> {
        self.sessions
            .remove(id)
            .map(|_| debug!(session_id = %id, "Session deleted"))
            .ok_or_else(|| MeshError::not_found("session", id))
    }

    /// Reclaim expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_active_at(now));
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, "Swept expired sessions");
        }
        removed
    }

    /// Run `sweep` on an interval until the handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                store.sweep();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.sessions
            .iter()
            .filter(|s| s.is_active_at(now))
            .count()
    }

    // === Durability ===

    /// Snapshot every live session in its exact serde form.
    pub fn snapshot(&self) -> Vec<Session> {
        let now = Utc::now();
        self.sessions
            .iter()
            .filter(|s| s.is_active_at(now))
            .map(|s| s.clone())
            .collect()
    }

    /// Restore sessions from a snapshot, dropping entries that expired in
    /// the meantime. Returns the number restored.
    pub fn restore(&self, sessions: Vec<Session>) -> usize {
        let now = Utc::now();
        let mut restored = 0;
        for session in sessions {
            if session.is_active_at(now) {
                self.sessions.insert(session.id, session);
                restored += 1;
            }
        }
        restored
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), sessions = snapshot.len(), "Session snapshot saved");
        Ok(())
    }

    pub async fn load_from(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: Vec<Session> = serde_json::from_str(&content)?;
        Ok(self.restore(snapshot))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
