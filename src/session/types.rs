//! Session identity and lifecycle types.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MeshError, Result};

/// Protocol version stamped on newly created sessions.
pub const PROTOCOL_VERSION: &str = "1.0";

/// 128-bit random session identifier, rendered as the canonical
/// hyphenated hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| MeshError::invalid(format!("malformed session identifier: {:?}", s)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Whether `touch` extends the expiry window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Expiry is fixed at creation; access never moves it.
    #[default]
    Absolute,
    /// Each authenticated access pushes expiry out by the session TTL.
    Sliding,
}

/// Server-side identity context bound to a random identifier and TTL.
///
/// Instants are stored as first-class `DateTime<Utc>` values; the serde form
/// round-trips them exactly, so a session restored from a snapshot compares
/// identically to the live one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub ttl: Duration,
    pub protocol_version: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::random(),
            created_at: now,
            expires_at: now + TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            last_access: now,
            ttl,
            protocol_version: PROTOCOL_VERSION.to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Active iff the query instant precedes the absolute expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    /// Record an authenticated access. Expiry moves only under `Sliding`.
    pub(crate) fn touch(&mut self, policy: ExpiryPolicy) {
        let now = Utc::now();
        self.last_access = now;
        if policy == ExpiryPolicy::Sliding {
            self.expires_at = now + TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        }
    }
}
