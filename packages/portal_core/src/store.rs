//! Session Record Store
//!
//! Ordered list of live session descriptors (insertion order is tab order)
//! plus the id of the focused session. The store is owned by a single task;
//! it never locks and none of its operations fail.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::target::{SessionKind, SessionTarget, tunnel_name};

const ID_PREFIX: &str = "session-";
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 16;

/// Client-generated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id: `session-` followed by 16 base-36 characters.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..ID_LEN)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(format!("{ID_PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub target: SessionTarget,
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
}

impl SessionDescriptor {
    /// Tunnel endpoint this session connects through.
    pub fn tunnel(&self) -> &'static str {
        tunnel_name(&self.target, self.kind)
    }
}

/// Point-in-time view of the store, published to observers after each mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub sessions: Vec<SessionDescriptor>,
    pub focused: Option<SessionId>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<SessionDescriptor>,
    focused: Option<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new session and focus it.
    pub fn create(&mut self, target: SessionTarget, kind: SessionKind) -> SessionId {
        self.create_with(target, kind, SessionId::random)
    }

    /// Like [`create`](Self::create) with a caller-supplied id generator.
    /// Generated ids that collide with a live session are discarded.
    pub fn create_with(
        &mut self,
        target: SessionTarget,
        kind: SessionKind,
        mut generate: impl FnMut() -> SessionId,
    ) -> SessionId {
        let id = loop {
            let candidate = generate();
            if !self.contains(&candidate) {
                break candidate;
            }
            debug!(id = %candidate, "session id collision, regenerating");
        };

        self.sessions.push(SessionDescriptor {
            id: id.clone(),
            target,
            kind,
            created_at: Utc::now(),
        });
        self.focused = Some(id.clone());
        id
    }

    /// Focus a live session. Returns false (and changes nothing) for unknown ids.
    pub fn focus(&mut self, id: &SessionId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.focused = Some(id.clone());
        true
    }

    /// Remove a session. If it was focused, focus moves to the last remaining
    /// session in insertion order, or clears when the store is empty.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionDescriptor> {
        let index = self.sessions.iter().position(|s| &s.id == id)?;
        let removed = self.sessions.remove(index);

        if self.focused.as_ref() == Some(id) {
            self.focused = self.sessions.last().map(|s| s.id.clone());
        }
        Some(removed)
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionDescriptor> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    pub fn focused(&self) -> Option<&SessionId> {
        self.focused.as_ref()
    }

    pub fn focused_session(&self) -> Option<&SessionDescriptor> {
        self.focused.as_ref().and_then(|id| self.get(id))
    }

    /// Sessions in tab order.
    pub fn sessions(&self) -> &[SessionDescriptor] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            sessions: self.sessions.clone(),
            focused: self.focused.clone(),
        }
    }
}
