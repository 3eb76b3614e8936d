//! # Session Management
//!
//! Server-side state for one logical peer, independent of the socket that
//! currently carries it. The status is driven by the caller:
//!
//! ```text
//!   NotConnected ──▶ Connected ──▶ Established ──▶ Disconnected
//!                        │               │
//!                        └──────▶ Lost ◀─┘
//! ```
//!
//! Transitions are recorded, not validated; higher layers own the lifecycle
//! policy.

pub mod queue;
pub mod seq;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use quanta::Instant;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SessionError;

pub use queue::{Packet, PacketQueue};

// ─── Session Status ─────────────────────────────────────────────────────────

/// Session lifecycle status. The discriminants are stable external codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionStatus {
    NotConnected = 0,
    Connected = 1,
    Established = 2,
    Lost = 3,
    Disconnected = 4,
}

impl SessionStatus {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SessionStatus {
    type Error = SessionError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SessionStatus::NotConnected),
            1 => Ok(SessionStatus::Connected),
            2 => Ok(SessionStatus::Established),
            3 => Ok(SessionStatus::Lost),
            4 => Ok(SessionStatus::Disconnected),
            other => Err(SessionError::UnknownStatus(other)),
        }
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct StatusCell {
    status: SessionStatus,
    changed_at: Instant,
}

/// A peer session.
///
/// Shared as `Arc<Session>` between the manager, the pump thread and any
/// layer that resends from the packet queue; every field is internally
/// synchronized.
#[derive(Debug)]
pub struct Session {
    id: u64,
    nonce: u64,
    status: Mutex<StatusCell>,
    properties: Mutex<HashMap<String, Value>>,
    packets: PacketQueue,
    next_sequence: AtomicU16,
}

impl Session {
    fn new(id: u64, nonce: u64) -> Self {
        Session {
            id,
            nonce,
            status: Mutex::new(StatusCell {
                status: SessionStatus::NotConnected,
                changed_at: Instant::now(),
            }),
            properties: Mutex::new(HashMap::new()),
            packets: PacketQueue::new(),
            next_sequence: AtomicU16::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Authentication nonce issued with the session.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    /// When the status last changed.
    pub fn status_changed_at(&self) -> Instant {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .changed_at
    }

    /// Set the status and stamp the change time. Returns the previous status.
    pub fn set_status(&self, status: SessionStatus) -> SessionStatus {
        let mut cell = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let previous = cell.status;
        cell.status = status;
        cell.changed_at = Instant::now();
        debug!(session = self.id, from = ?previous, to = ?status, "session status");
        previous
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Store a property, returning the value it replaced.
    pub fn set_property(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value)
    }

    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Unacknowledged outbound packets.
    pub fn packets(&self) -> &PacketQueue {
        &self.packets
    }

    /// Allocate the next outbound sequence number (wraps at 2^16).
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

// ─── Session Manager ────────────────────────────────────────────────────────

/// Allocates and indexes sessions.
///
/// Ids are sequential from 1. The index is a concurrent map, so lookups and
/// deletes may race freely with `new_session`.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<u64, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create, register and return a new session.
    pub fn new_session(&self) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, rand::random::<u64>()));
        self.sessions.insert(id, session.clone());
        info!(session = id, "session created");
        session
    }

    pub fn find_session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove a session from the index. The session itself lives on for any
    /// holder of an `Arc`.
    pub fn delete_session(&self, id: u64) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if removed.is_some() {
            info!(session = id, "session deleted");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of all live sessions, ordered by id.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut all: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id());
        all
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn sequential_ids_from_one() {
        let manager = SessionManager::new();
        let ids: Vec<u64> = (0..3).map(|_| manager.new_session().id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(manager.session_count(), 3);
    }

    #[test]
    fn find_and_delete() {
        let manager = SessionManager::new();
        let a = manager.new_session();
        let b = manager.new_session();

        assert_eq!(manager.find_session(a.id()).unwrap().id(), a.id());
        assert!(manager.delete_session(a.id()).is_some());
        assert!(manager.find_session(a.id()).is_none());
        assert!(manager.delete_session(a.id()).is_none());
        assert_eq!(manager.session_count(), 1);

        // Ids are never reused.
        let c = manager.new_session();
        assert_eq!(c.id(), 3);
        let ids: Vec<u64> = manager.sessions().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![b.id(), c.id()]);
    }

    #[test]
    fn status_changes_are_stamped() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        assert_eq!(session.status(), SessionStatus::NotConnected);

        let before = session.status_changed_at();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let previous = session.set_status(SessionStatus::Established);
        assert_eq!(previous, SessionStatus::NotConnected);
        assert_eq!(session.status(), SessionStatus::Established);
        assert!(session.status_changed_at() > before);

        // Transitions are caller-driven: nothing stops a jump backwards.
        session.set_status(SessionStatus::Connected);
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(SessionStatus::NotConnected.code(), 0);
        assert_eq!(SessionStatus::Connected.code(), 1);
        assert_eq!(SessionStatus::Established.code(), 2);
        assert_eq!(SessionStatus::Lost.code(), 3);
        assert_eq!(SessionStatus::Disconnected.code(), 4);
        assert_eq!(SessionStatus::try_from(3), Ok(SessionStatus::Lost));
        assert_eq!(
            SessionStatus::try_from(9),
            Err(SessionError::UnknownStatus(9))
        );
    }

    #[test]
    fn properties_round_trip() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        assert!(session.set_property("peer", json!("10.0.0.1:9000")).is_none());
        assert_eq!(session.property("peer"), Some(json!("10.0.0.1:9000")));
        assert_eq!(
            session.remove_property("peer"),
            Some(json!("10.0.0.1:9000"))
        );
        assert!(session.property("peer").is_none());
    }

    #[test]
    fn outbound_sequences_wrap() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        session.next_sequence.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(session.next_sequence(), u16::MAX);
        assert_eq!(session.next_sequence(), 0);
    }

    #[test]
    fn queue_is_per_session() {
        let manager = SessionManager::new();
        let a = manager.new_session();
        let b = manager.new_session();
        a.packets()
            .add_packet(Packet::new(1, Bytes::from_static(b"x")))
            .unwrap();
        assert_eq!(a.packets().len(), 1);
        assert!(b.packets().is_empty());
    }
}
