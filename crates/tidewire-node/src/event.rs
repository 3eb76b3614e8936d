use std::sync::Arc;

use tidewire_transport::error::WireError;
use tidewire_transport::transport::TransportEvent;
use tidewire_transport::wire::Frame;

/// What the reactor thread hands to the pump.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A peer was registered and given a session.
    Connected { connection: Arc<str>, session: u64 },
    /// A complete frame arrived.
    Frame {
        connection: Arc<str>,
        session: u64,
        frame: Frame,
    },
    /// Undecodable bytes; the connection is being dropped.
    Malformed {
        connection: Arc<str>,
        session: u64,
        error: WireError,
    },
    /// A transport condition other than plain reads and writes.
    Transport { session: u64, event: TransportEvent },
    /// The registration is gone.
    Disconnected { connection: Arc<str>, session: u64 },
}

impl NodeEvent {
    pub fn session(&self) -> u64 {
        match self {
            NodeEvent::Connected { session, .. }
            | NodeEvent::Frame { session, .. }
            | NodeEvent::Malformed { session, .. }
            | NodeEvent::Transport { session, .. }
            | NodeEvent::Disconnected { session, .. } => *session,
        }
    }
}
