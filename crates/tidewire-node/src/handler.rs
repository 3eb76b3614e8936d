//! # Frame Reader
//!
//! Reactor-side handler. Runs on the reactor thread: drains the receive
//! buffer into a per-connection decoder, flushes the transmit buffer, and
//! forwards everything of interest to the event sink. It never touches
//! session state beyond the status set at connect; the pump does that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{trace, warn};

use tidewire_transport::event::EventSink;
use tidewire_transport::reactor::{SelectionKey, SocketDataHandler};
use tidewire_transport::session::{Session, SessionStatus};
use tidewire_transport::transport::{TransportEvent, TransportEventKind};
use tidewire_transport::wire::Frame;

use crate::event::NodeEvent;

/// Per-connection passback.
#[derive(Debug)]
pub struct PeerState {
    session: Arc<Session>,
    decoder: BytesMut,
}

impl PeerState {
    pub fn new(session: Arc<Session>) -> Self {
        PeerState {
            session,
            decoder: BytesMut::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

pub struct FrameReader<K> {
    sink: K,
    rejected: AtomicU64,
}

impl<K: EventSink<NodeEvent>> FrameReader<K> {
    pub fn new(sink: K) -> Self {
        FrameReader {
            sink,
            rejected: AtomicU64::new(0),
        }
    }

    /// Events the sink refused.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn emit(&self, event: NodeEvent) {
        if let Err(event) = self.sink.add_event(event) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(session = event.session(), "event pipeline full, event dropped");
        }
    }

    /// Forward a transport event unless it is routine. Returns whether it
    /// ends the connection.
    fn forward(&self, session: u64, event: TransportEvent) -> bool {
        match event.kind {
            TransportEventKind::Read(n) | TransportEventKind::Write(n) => {
                trace!(connection = %event.connection, bytes = n, "moved");
                false
            }
            TransportEventKind::BufferUnderflow => false,
            _ => {
                let terminal = event.is_terminal();
                self.emit(NodeEvent::Transport { session, event });
                terminal
            }
        }
    }
}

impl<K> SocketDataHandler<PeerState> for FrameReader<K>
where
    K: EventSink<NodeEvent> + Send + Sync,
{
    fn on_ready(&self, key: &mut SelectionKey<'_>, peer: &mut PeerState) {
        let connection = key.name().clone();
        let session = peer.session.id();
        let mut terminal = false;

        if key.is_readable() {
            let mut events = Vec::new();
            key.transport().perform_read(|ev| events.push(ev));

            let data = key.transport().receive(usize::MAX);
            peer.decoder.extend_from_slice(&data);
            loop {
                match Frame::decode(&mut peer.decoder) {
                    Ok(Some(frame)) => self.emit(NodeEvent::Frame {
                        connection: connection.clone(),
                        session,
                        frame,
                    }),
                    Ok(None) => break,
                    Err(error) => {
                        self.emit(NodeEvent::Malformed {
                            connection: connection.clone(),
                            session,
                            error,
                        });
                        terminal = true;
                        break;
                    }
                }
            }

            for ev in events {
                terminal |= self.forward(session, ev);
            }
        }

        if key.is_writable() || !key.transport().transmit_buffer().is_empty() {
            let mut events = Vec::new();
            key.transport().perform_write(|ev| events.push(ev));
            for ev in events {
                terminal |= self.forward(session, ev);
            }
        }

        if terminal {
            key.cancel();
        }
    }

    fn on_connect(&self, key: &mut SelectionKey<'_>, peer: &mut PeerState) {
        peer.session.set_status(SessionStatus::Connected);
        self.emit(NodeEvent::Connected {
            connection: key.name().clone(),
            session: peer.session.id(),
        });
    }

    fn on_disconnect(&self, name: &Arc<str>, peer: PeerState) {
        if !peer.decoder.is_empty() {
            trace!(connection = %name, leftover = peer.decoder.len(), "partial frame discarded");
        }
        self.emit(NodeEvent::Disconnected {
            connection: name.clone(),
            session: peer.session.id(),
        });
    }
}
