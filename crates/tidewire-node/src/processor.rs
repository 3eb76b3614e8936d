//! # Node Processor
//!
//! Pump-side handler: applies reactor events to sessions. Data frames are
//! acknowledged through `ReactorHandle::submit`, acks prune the session's
//! packet queue.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use tidewire_transport::event::EventHandler;
use tidewire_transport::reactor::ReactorHandle;
use tidewire_transport::session::{SessionManager, SessionStatus};
use tidewire_transport::stats::PipelineStats;
use tidewire_transport::transport::TransportEventKind;
use tidewire_transport::wire::Frame;

use crate::event::NodeEvent;
use crate::handler::PeerState;

pub struct NodeProcessor {
    reactor: ReactorHandle<PeerState>,
    sessions: Arc<SessionManager>,
    stats: Arc<Mutex<PipelineStats>>,
}

impl NodeProcessor {
    pub fn new(
        reactor: ReactorHandle<PeerState>,
        sessions: Arc<SessionManager>,
        stats: Arc<Mutex<PipelineStats>>,
    ) -> Self {
        NodeProcessor {
            reactor,
            sessions,
            stats,
        }
    }

    fn stats(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_frame(&mut self, connection: &str, session_id: u64, frame: Frame) {
        let Some(session) = self.sessions.find_session(session_id) else {
            debug!(session = session_id, "frame for deleted session ignored");
            return;
        };

        match frame {
            Frame::Data(packet) => {
                self.stats().packets_received += 1;
                if session.status() == SessionStatus::Connected {
                    session.set_status(SessionStatus::Established);
                }

                let ack = match (Frame::Ack {
                    sequence: packet.sequence,
                })
                .to_bytes()
                {
                    Ok(ack) => ack,
                    Err(e) => {
                        warn!(error = %e, "ack encoding failed");
                        return;
                    }
                };
                let sequence = packet.sequence;
                let submitted = self.reactor.submit(connection, move |transport, _| {
                    if let Err(e) = transport.send(&ack) {
                        warn!(sequence, error = %e, "transmit buffer full, ack dropped");
                    }
                });
                match submitted {
                    Ok(()) => self.stats().acks_sent += 1,
                    Err(e) => debug!(connection, sequence, error = %e, "ack not sent"),
                }
            }
            Frame::Ack { sequence } => {
                let exact = session.packets().ack(sequence);
                self.stats().acks_received += 1;
                debug!(
                    session = session_id,
                    sequence,
                    exact,
                    in_flight = session.packets().len(),
                    "ack"
                );
            }
        }
    }
}

impl EventHandler<NodeEvent> for NodeProcessor {
    fn handle_event(&mut self, event: NodeEvent) {
        self.stats().events_handled += 1;

        match event {
            NodeEvent::Connected {
                connection,
                session,
            } => {
                info!(connection = %connection, session, "peer connected");
            }
            NodeEvent::Frame {
                connection,
                session,
                frame,
            } => self.on_frame(&connection, session, frame),
            NodeEvent::Malformed {
                connection,
                session,
                error,
            } => {
                warn!(connection = %connection, session, error = %error, "malformed frame");
                if let Some(s) = self.sessions.find_session(session) {
                    s.set_status(SessionStatus::Lost);
                }
            }
            NodeEvent::Transport { session, event } => match event.kind {
                TransportEventKind::ReadError(ref e) | TransportEventKind::WriteError(ref e) => {
                    warn!(connection = %event.connection, session, error = %e, "transport error");
                    if let Some(s) = self.sessions.find_session(session) {
                        s.set_status(SessionStatus::Lost);
                    }
                }
                TransportEventKind::Closed => {
                    debug!(connection = %event.connection, session, "peer closed stream");
                }
                ref other => debug!(connection = %event.connection, session, event = ?other, "transport"),
            },
            NodeEvent::Disconnected {
                connection,
                session,
            } => {
                if let Some(s) = self.sessions.delete_session(session) {
                    if s.status() != SessionStatus::Lost {
                        s.set_status(SessionStatus::Disconnected);
                    }
                    info!(
                        connection = %connection,
                        session,
                        status = ?s.status(),
                        unacked = s.packets().len(),
                        "peer disconnected"
                    );
                }
            }
        }
    }
}
