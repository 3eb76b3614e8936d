//! # Node
//!
//! Wires an acceptor, a reactor, an event queue and a pump thread into one
//! sequenced-packet server.
//!
//! ```text
//!   Acceptor ──connect──▶ Reactor ──FrameReader──▶ [valve] ──▶ EventQueue
//!                            ▲                                     │
//!                            └──────── submit(ack / data) ◀── NodeProcessor (pump thread)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use tidewire_transport::acceptor::Acceptor;
use tidewire_transport::config::NodeConfig;
use tidewire_transport::error::{ReactorError, SessionError, WireError};
use tidewire_transport::event::{CapacityValve, EventPump, EventQueue, ValveControlledSink};
use tidewire_transport::reactor::Reactor;
use tidewire_transport::session::{Packet, SessionManager};
use tidewire_transport::stats::{PipelineStats, ReactorStats};
use tidewire_transport::wire::Frame;

use crate::event::NodeEvent;
use crate::handler::{FrameReader, PeerState};
use crate::processor::NodeProcessor;

type NodeSink = ValveControlledSink<CapacityValve<Arc<EventQueue<NodeEvent>>>, Arc<EventQueue<NodeEvent>>>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Reactor(#[from] ReactorError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("no live session {0}")]
    UnknownSession(u64),
}

/// Point-in-time node statistics.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub reactor: ReactorStats,
    pub pipeline: PipelineStats,
    pub sessions: usize,
    pub queue_depth: usize,
}

pub struct Node {
    reactor: Reactor<PeerState>,
    acceptor: Acceptor,
    sessions: Arc<SessionManager>,
    queue: Arc<EventQueue<NodeEvent>>,
    reader: Arc<FrameReader<NodeSink>>,
    stats: Arc<Mutex<PipelineStats>>,
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl Node {
    /// Start the reactor, the acceptor and the pump thread, in that order.
    pub fn start(config: &NodeConfig) -> Result<Self, NodeError> {
        let reactor: Reactor<PeerState> =
            Reactor::new(config.reactor.clone(), config.transport.clone());
        reactor.startup()?;

        let sessions = Arc::new(SessionManager::new());
        let queue = Arc::new(EventQueue::bounded(config.pipeline.queue_capacity));
        let sink = ValveControlledSink::new(
            CapacityValve::new(queue.clone(), config.pipeline.queue_capacity),
            queue.clone(),
        );
        let reader = Arc::new(FrameReader::new(sink));
        let stats = Arc::new(Mutex::new(PipelineStats::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let sessions = sessions.clone();
            Acceptor::bind(
                &config.acceptor,
                reactor.handle(),
                reader.clone(),
                move |name, addr| {
                    let session = sessions.new_session();
                    session.set_property("connection", json!(name));
                    session.set_property("peer", json!(addr.to_string()));
                    PeerState::new(session)
                },
            )?
        };

        // Events queue up until the pump starts. If the spawn fails, dropping
        // the acceptor and reactor shuts both down.
        let pump = {
            let processor = NodeProcessor::new(reactor.handle(), sessions.clone(), stats.clone());
            let mut pump = EventPump::new(queue.clone(), processor)
                .with_batch_size(config.pipeline.batch_size);
            let stop = stop.clone();
            let idle_wait = config.pipeline.idle_wait;
            thread::Builder::new()
                .name("tidewire-pump".into())
                .spawn(move || {
                    pump.run_until(&stop, idle_wait);
                })
                .map_err(ReactorError::Io)?
        };

        info!(
            addr = %acceptor.local_addr(),
            queue_capacity = config.pipeline.queue_capacity,
            batch_size = config.pipeline.batch_size,
            "node started"
        );

        Ok(Node {
            reactor,
            acceptor,
            sessions,
            queue,
            reader,
            stats,
            stop,
            pump: Some(pump),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Send `payload` to the peer behind `session_id` as the session's next
    /// sequenced packet. The packet stays queued until acknowledged.
    pub fn send(&self, session_id: u64, payload: Bytes) -> Result<u16, NodeError> {
        let session = self
            .sessions
            .find_session(session_id)
            .ok_or(NodeError::UnknownSession(session_id))?;
        let connection = session
            .property("connection")
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or(NodeError::UnknownSession(session_id))?;

        let packet = Packet::new(session.next_sequence(), payload);
        let sequence = packet.sequence;
        let frame = Frame::Data(packet.clone()).to_bytes()?;
        session.packets().add_packet(packet)?;

        self.reactor.submit(&connection, move |transport, _| {
            if let Err(e) = transport.send(&frame) {
                warn!(sequence, error = %e, "transmit buffer full, packet stays queued unsent");
            }
        })?;
        Ok(sequence)
    }

    pub fn stats(&self) -> NodeStats {
        let mut pipeline = self
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        pipeline.events_rejected = self.reader.rejected();
        NodeStats {
            reactor: self.reactor.stats(),
            pipeline,
            sessions: self.sessions.session_count(),
            queue_depth: self.queue.len(),
        }
    }

    /// Stop accepting, close every connection, then stop the pump.
    pub fn shutdown(&mut self) {
        if self.pump.is_none() {
            return;
        }
        self.acceptor.shutdown();
        self.reactor.shutdown();

        self.stop.store(true, Ordering::Relaxed);
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("pump thread panicked");
            }
        }
        info!("node stopped");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
