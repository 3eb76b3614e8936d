//! # tidewire-transport
//!
//! Reactor-based, non-blocking packet transport.
//!
//! A single poll thread per [`Reactor`](reactor::Reactor) multiplexes many
//! named TCP connections, each a [`SocketTransport`](transport::SocketTransport)
//! with circular receive/transmit buffers. Handlers turn readiness into
//! typed events for an event pipeline; the session layer tracks in-flight
//! packets by wrapping 16-bit sequence number.
//!
//! ## Crate structure
//!
//! - [`buffer`] - Fixed-capacity byte ring with vectored I/O regions
//! - [`transport`] - Buffered non-blocking stream, readiness interest, transport events
//! - [`reactor`] - Poll thread, registration table, handler/monitor callbacks
//! - [`acceptor`] - Listening socket feeding a reactor
//! - [`event`] - Sources, sinks, valves, pump, queue, timers
//! - [`session`] - Sessions, packet queues, serial-number comparison
//! - [`wire`] - Data and ack framing
//! - [`config`] - TOML configuration
//! - [`stats`] - Reactor and pipeline counters
//! - [`error`] - Error types

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod reactor;
pub mod session;
pub mod stats;
pub mod transport;
pub mod wire;
