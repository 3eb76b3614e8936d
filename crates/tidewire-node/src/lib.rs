//! # tidewire-node
//!
//! Sequenced-packet server on top of `tidewire-transport`. Peers send data
//! frames and receive cumulative acks; the node can push its own sequenced
//! packets, which stay queued per session until the peer acknowledges them.
//!
//! - [`handler`] - Reactor-side frame reader
//! - [`processor`] - Pump-side session logic
//! - [`node`] - Startup, shutdown and statistics

pub mod event;
pub mod handler;
pub mod node;
pub mod processor;

pub use event::NodeEvent;
pub use node::{Node, NodeError, NodeStats};
