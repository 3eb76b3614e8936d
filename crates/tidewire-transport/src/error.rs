//! # Errors
//!
//! Synchronous failures surfaced to callers. Conditions that arise on the
//! reactor thread (socket errors, buffer pressure) are reported as
//! [`TransportEvent`](crate::transport::TransportEvent)s instead.

use std::io;

use thiserror::Error;

/// Capacity violations on a [`CircularBuffer`](crate::buffer::CircularBuffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("write of {requested} bytes exceeds free space ({space} bytes)")]
    Overflow { requested: usize, space: usize },
    #[error("consume of {requested} bytes exceeds available data ({available} bytes)")]
    Underflow { requested: usize, available: usize },
    #[error("circular buffer capacity must be non-zero")]
    ZeroCapacity,
}

/// Registration and lifecycle failures of the [`Reactor`](crate::reactor::Reactor).
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("connection `{0}` is already registered")]
    AlreadyConnected(String),
    #[error("connection `{0}` is not registered")]
    NotConnected(String),
    #[error("reactor is not running")]
    NotRunning,
    #[error("reactor is already running")]
    AlreadyRunning,
    #[error("transport buffers: {0}")]
    Buffer(#[from] BufferError),
    #[error("reactor I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// Session-layer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("packet with sequence {0} is already queued")]
    DuplicateSequence(u16),
    #[error("unknown session status code {0}")]
    UnknownStatus(u8),
}

/// Frame decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
    #[error("ack frame carries a {0}-byte body")]
    AckWithBody(u16),
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
}

/// Configuration parsing and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid bind address `{0}`")]
    BadAddress(String),
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
}
