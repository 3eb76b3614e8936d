//! # Configuration
//!
//! TOML input is parsed into `*Input` structs where every field is optional,
//! then resolved into runtime structs with defaults applied and values
//! clamped to workable ranges.
//!
//! ```toml
//! version = 1
//!
//! [reactor]
//! poll_timeout_ms = 100
//! events_capacity = 1024
//!
//! [transport]
//! receive_buffer = 65536
//! transmit_buffer = 65536
//!
//! [acceptor]
//! bind = "0.0.0.0:7400"
//! shutdown_timeout_ms = 2000
//!
//! [pipeline]
//! queue_capacity = 4096
//! batch_size = 64
//! idle_wait_ms = 50
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

// ─── Input (as written) ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfigInput {
    pub version: u32,
    pub reactor: ReactorConfigInput,
    pub transport: TransportConfigInput,
    pub acceptor: AcceptorConfigInput,
    pub pipeline: PipelineConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReactorConfigInput {
    pub poll_timeout_ms: Option<u64>,
    pub events_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfigInput {
    pub receive_buffer: Option<usize>,
    pub transmit_buffer: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcceptorConfigInput {
    pub bind: Option<String>,
    pub shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfigInput {
    pub queue_capacity: Option<usize>,
    pub batch_size: Option<usize>,
    pub idle_wait_ms: Option<u64>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

/// Reactor poll-loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Upper bound on one blocking poll.
    pub poll_timeout: Duration,
    /// Readiness events fetched per poll.
    pub events_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            events_capacity: 1024,
        }
    }
}

/// Per-connection buffer sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub receive_buffer: usize,
    pub transmit_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_buffer: 64 * 1024,
            transmit_buffer: 64 * 1024,
        }
    }
}

/// Listening socket settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptorConfig {
    pub bind: SocketAddr,
    /// How long `shutdown` waits for the accept thread before detaching it.
    pub shutdown_timeout: Duration,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7400)),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Event pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bound of the reactor → pump event queue.
    pub queue_capacity: usize,
    /// Events handed to the handler per pump tick.
    pub batch_size: usize,
    /// How long an idle pump waits for the next event.
    pub idle_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            batch_size: 64,
            idle_wait: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    pub version: u32,
    pub reactor: ReactorConfig,
    pub transport: TransportConfig,
    pub acceptor: AcceptorConfig,
    pub pipeline: PipelineConfig,
}

impl NodeConfigInput {
    pub fn resolve(self) -> Result<NodeConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let reactor_defaults = ReactorConfig::default();
        let reactor = ReactorConfig {
            poll_timeout: Duration::from_millis(
                self.reactor
                    .poll_timeout_ms
                    .unwrap_or(reactor_defaults.poll_timeout.as_millis() as u64)
                    .clamp(1, 10_000),
            ),
            events_capacity: self
                .reactor
                .events_capacity
                .unwrap_or(reactor_defaults.events_capacity)
                .max(16),
        };

        let transport_defaults = TransportConfig::default();
        let transport = TransportConfig {
            receive_buffer: self
                .transport
                .receive_buffer
                .unwrap_or(transport_defaults.receive_buffer)
                .max(64),
            transmit_buffer: self
                .transport
                .transmit_buffer
                .unwrap_or(transport_defaults.transmit_buffer)
                .max(64),
        };

        let acceptor_defaults = AcceptorConfig::default();
        let bind = match self.acceptor.bind {
            Some(raw) => {
                let trimmed = raw.trim();
                trimmed
                    .parse::<SocketAddr>()
                    .map_err(|_| ConfigError::BadAddress(trimmed.to_string()))?
            }
            None => acceptor_defaults.bind,
        };
        let acceptor = AcceptorConfig {
            bind,
            shutdown_timeout: self
                .acceptor
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(acceptor_defaults.shutdown_timeout),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            queue_capacity: self
                .pipeline
                .queue_capacity
                .unwrap_or(pipeline_defaults.queue_capacity)
                .max(1),
            batch_size: self
                .pipeline
                .batch_size
                .unwrap_or(pipeline_defaults.batch_size)
                .max(1),
            idle_wait: self
                .pipeline
                .idle_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(pipeline_defaults.idle_wait),
        };

        Ok(NodeConfig {
            version,
            reactor,
            transport,
            acceptor,
            pipeline,
        })
    }
}

impl NodeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return NodeConfigInput::default().resolve();
        }
        let parsed: NodeConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
