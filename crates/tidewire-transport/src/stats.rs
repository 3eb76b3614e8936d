//! # Reactor Statistics
//!
//! Counters updated lock-free on the reactor thread and snapshotted into a
//! serializable struct for logging or export.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters. Shared between the reactor thread and its handle.
#[derive(Debug, Default)]
pub struct ReactorCounters {
    pub dispatches: AtomicU64,
    pub invalid_keys: AtomicU64,
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub submissions: AtomicU64,
    pub handler_panics: AtomicU64,
    pub poll_errors: AtomicU64,
}

impl ReactorCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connections: usize) -> ReactorStats {
        ReactorStats {
            connections: connections as u64,
            dispatches: self.dispatches.load(Ordering::Relaxed),
            invalid_keys: self.invalid_keys.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time reactor statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReactorStats {
    /// Registrations currently in the table.
    pub connections: u64,
    /// Handler invocations for ready keys.
    pub dispatches: u64,
    /// Ready tokens with no live registration (cancelled mid-iteration).
    pub invalid_keys: u64,
    /// Successful `connect` calls.
    pub connects: u64,
    /// Registrations removed by `disconnect` or a cancelled key.
    pub disconnects: u64,
    /// Closures run via `submit`.
    pub submissions: u64,
    /// Handler calls that panicked and were contained.
    pub handler_panics: u64,
    /// Multiplexer poll failures other than interrupts.
    pub poll_errors: u64,
}

/// Pipeline throughput counters kept by the node's pump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub events_handled: u64,
    pub events_rejected: u64,
    pub packets_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = ReactorCounters::default();
        ReactorCounters::bump(&counters.dispatches);
        ReactorCounters::bump(&counters.dispatches);
        ReactorCounters::bump(&counters.invalid_keys);

        let stats = counters.snapshot(3);
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.dispatches, 2);
        assert_eq!(stats.invalid_keys, 1);
        assert_eq!(stats.handler_panics, 0);
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = ReactorStats {
            connections: 1,
            dispatches: 10,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["dispatches"], 10);
        assert_eq!(json["connections"], 1);
    }
}
