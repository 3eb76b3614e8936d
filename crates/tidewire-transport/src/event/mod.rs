//! # Event Pipeline
//!
//! Producer/consumer plumbing between the reactor thread and whoever
//! processes what it reads:
//!
//! ```text
//!   reactor ──add_event──▶ [valve] ──▶ EventQueue ──get_events──▶ EventPump ──▶ EventHandler
//! ```
//!
//! Sources and sinks take `&self` so one queue can be shared (`Arc`) between
//! producers and a pump. Handlers take `&mut self`: a pump owns its handler.

pub mod blocking;
pub mod pump;
pub mod queue;
pub mod timer;
pub mod valve;

use std::sync::Arc;
use std::time::Duration;

pub use blocking::BlockingEventSource;
pub use pump::EventPump;
pub use queue::EventQueue;
pub use timer::{SchedulingKey, TimeEventSource};
pub use valve::{CapacityValve, ValveControlledSink};

/// Poll interval used by the provided `wait_event`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ─── Traits ─────────────────────────────────────────────────────────────────

/// Something events can be pulled from.
pub trait EventSource<E> {
    /// Next event, if one is available right now.
    fn get_event(&self) -> Option<E>;

    /// Up to `max` events that are available right now. Never waits.
    fn get_events(&self, max: usize) -> Vec<E> {
        let mut events = Vec::new();
        while events.len() < max {
            match self.get_event() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    /// Wait up to `timeout` for an event.
    ///
    /// The provided version polls; sources with a real blocking primitive
    /// override it.
    fn wait_event(&self, timeout: Duration) -> Option<E> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.get_event() {
                return Some(event);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Something events can be pushed into.
pub trait EventSink<E> {
    /// Enqueue one event; a refused event is handed back.
    fn add_event(&self, event: E) -> Result<(), E>;

    /// Enqueue a batch, all or nothing. On refusal nothing was enqueued and
    /// the whole batch is handed back.
    fn add_events(&self, events: Vec<E>) -> Result<(), Vec<E>>;
}

/// Admission check in front of a sink.
pub trait EventValve<E> {
    fn accept_event(&self, event: &E) -> bool;

    /// Whether every event in the batch is acceptable.
    fn accept_events(&self, events: &[E]) -> bool {
        events.iter().all(|e| self.accept_event(e))
    }
}

impl<E, F> EventValve<E> for F
where
    F: Fn(&E) -> bool,
{
    fn accept_event(&self, event: &E) -> bool {
        self(event)
    }
}

/// Consumer of events.
pub trait EventHandler<E> {
    fn handle_event(&mut self, event: E);

    fn handle_events(&mut self, events: Vec<E>) {
        for event in events {
            self.handle_event(event);
        }
    }
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(E),
{
    fn handle_event(&mut self, event: E) {
        self(event)
    }
}

// ─── Shared wrappers ────────────────────────────────────────────────────────

impl<E, T: EventSource<E> + ?Sized> EventSource<E> for Arc<T> {
    fn get_event(&self) -> Option<E> {
        (**self).get_event()
    }

    fn get_events(&self, max: usize) -> Vec<E> {
        (**self).get_events(max)
    }

    fn wait_event(&self, timeout: Duration) -> Option<E> {
        (**self).wait_event(timeout)
    }
}

impl<E, T: EventSink<E> + ?Sized> EventSink<E> for Arc<T> {
    fn add_event(&self, event: E) -> Result<(), E> {
        (**self).add_event(event)
    }

    fn add_events(&self, events: Vec<E>) -> Result<(), Vec<E>> {
        (**self).add_events(events)
    }
}
