//! Valve-guarded sinks and the capacity valve used for backpressure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{EventSink, EventValve};

/// A sink that consults a valve first. Refused events never reach the sink.
#[derive(Debug)]
pub struct ValveControlledSink<V, S> {
    valve: V,
    sink: S,
}

impl<V, S> ValveControlledSink<V, S> {
    pub fn new(valve: V, sink: S) -> Self {
        ValveControlledSink { valve, sink }
    }

    pub fn valve(&self) -> &V {
        &self.valve
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<E, V, S> EventSink<E> for ValveControlledSink<V, S>
where
    V: EventValve<E>,
    S: EventSink<E>,
{
    fn add_event(&self, event: E) -> Result<(), E> {
        if !self.valve.accept_event(&event) {
            return Err(event);
        }
        self.sink.add_event(event)
    }

    fn add_events(&self, events: Vec<E>) -> Result<(), Vec<E>> {
        if !self.valve.accept_events(&events) {
            return Err(events);
        }
        self.sink.add_events(events)
    }
}

// ─── Capacity Valve ─────────────────────────────────────────────────────────

/// Something with an observable backlog.
pub trait Backlog {
    fn backlog(&self) -> usize;
}

impl<T: Backlog + ?Sized> Backlog for Arc<T> {
    fn backlog(&self) -> usize {
        (**self).backlog()
    }
}

/// Admits events while the observed backlog stays under a high-water mark.
///
/// A batch is admitted only if it fits entirely. Refusals are counted.
#[derive(Debug)]
pub struct CapacityValve<Q> {
    queue: Q,
    high_water: usize,
    rejected: AtomicU64,
}

impl<Q: Backlog> CapacityValve<Q> {
    pub fn new(queue: Q, high_water: usize) -> Self {
        CapacityValve {
            queue,
            high_water,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Events refused so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn admit(&self, count: usize) -> bool {
        let backlog = self.queue.backlog();
        let ok = backlog.saturating_add(count) <= self.high_water;
        if !ok {
            self.rejected.fetch_add(count as u64, Ordering::Relaxed);
            trace!(backlog, count, high_water = self.high_water, "capacity valve closed");
        }
        ok
    }
}

impl<E, Q: Backlog> EventValve<E> for CapacityValve<Q> {
    fn accept_event(&self, _event: &E) -> bool {
        self.admit(1)
    }

    fn accept_events(&self, events: &[E]) -> bool {
        self.admit(events.len())
    }
}
