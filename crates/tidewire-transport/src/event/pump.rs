//! # Event Pump
//!
//! Moves events from a source to a handler, one batch per `refresh`. The
//! pump never sleeps on its own; `run_until` adds the idle wait for a
//! dedicated pump thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use super::{EventHandler, EventSource};

pub struct EventPump<S, H> {
    source: S,
    handler: H,
    batch_size: usize,
}

impl<S, H> EventPump<S, H> {
    /// Pump with an unlimited batch size: each refresh takes everything
    /// available.
    pub fn new(source: S, handler: H) -> Self {
        EventPump {
            source,
            handler,
            batch_size: usize::MAX,
        }
    }

    /// Limit the events taken per refresh. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_parts(self) -> (S, H) {
        (self.source, self.handler)
    }
}

impl<S, H> EventPump<S, H> {
    /// Pull one batch and hand it over. Returns the number of events moved.
    pub fn refresh<E>(&mut self) -> usize
    where
        S: EventSource<E>,
        H: EventHandler<E>,
    {
        if self.batch_size == 1 {
            return match self.source.get_event() {
                Some(event) => {
                    self.handler.handle_event(event);
                    1
                }
                None => 0,
            };
        }

        let events = self.source.get_events(self.batch_size);
        let n = events.len();
        if n > 0 {
            self.handler.handle_events(events);
        }
        n
    }

    /// Hand `first` over together with whatever else fits in the batch, on
    /// the same entry point `refresh` would use.
    fn deliver_from<E>(&mut self, first: E) -> usize
    where
        S: EventSource<E>,
        H: EventHandler<E>,
    {
        if self.batch_size == 1 {
            self.handler.handle_event(first);
            return 1;
        }
        let mut batch = vec![first];
        batch.extend(self.source.get_events(self.batch_size - 1));
        let n = batch.len();
        self.handler.handle_events(batch);
        n
    }

    /// Refresh until `stop` is set, waiting up to `idle_wait` on the source
    /// whenever a tick moved nothing. Returns the total events handled.
    pub fn run_until<E>(&mut self, stop: &AtomicBool, idle_wait: Duration) -> u64
    where
        S: EventSource<E>,
        H: EventHandler<E>,
    {
        let mut total = 0u64;
        while !stop.load(Ordering::Relaxed) {
            let moved = self.refresh();
            if moved > 0 {
                total += moved as u64;
                continue;
            }
            if let Some(event) = self.source.wait_event(idle_wait) {
                total += self.deliver_from(event) as u64;
            }
        }
        debug!(total, "event pump stopped");
        total
    }
}
