//! # Event Queue
//!
//! MPMC FIFO over a crossbeam channel. Producers take a short admission lock
//! so a batch is checked against free capacity and enqueued without another
//! producer slipping in between. Consumers never take it, and no producer
//! holds it while waiting for space.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::valve::Backlog;
use super::{EventSink, EventSource};

const PUT_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct EventQueue<E> {
    tx: Sender<E>,
    rx: Receiver<E>,
    capacity: Option<usize>,
    admission: Mutex<()>,
}

impl<E> EventQueue<E> {
    /// Queue holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        EventQueue {
            tx,
            rx,
            capacity: Some(capacity),
            admission: Mutex::new(()),
        }
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        EventQueue {
            tx,
            rx,
            capacity: None,
            admission: Mutex::new(()),
        }
    }

    fn admit(&self) -> MutexGuard<'_, ()> {
        self.admission.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue, waiting up to `timeout` for space.
    ///
    /// Each attempt is a non-blocking send under the admission lock; the
    /// wait between attempts happens outside it.
    pub fn put_event_timeout(&self, event: E, timeout: Duration) -> Result<(), E> {
        let deadline = Instant::now() + timeout;
        let mut event = event;
        loop {
            event = match self.add_event(event) {
                Ok(()) => return Ok(()),
                Err(event) => event,
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(event);
            }
            thread::sleep((deadline - now).min(PUT_RETRY));
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<E> EventSource<E> for EventQueue<E> {
    fn get_event(&self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    fn get_events(&self, max: usize) -> Vec<E> {
        self.rx.try_iter().take(max).collect()
    }

    fn wait_event(&self, timeout: Duration) -> Option<E> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl<E> EventSink<E> for EventQueue<E> {
    fn add_event(&self, event: E) -> Result<(), E> {
        let _guard = self.admit();
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) | TrySendError::Disconnected(event) => event,
        })
    }

    fn add_events(&self, events: Vec<E>) -> Result<(), Vec<E>> {
        let _guard = self.admit();
        if let Some(capacity) = self.capacity {
            if self.rx.len() + events.len() > capacity {
                return Err(events);
            }
        }
        // Space was checked under the admission lock and consumers only
        // shrink the queue, so these sends cannot be refused.
        let mut refused = Vec::new();
        for event in events {
            if let Err(TrySendError::Full(event) | TrySendError::Disconnected(event)) =
                self.tx.try_send(event)
            {
                refused.push(event);
            }
        }
        if refused.is_empty() {
            Ok(())
        } else {
            Err(refused)
        }
    }
}

impl<E> Backlog for EventQueue<E> {
    fn backlog(&self) -> usize {
        self.len()
    }
}
