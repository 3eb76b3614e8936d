use std::time::Duration;

use super::EventSource;

/// Turns any source into one that waits up to a fixed duration for the
/// first event before reporting empty.
#[derive(Debug)]
pub struct BlockingEventSource<S> {
    source: S,
    wait: Duration,
}

impl<S> BlockingEventSource<S> {
    pub fn new(source: S, wait: Duration) -> Self {
        BlockingEventSource { source, wait }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn inner(&self) -> &S {
        &self.source
    }
}

impl<E, S: EventSource<E>> EventSource<E> for BlockingEventSource<S> {
    fn get_event(&self) -> Option<E> {
        self.source.wait_event(self.wait)
    }

    /// Waits for the first event only; the rest of the batch is whatever is
    /// already available.
    fn get_events(&self, max: usize) -> Vec<E> {
        if max == 0 {
            return Vec::new();
        }
        let Some(first) = self.source.wait_event(self.wait) else {
            return Vec::new();
        };
        let mut events = vec![first];
        events.extend(self.source.get_events(max - 1));
        events
    }

    fn wait_event(&self, timeout: Duration) -> Option<E> {
        self.source.wait_event(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventQueue, EventSink};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn empty_source_waits_then_returns_none() {
        let source = BlockingEventSource::new(EventQueue::<u8>::bounded(4), Duration::from_millis(15));
        let start = Instant::now();
        assert!(source.get_event().is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(source.get_events(4).is_empty());
    }

    #[test]
    fn batch_returns_after_first_event() {
        let queue = Arc::new(EventQueue::bounded(8));
        let source = BlockingEventSource::new(queue.clone(), Duration::from_secs(5));

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            queue.add_events(vec![1u8, 2, 3]).unwrap();
        });

        let events = source.get_events(2);
        producer.join().unwrap();
        assert_eq!(events.first(), Some(&1));
        assert!(events.len() <= 2);
    }

    #[test]
    fn zero_max_does_not_wait() {
        let source = BlockingEventSource::new(EventQueue::<u8>::bounded(1), Duration::from_secs(5));
        let start = Instant::now();
        assert!(source.get_events(0).is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
