//! # Scheduled Events
//!
//! `TimeEventSource` is an event source whose events become available at a
//! point in time. Keys sit in a min-heap ordered by due instant; ties fire in
//! scheduling order. Cancelling a key marks it invalid and it is discarded
//! lazily the next time it reaches the top of the heap.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use quanta::{Clock, Instant};

use super::EventSource;

// ─── SchedulingKey ──────────────────────────────────────────────────────────

/// Handle to a scheduled event.
#[derive(Debug, Clone)]
pub struct SchedulingKey {
    valid: Arc<AtomicBool>,
}

impl SchedulingKey {
    fn new() -> Self {
        SchedulingKey {
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop the event from firing. A repeating key stops for good.
    pub fn cancel(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// False once cancelled or once a one-shot key has fired.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

// ─── Heap entry ─────────────────────────────────────────────────────────────

struct Scheduled<E> {
    due: Instant,
    seq: u64,
    period: Option<Duration>,
    key: SchedulingKey,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct TimerState<E> {
    heap: BinaryHeap<Reverse<Scheduled<E>>>,
    next_seq: u64,
}

impl<E> TimerState<E> {
    /// Drop cancelled keys sitting at the top of the heap.
    fn discard_cancelled(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.key.is_valid() {
                break;
            }
            self.heap.pop();
        }
    }
}

// ─── TimeEventSource ────────────────────────────────────────────────────────

pub struct TimeEventSource<E> {
    clock: Clock,
    state: Mutex<TimerState<E>>,
}

impl<E: Clone> TimeEventSource<E> {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Use a specific clock (e.g. `Clock::mock()` in tests).
    pub fn with_clock(clock: Clock) -> Self {
        TimeEventSource {
            clock,
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState<E>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule(&self, delay: Duration, period: Option<Duration>, event: E) -> SchedulingKey {
        let key = SchedulingKey::new();
        let due = self.clock.now() + delay;
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(Scheduled {
            due,
            seq,
            period,
            key: key.clone(),
            event,
        }));
        key
    }

    /// Fire `event` once, `delay` from now.
    pub fn schedule_once(&self, delay: Duration, event: E) -> SchedulingKey {
        self.schedule(delay, None, event)
    }

    /// Fire `event` every `period`, first one `period` from now.
    pub fn schedule_repeating(&self, period: Duration, event: E) -> SchedulingKey {
        self.schedule(period, Some(period.max(Duration::from_nanos(1))), event)
    }

    /// When the earliest live key is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut state = self.lock();
        state.discard_cancelled();
        state.heap.peek().map(|Reverse(s)| s.due)
    }

    /// Live scheduled keys.
    pub fn len(&self) -> usize {
        self.lock()
            .heap
            .iter()
            .filter(|Reverse(s)| s.key.is_valid())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> Default for TimeEventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventSource<E> for TimeEventSource<E> {
    fn get_event(&self) -> Option<E> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.discard_cancelled();

        match state.heap.peek() {
            Some(Reverse(top)) if top.due <= now => {}
            _ => return None,
        }
        let Reverse(fired) = state.heap.pop()?;

        match fired.period {
            Some(period) => {
                let seq = state.next_seq;
                state.next_seq += 1;
                let event = fired.event.clone();
                state.heap.push(Reverse(Scheduled {
                    due: fired.due + period,
                    seq,
                    ..fired
                }));
                Some(event)
            }
            None => {
                fired.key.cancel();
                Some(fired.event)
            }
        }
    }

    fn wait_event(&self, timeout: Duration) -> Option<E> {
        if let Some(event) = self.get_event() {
            return Some(event);
        }
        let wait = match self.next_deadline() {
            Some(due) => due.saturating_duration_since(self.clock.now()).min(timeout),
            None => timeout,
        };
        std::thread::sleep(wait);
        self.get_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mocked() -> (TimeEventSource<&'static str>, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (TimeEventSource::with_clock(clock), mock)
    }

    #[test]
    fn one_shot_fires_once_when_due() {
        let (timer, mock) = mocked();
        let key = timer.schedule_once(Duration::from_millis(10), "tick");

        assert_eq!(timer.get_event(), None);
        mock.increment(Duration::from_millis(10));
        assert_eq!(timer.get_event(), Some("tick"));
        assert_eq!(timer.get_event(), None);
        assert!(!key.is_valid());
        assert!(timer.is_empty());
    }

    #[test]
    fn events_fire_in_due_order() {
        let (timer, mock) = mocked();
        timer.schedule_once(Duration::from_millis(30), "late");
        timer.schedule_once(Duration::from_millis(10), "early");
        timer.schedule_once(Duration::from_millis(10), "early-second");

        mock.increment(Duration::from_millis(50));
        assert_eq!(timer.get_events(10), vec!["early", "early-second", "late"]);
    }

    #[test]
    fn cancelled_keys_never_fire() {
        let (timer, mock) = mocked();
        let first = timer.schedule_once(Duration::from_millis(5), "cancelled");
        timer.schedule_once(Duration::from_millis(20), "kept");

        first.cancel();
        let deadline = timer.next_deadline().unwrap();
        mock.increment(Duration::from_millis(5));
        assert_eq!(timer.get_event(), None);
        assert!(deadline > timer.clock.now(), "cancelled key not counted");

        mock.increment(Duration::from_millis(15));
        assert_eq!(timer.get_event(), Some("kept"));
    }

    #[test]
    fn repeating_key_rearms_until_cancelled() {
        let (timer, mock) = mocked();
        let key = timer.schedule_repeating(Duration::from_millis(10), "beat");

        for _ in 0..3 {
            mock.increment(Duration::from_millis(10));
            assert_eq!(timer.get_event(), Some("beat"));
            assert_eq!(timer.get_event(), None);
        }
        assert!(key.is_valid());

        key.cancel();
        mock.increment(Duration::from_millis(10));
        assert_eq!(timer.get_event(), None);
        assert_eq!(timer.next_deadline(), None);
    }

    #[test]
    fn next_deadline_tracks_earliest() {
        let (timer, _mock) = mocked();
        assert!(timer.next_deadline().is_none());
        let start = timer.clock.now();
        timer.schedule_once(Duration::from_millis(40), "b");
        timer.schedule_once(Duration::from_millis(15), "a");
        assert_eq!(
            timer.next_deadline(),
            Some(start + Duration::from_millis(15))
        );
        assert_eq!(timer.len(), 2);
    }
}
