//! Readiness multiplexer abstraction and its `mio` implementation.

use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

/// Token reserved for the multiplexer's waker.
pub const WAKER_TOKEN: Token = Token(0);

/// OS readiness selector shared between the poll thread and registering
/// threads. Registration calls may come from any thread; `poll` only from
/// the reactor thread.
pub trait Multiplexer: Send + Sync {
    fn register(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    fn reregister(&self, source: &mut dyn Source, token: Token, interest: Interest)
        -> io::Result<()>;

    fn deregister(&self, source: &mut dyn Source) -> io::Result<()>;

    /// Block until readiness, a wake-up, or `timeout`.
    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;

    /// Interrupt a blocked `poll` from another thread.
    fn wake(&self) -> io::Result<()>;

    /// Release the selector. Later polls fail.
    fn close(&self) -> io::Result<()>;
}

/// `mio::Poll` (epoll, kqueue or IOCP depending on platform).
pub struct MioMultiplexer {
    poll: Mutex<Option<Poll>>,
    registry: Registry,
    waker: Waker,
}

impl MioMultiplexer {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(MioMultiplexer {
            poll: Mutex::new(Some(poll)),
            registry,
            waker,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Poll>> {
        self.poll.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Multiplexer for MioMultiplexer {
    fn register(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        self.registry.register(source, token, interest)
    }

    fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.reregister(source, token, interest)
    }

    fn deregister(&self, source: &mut dyn Source) -> io::Result<()> {
        self.registry.deregister(source)
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.lock().as_mut() {
            Some(poll) => poll.poll(events, timeout),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "multiplexer closed",
            )),
        }
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    fn close(&self) -> io::Result<()> {
        drop(self.lock().take());
        Ok(())
    }
}

impl std::fmt::Debug for MioMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MioMultiplexer")
            .field("open", &self.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wake_interrupts_poll() {
        let mux = Arc::new(MioMultiplexer::new().unwrap());
        let waker = {
            let mux = mux.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mux.wake().unwrap();
            })
        };

        let mut events = Events::with_capacity(8);
        mux.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == WAKER_TOKEN));
        waker.join().unwrap();
    }

    #[test]
    fn closed_multiplexer_refuses_poll() {
        let mux = MioMultiplexer::new().unwrap();
        mux.close().unwrap();
        let mut events = Events::with_capacity(1);
        let err = mux.poll(&mut events, Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
