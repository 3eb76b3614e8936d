//! # Acceptor
//!
//! Listening socket with its own accept thread. Each inbound stream is named
//! `peer-<addr>-<n>` and registered with a reactor together with a passback
//! built by the caller's factory.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info, warn};

use crate::config::AcceptorConfig;
use crate::error::ReactorError;
use crate::reactor::{ReactorHandle, SocketDataHandler};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

pub struct Acceptor {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    worker: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    shutdown_timeout: Duration,
}

impl Acceptor {
    /// Bind `config.bind` and start accepting into `reactor`.
    ///
    /// `passback` is called once per accepted stream with the connection
    /// name and peer address.
    pub fn bind<P, F>(
        config: &AcceptorConfig,
        reactor: ReactorHandle<P>,
        handler: Arc<dyn SocketDataHandler<P>>,
        mut passback: F,
    ) -> Result<Self, ReactorError>
    where
        P: Send + 'static,
        F: FnMut(&str, SocketAddr) -> P + Send + 'static,
    {
        let mut listener = TcpListener::bind(config.bind)?;
        let local_addr = listener.local_addr()?;

        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let running = Arc::new(AtomicBool::new(true));
        let (exit_tx, exited) = crossbeam_channel::bounded(1);

        let worker = {
            let running = running.clone();
            thread::Builder::new()
                .name("tidewire-acceptor".into())
                .spawn(move || {
                    let mut events = Events::with_capacity(16);
                    let mut accepted = 0u64;
                    while running.load(Ordering::Acquire) {
                        if let Err(e) = poll.poll(&mut events, None) {
                            if e.kind() == io::ErrorKind::Interrupted {
                                continue;
                            }
                            warn!(error = %e, "acceptor poll failed");
                            break;
                        }
                        if !events.iter().any(|e| e.token() == LISTENER) {
                            continue;
                        }
                        accept_ready(&listener, &reactor, &handler, &mut passback, &mut accepted);
                    }
                    debug!(accepted, "acceptor exited");
                    let _ = exit_tx.send(());
                })?
        };

        info!(addr = %local_addr, "acceptor listening");
        Ok(Acceptor {
            local_addr,
            running,
            waker,
            worker: Some(worker),
            exited,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop accepting. Waits up to the configured shutdown timeout for the
    /// accept thread; past that it is detached.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake acceptor");
        }

        match self.exited.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    warn!("acceptor thread panicked");
                }
                info!(addr = %self.local_addr, "acceptor stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "acceptor did not stop in time, detaching"
                );
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drain the listener's backlog.
fn accept_ready<P, F>(
    listener: &TcpListener,
    reactor: &ReactorHandle<P>,
    handler: &Arc<dyn SocketDataHandler<P>>,
    passback: &mut F,
    accepted: &mut u64,
) where
    P: Send + 'static,
    F: FnMut(&str, SocketAddr) -> P,
{
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                *accepted += 1;
                let name = format!("peer-{addr}-{accepted}");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(connection = %name, error = %e, "set_nodelay failed");
                }
                let state = passback(&name, addr);
                match reactor.connect_stream(&name, stream, handler.clone(), state) {
                    Ok(token) => debug!(connection = %name, token = token.0, "accepted"),
                    Err(e) => warn!(connection = %name, error = %e, "failed to register accepted stream"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}
