//! # Reactor
//!
//! One poll thread per reactor, driving many named connections through a
//! readiness [`Multiplexer`].
//!
//! ```text
//!   connect(name, socket, handler, passback)
//!        │
//!        ▼
//!   ┌─────────────────────── registration table (Mutex) ───────────────────┐
//!   │  name → token        token → Idle(registration) | CheckedOut{cancel} │
//!   └──────────────────────────────────────────────────────────────────────┘
//!        ▲        │ check out                        ▲ check in: re-arm,
//!        │        ▼                                  │ park or retire
//!   submit ──▶ [queue] ──▶ poll thread ──▶ handler.on_ready(key, passback)
//! ```
//!
//! A registration is taken out of the table while its handler runs, so the
//! handler may call back into the reactor (connect, disconnect, submit)
//! without deadlocking. Readiness for a checked-out or retired token is
//! skipped; tokens are never reused, so stale readiness is detectable.
//!
//! Every callback runs on the poll thread. `connect` registers the socket on
//! the caller's thread but queues `on_connect` behind it.
//!
//! Interest is re-derived from the transport's buffers after every callback.
//! The multiplexer is edge-triggered, so a registration is re-armed whenever
//! it may still be ready (pending transmit data, or a read that stopped on a
//! full buffer).

pub mod handler;
pub mod multiplexer;

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use mio::{Events, Interest, Token};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ReactorConfig, TransportConfig};
use crate::error::ReactorError;
use crate::stats::{ReactorCounters, ReactorStats};
use crate::transport::{SelectInterest, SocketTransport};

pub use handler::{LoggingMonitor, ReactorMonitor, SelectionKey, SocketDataHandler};
pub use multiplexer::{MioMultiplexer, Multiplexer, WAKER_TOKEN};

/// Work queued for a connection, run on the reactor thread.
type Submission<P> = Box<dyn FnOnce(&mut SocketTransport, &mut P) + Send>;

/// Requests handed to the poll thread.
enum Command<P> {
    /// A registration that still owes its `on_connect`.
    Connect { token: Token, reg: Registration<P> },
    Run { name: Arc<str>, job: Submission<P> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Stopped,
    Running,
}

// ─── Registration table ─────────────────────────────────────────────────────

struct Registration<P> {
    name: Arc<str>,
    transport: SocketTransport,
    handler: Arc<dyn SocketDataHandler<P>>,
    passback: P,
    armed: SelectInterest,
}

enum Slot<P> {
    Idle(Registration<P>),
    /// A callback holds the registration. `cancelled` is set by a
    /// `disconnect` that arrived meanwhile.
    CheckedOut { cancelled: bool },
}

struct Table<P> {
    names: HashMap<Arc<str>, Token>,
    slots: HashMap<Token, Slot<P>>,
    next_token: usize,
}

enum CheckOut<P> {
    Ready(Registration<P>),
    Busy,
    Missing,
}

#[derive(Clone, Copy)]
enum Callback {
    Connect,
    Ready { readable: bool, writable: bool },
}

// ─── Shared state ───────────────────────────────────────────────────────────

struct Shared<P> {
    config: ReactorConfig,
    transport: TransportConfig,
    running: AtomicBool,
    mux: RwLock<Option<Arc<dyn Multiplexer>>>,
    table: Mutex<Table<P>>,
    submit_tx: Sender<Command<P>>,
    submit_rx: Receiver<Command<P>>,
    counters: ReactorCounters,
    monitor: Arc<dyn ReactorMonitor>,
}

impl<P: Send + 'static> Shared<P> {
    fn table(&self) -> MutexGuard<'_, Table<P>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_mux(&self) -> Option<Arc<dyn Multiplexer>> {
        self.mux.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn multiplexer(&self) -> Result<Arc<dyn Multiplexer>, ReactorError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ReactorError::NotRunning);
        }
        self.current_mux().ok_or(ReactorError::NotRunning)
    }

    fn connect(
        &self,
        name: &str,
        stream: mio::net::TcpStream,
        handler: Arc<dyn SocketDataHandler<P>>,
        passback: P,
    ) -> Result<Token, ReactorError> {
        let mux = self.multiplexer()?;
        let name: Arc<str> = Arc::from(name);
        let mut transport = SocketTransport::new(
            name.clone(),
            stream,
            self.transport.receive_buffer,
            self.transport.transmit_buffer,
        )?;

        let token = {
            let mut table = self.table();
            if table.names.contains_key(&name) {
                return Err(ReactorError::AlreadyConnected(name.to_string()));
            }
            let token = Token(table.next_token);
            table.next_token += 1;
            if let Some(stream) = transport.stream_mut() {
                mux.register(stream, token, Interest::READABLE | Interest::WRITABLE)?;
            }
            table.names.insert(name.clone(), token);
            table.slots.insert(token, Slot::CheckedOut { cancelled: false });
            token
        };
        ReactorCounters::bump(&self.counters.connects);
        info!(connection = %name, token = token.0, "connection registered");

        // The slot stays checked out until the poll thread has run on_connect,
        // so no readiness is dispatched ahead of it.
        let reg = Registration {
            name,
            transport,
            handler,
            passback,
            armed: SelectInterest::ReadWrite,
        };
        self.submit_tx
            .send(Command::Connect { token, reg })
            .map_err(|_| ReactorError::NotRunning)?;
        if let Err(e) = mux.wake() {
            debug!(error = %e, "wake after connect failed, next poll tick picks it up");
        }
        Ok(token)
    }

    fn disconnect(&self, name: &str) -> Result<(), ReactorError> {
        let mut table = self.table();
        let Some(token) = table.names.remove(name) else {
            return Err(ReactorError::NotConnected(name.to_string()));
        };
        match table.slots.remove(&token) {
            Some(Slot::Idle(reg)) => {
                drop(table);
                let mux = self.current_mux();
                self.retire(mux.as_deref(), reg);
            }
            Some(Slot::CheckedOut { .. }) => {
                table.slots.insert(token, Slot::CheckedOut { cancelled: true });
                debug!(connection = name, "disconnect deferred until callback returns");
            }
            None => {}
        }
        Ok(())
    }

    fn is_connected(&self, name: &str) -> bool {
        self.table().names.contains_key(name)
    }

    fn submit(&self, name: &str, job: Submission<P>) -> Result<(), ReactorError> {
        let mux = self.multiplexer()?;
        let name = match self.table().names.get_key_value(name) {
            Some((key, _)) => key.clone(),
            None => return Err(ReactorError::NotConnected(name.to_string())),
        };
        self.submit_tx
            .send(Command::Run { name, job })
            .map_err(|_| ReactorError::NotRunning)?;
        mux.wake()?;
        Ok(())
    }

    fn check_out(&self, token: Token) -> CheckOut<P> {
        let mut table = self.table();
        match table.slots.remove(&token) {
            Some(Slot::Idle(reg)) => {
                table.slots.insert(token, Slot::CheckedOut { cancelled: false });
                CheckOut::Ready(reg)
            }
            Some(busy) => {
                table.slots.insert(token, busy);
                CheckOut::Busy
            }
            None => CheckOut::Missing,
        }
    }

    /// Return a registration to the table, or retire it if it was cancelled
    /// by the callback or by a concurrent `disconnect`.
    fn check_in(
        &self,
        mux: &dyn Multiplexer,
        token: Token,
        mut reg: Registration<P>,
        cancel: bool,
        force: bool,
    ) {
        let mut table = self.table();
        let live = matches!(
            table.slots.get(&token),
            Some(Slot::CheckedOut { cancelled: false })
        );
        if cancel || !live {
            table.slots.remove(&token);
            if table.names.get(&reg.name) == Some(&token) {
                table.names.remove(&reg.name);
            }
            drop(table);
            self.retire(Some(mux), reg);
            return;
        }
        Self::rearm(mux, token, &mut reg, force);
        table.slots.insert(token, Slot::Idle(reg));
    }

    fn rearm(mux: &dyn Multiplexer, token: Token, reg: &mut Registration<P>, force: bool) {
        let desired = reg.transport.select_interest();
        let force = reg.transport.take_rearm() || force || desired.is_writable();
        let Some(stream) = reg.transport.stream_mut() else {
            reg.armed = SelectInterest::None;
            return;
        };

        let result = match (reg.armed.to_mio(), desired.to_mio()) {
            (None, None) => Ok(()),
            (Some(_), None) => mux.deregister(stream),
            (None, Some(interest)) => mux.register(stream, token, interest),
            (Some(_), Some(interest)) if reg.armed != desired || force => {
                mux.reregister(stream, token, interest)
            }
            (Some(_), Some(_)) => Ok(()),
        };
        match result {
            Ok(()) => {
                if reg.armed != desired {
                    trace!(connection = %reg.name, from = ?reg.armed, to = ?desired, "interest changed");
                }
                reg.armed = desired;
            }
            Err(e) => warn!(connection = %reg.name, error = %e, "failed to re-arm registration"),
        }
    }

    /// Close a registration that has left the table and tell its handler.
    fn retire(&self, mux: Option<&dyn Multiplexer>, reg: Registration<P>) {
        let Registration {
            name,
            mut transport,
            handler,
            passback,
            armed,
        } = reg;

        if armed != SelectInterest::None {
            if let (Some(mux), Some(stream)) = (mux, transport.stream_mut()) {
                if let Err(e) = mux.deregister(stream) {
                    debug!(connection = %name, error = %e, "deregister failed");
                }
            }
        }
        transport.close();
        ReactorCounters::bump(&self.counters.disconnects);
        info!(connection = %name, "connection removed");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.on_disconnect(&name, passback)));
        if outcome.is_err() {
            ReactorCounters::bump(&self.counters.handler_panics);
            self.monitor.on_handler_panic(&name);
        }
    }

    /// Run a handler callback with panics contained. Returns whether the
    /// registration should be dropped.
    fn invoke(&self, reg: &mut Registration<P>, token: Token, callback: Callback) -> bool {
        let Registration {
            name,
            transport,
            handler,
            passback,
            ..
        } = reg;
        let (readable, writable) = match callback {
            Callback::Connect => (false, false),
            Callback::Ready { readable, writable } => (readable, writable),
        };
        let mut key = SelectionKey::new(name, token, readable, writable, transport);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match callback {
            Callback::Connect => handler.on_connect(&mut key, passback),
            Callback::Ready { .. } => handler.on_ready(&mut key, passback),
        }));
        match outcome {
            Ok(()) => key.is_cancelled(),
            Err(_) => {
                ReactorCounters::bump(&self.counters.handler_panics);
                self.monitor.on_handler_panic(name);
                true
            }
        }
    }

    fn dispatch(&self, mux: &dyn Multiplexer, token: Token, readable: bool, writable: bool) {
        let mut reg = match self.check_out(token) {
            CheckOut::Ready(reg) => reg,
            CheckOut::Busy => {
                trace!(token = token.0, "registration busy, readiness deferred");
                return;
            }
            CheckOut::Missing => {
                ReactorCounters::bump(&self.counters.invalid_keys);
                self.monitor.on_invalid_key(token);
                return;
            }
        };
        ReactorCounters::bump(&self.counters.dispatches);
        let cancel = self.invoke(&mut reg, token, Callback::Ready { readable, writable });
        self.check_in(mux, token, reg, cancel, false);
    }

    /// Run the commands queued before this call. Jobs submitted by a
    /// running job wait for the next pass.
    fn run_submissions(&self, mux: &dyn Multiplexer) {
        let pending = self.submit_rx.len();
        for command in self.submit_rx.try_iter().take(pending) {
            let (name, job) = match command {
                Command::Connect { token, mut reg } => {
                    let cancel = self.invoke(&mut reg, token, Callback::Connect);
                    // Readiness that fired before on_connect was skipped;
                    // re-arm to get it reported again.
                    self.check_in(mux, token, reg, cancel, true);
                    continue;
                }
                Command::Run { name, job } => (name, job),
            };
            let token = self.table().names.get(&name).copied();
            let Some(token) = token else {
                debug!(connection = %name, "submission for departed connection dropped");
                continue;
            };
            let CheckOut::Ready(mut reg) = self.check_out(token) else {
                debug!(connection = %name, "submission target unavailable, dropped");
                continue;
            };
            ReactorCounters::bump(&self.counters.submissions);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                job(&mut reg.transport, &mut reg.passback)
            }));
            let cancel = match outcome {
                Ok(()) => false,
                Err(_) => {
                    ReactorCounters::bump(&self.counters.handler_panics);
                    self.monitor.on_handler_panic(&name);
                    true
                }
            };
            self.check_in(mux, token, reg, cancel, true);
        }
    }

    fn stats(&self) -> ReactorStats {
        let connections = self.table().names.len();
        self.counters.snapshot(connections)
    }
}

fn run_loop<P: Send + 'static>(shared: Arc<Shared<P>>, mux: Arc<dyn Multiplexer>) {
    let mut events = Events::with_capacity(shared.config.events_capacity);
    debug!("reactor loop started");

    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = mux.poll(&mut events, Some(shared.config.poll_timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            ReactorCounters::bump(&shared.counters.poll_errors);
            warn!(error = %e, "poll failed");
            thread::sleep(shared.config.poll_timeout);
            continue;
        }

        shared.run_submissions(&*mux);

        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                continue;
            }
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed();
            shared.dispatch(&*mux, token, readable, writable);
        }
    }

    debug!("reactor loop exited");
}

// ─── Handle ─────────────────────────────────────────────────────────────────

/// Cloneable access to a reactor's connection API, for handlers and other
/// threads. Does not own the poll thread.
pub struct ReactorHandle<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for ReactorHandle<P> {
    fn clone(&self) -> Self {
        ReactorHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Send + 'static> ReactorHandle<P> {
    /// Register a connected socket under `name`. The socket is switched to
    /// non-blocking mode.
    pub fn connect(
        &self,
        name: &str,
        stream: std::net::TcpStream,
        handler: Arc<dyn SocketDataHandler<P>>,
        passback: P,
    ) -> Result<Token, ReactorError> {
        stream.set_nonblocking(true)?;
        self.connect_stream(name, mio::net::TcpStream::from_std(stream), handler, passback)
    }

    /// Register an already non-blocking `mio` stream.
    pub fn connect_stream(
        &self,
        name: &str,
        stream: mio::net::TcpStream,
        handler: Arc<dyn SocketDataHandler<P>>,
        passback: P,
    ) -> Result<Token, ReactorError> {
        self.shared.connect(name, stream, handler, passback)
    }

    /// Deregister and close `name`. If its handler is running the close
    /// happens when the callback returns.
    pub fn disconnect(&self, name: &str) -> Result<(), ReactorError> {
        self.shared.disconnect(name)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.shared.is_connected(name)
    }

    /// Run `f` against the connection's transport on the reactor thread.
    pub fn submit<F>(&self, name: &str, f: F) -> Result<(), ReactorError>
    where
        F: FnOnce(&mut SocketTransport, &mut P) + Send + 'static,
    {
        self.shared.submit(name, Box::new(f))
    }

    pub fn connection_count(&self) -> usize {
        self.shared.table().names.len()
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.shared.table().names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> ReactorStats {
        self.shared.stats()
    }
}

// ─── Reactor ────────────────────────────────────────────────────────────────

/// Owner of the poll thread. Shut down on drop.
pub struct Reactor<P: Send + 'static> {
    handle: ReactorHandle<P>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> Reactor<P> {
    pub fn new(config: ReactorConfig, transport: TransportConfig) -> Self {
        Self::with_monitor(config, transport, Arc::new(LoggingMonitor))
    }

    pub fn with_monitor(
        config: ReactorConfig,
        transport: TransportConfig,
        monitor: Arc<dyn ReactorMonitor>,
    ) -> Self {
        let (submit_tx, submit_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            config,
            transport,
            running: AtomicBool::new(false),
            mux: RwLock::new(None),
            table: Mutex::new(Table {
                names: HashMap::new(),
                slots: HashMap::new(),
                next_token: WAKER_TOKEN.0 + 1,
            }),
            submit_tx,
            submit_rx,
            counters: ReactorCounters::default(),
            monitor,
        });
        Reactor {
            handle: ReactorHandle { shared },
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the multiplexer and start the poll thread.
    pub fn startup(&self) -> Result<(), ReactorError> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Err(ReactorError::AlreadyRunning);
        }
        let shared = &self.handle.shared;

        let mux: Arc<dyn Multiplexer> = Arc::new(MioMultiplexer::new()?);
        *shared.mux.write().unwrap_or_else(|e| e.into_inner()) = Some(mux.clone());
        shared.running.store(true, Ordering::Release);

        let thread_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("tidewire-reactor".into())
            .spawn(move || run_loop(thread_shared, mux));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(
                    poll_timeout_ms = shared.config.poll_timeout.as_millis() as u64,
                    "reactor started"
                );
                Ok(())
            }
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                *shared.mux.write().unwrap_or_else(|e| e.into_inner()) = None;
                Err(ReactorError::Io(e))
            }
        }
    }

    /// Stop the poll thread, close every connection and release the
    /// multiplexer. Always ends `Stopped`; failures go to the monitor.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker().take() else {
            return;
        };
        let shared = &self.handle.shared;
        shared.running.store(false, Ordering::Release);

        let mux = shared.current_mux();
        if let Some(mux) = &mux {
            if let Err(e) = mux.wake() {
                debug!(error = %e, "wake at shutdown failed");
            }
        }
        if worker.join().is_err() {
            error!("reactor thread panicked");
        }

        let retiring: Vec<Registration<P>> = {
            let mut table = shared.table();
            table.names.clear();
            table
                .slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Idle(reg) => Some(reg),
                    Slot::CheckedOut { .. } => None,
                })
                .collect()
        };
        for reg in retiring {
            shared.retire(mux.as_deref(), reg);
        }

        let mut dropped = 0;
        for command in shared.submit_rx.try_iter() {
            match command {
                Command::Connect { reg, .. } => shared.retire(mux.as_deref(), reg),
                Command::Run { .. } => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!(dropped, "pending submissions discarded");
        }

        let closing = shared.mux.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mux) = closing {
            if let Err(e) = mux.close() {
                shared.monitor.on_close_error(&e);
            }
        }
        info!("reactor stopped");
    }

    pub fn state(&self) -> ReactorState {
        if self.worker().is_some() {
            ReactorState::Running
        } else {
            ReactorState::Stopped
        }
    }

    pub fn handle(&self) -> ReactorHandle<P> {
        self.handle.clone()
    }

    pub fn connect(
        &self,
        name: &str,
        stream: std::net::TcpStream,
        handler: Arc<dyn SocketDataHandler<P>>,
        passback: P,
    ) -> Result<Token, ReactorError> {
        self.handle.connect(name, stream, handler, passback)
    }

    pub fn disconnect(&self, name: &str) -> Result<(), ReactorError> {
        self.handle.disconnect(name)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.handle.is_connected(name)
    }

    pub fn submit<F>(&self, name: &str, f: F) -> Result<(), ReactorError>
    where
        F: FnOnce(&mut SocketTransport, &mut P) + Send + 'static,
    {
        self.handle.submit(name, f)
    }

    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.handle.names()
    }

    pub fn stats(&self) -> ReactorStats {
        self.handle.stats()
    }
}

impl<P: Send + 'static> Drop for Reactor<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEventKind;
    use crossbeam_channel::RecvTimeoutError;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn reactor() -> Reactor<()> {
        let reactor = Reactor::new(ReactorConfig::default(), TransportConfig::default());
        reactor.startup().unwrap();
        reactor
    }

    /// (server side, client side) of a loopback connection.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_read_timeout(Some(WAIT)).unwrap();
        (server, client)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// Echoes received bytes, drops the connection at end of stream and
    /// reports lifecycle callbacks on a channel.
    struct EchoHandler {
        log: Sender<String>,
    }

    impl SocketDataHandler<()> for EchoHandler {
        fn on_ready(&self, key: &mut SelectionKey<'_>, _: &mut ()) {
            let mut closed = false;
            if key.is_readable() {
                key.transport().perform_read(|ev| {
                    closed |= matches!(ev.kind, TransportEventKind::Closed);
                });
                let data = key.transport().receive(usize::MAX);
                if !data.is_empty() {
                    let _ = key.transport().send(&data);
                }
            }
            if key.is_writable() || !key.transport().transmit_buffer().is_empty() {
                key.transport().perform_write(|_| {});
            }
            if closed {
                key.cancel();
            }
        }

        fn on_connect(&self, key: &mut SelectionKey<'_>, _: &mut ()) {
            let _ = self.log.send(format!("connect:{}", key.name()));
        }

        fn on_disconnect(&self, name: &Arc<str>, _: ()) {
            let _ = self.log.send(format!("disconnect:{name}"));
        }
    }

    fn echo() -> (Arc<EchoHandler>, Receiver<String>) {
        let (log, rx) = crossbeam_channel::unbounded();
        (Arc::new(EchoHandler { log }), rx)
    }

    #[test]
    fn lifecycle_states() {
        let reactor: Reactor<()> = Reactor::new(ReactorConfig::default(), TransportConfig::default());
        assert_eq!(reactor.state(), ReactorState::Stopped);

        reactor.startup().unwrap();
        assert_eq!(reactor.state(), ReactorState::Running);
        assert!(matches!(reactor.startup(), Err(ReactorError::AlreadyRunning)));

        reactor.shutdown();
        assert_eq!(reactor.state(), ReactorState::Stopped);
        reactor.shutdown();
        assert_eq!(reactor.state(), ReactorState::Stopped);

        // Restartable.
        reactor.startup().unwrap();
        assert_eq!(reactor.state(), ReactorState::Running);
    }

    #[test]
    fn connect_requires_running_reactor() {
        let reactor: Reactor<()> = Reactor::new(ReactorConfig::default(), TransportConfig::default());
        let (server, _client) = socket_pair();
        let (handler, _) = echo();
        let err = reactor.connect("A", server, handler, ()).unwrap_err();
        assert!(matches!(err, ReactorError::NotRunning));
    }

    #[test]
    fn duplicate_name_is_rejected_by_name() {
        let reactor = reactor();
        let (handler, log) = echo();
        let (first, _c1) = socket_pair();
        let (second, _c2) = socket_pair();

        reactor.connect("A", first, handler.clone(), ()).unwrap();
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "connect:A");

        let err = reactor.connect("A", second, handler, ()).unwrap_err();
        assert!(matches!(err, ReactorError::AlreadyConnected(ref n) if n == "A"));
        assert!(err.to_string().contains("`A`"));
        assert_eq!(reactor.connection_count(), 1);
    }

    #[test]
    fn unknown_disconnect_is_rejected_by_name() {
        let reactor = reactor();
        let err = reactor.disconnect("B").unwrap_err();
        assert!(matches!(err, ReactorError::NotConnected(ref n) if n == "B"));
        assert!(err.to_string().contains("`B`"));
    }

    #[test]
    fn echoes_through_buffers() {
        let reactor = reactor();
        let (handler, _log) = echo();
        let (server, mut client) = socket_pair();
        reactor.connect("echo", server, handler, ()).unwrap();

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(reactor.stats().dispatches > 0);
    }

    #[test]
    fn submit_runs_on_reactor_and_flushes() {
        let reactor = reactor();
        let (handler, _log) = echo();
        let (server, mut client) = socket_pair();
        reactor.connect("A", server, handler, ()).unwrap();

        reactor
            .submit("A", |transport, _| {
                assert_eq!(
                    std::thread::current().name(),
                    Some("tidewire-reactor")
                );
                transport.send(b"hello").unwrap();
            })
            .unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(wait_for(|| reactor.stats().submissions == 1));

        let err = reactor.submit("nobody", |_, _| {}).unwrap_err();
        assert!(matches!(err, ReactorError::NotConnected(ref n) if n == "nobody"));
    }

    /// Records the thread each lifecycle callback ran on.
    struct ThreadRecorder {
        log: Sender<(&'static str, Option<String>)>,
    }

    impl SocketDataHandler<()> for ThreadRecorder {
        fn on_ready(&self, _key: &mut SelectionKey<'_>, _: &mut ()) {}

        fn on_connect(&self, _key: &mut SelectionKey<'_>, _: &mut ()) {
            let thread = std::thread::current().name().map(str::to_owned);
            let _ = self.log.send(("connect", thread));
        }
    }

    #[test]
    fn on_connect_runs_on_reactor_thread() {
        let reactor = reactor();
        let (log, calls) = crossbeam_channel::unbounded();
        let (server, _client) = socket_pair();

        std::thread::Builder::new()
            .name("caller".into())
            .spawn({
                let handle = reactor.handle();
                move || {
                    handle
                        .connect("A", server, Arc::new(ThreadRecorder { log }), ())
                        .unwrap();
                }
            })
            .unwrap()
            .join()
            .unwrap();

        let (callback, thread) = calls.recv_timeout(WAIT).unwrap();
        assert_eq!(callback, "connect");
        assert_eq!(thread.as_deref(), Some("tidewire-reactor"));
    }

    #[test]
    fn disconnect_before_on_connect_still_notifies() {
        let reactor = reactor();
        let (handler, log) = echo();
        let (server, _client) = socket_pair();

        reactor.connect("A", server, handler.clone(), ()).unwrap();
        reactor.disconnect("A").unwrap();
        assert!(!reactor.is_connected("A"));

        let mut seen = vec![log.recv_timeout(WAIT).unwrap(), log.recv_timeout(WAIT).unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["connect:A", "disconnect:A"]);
        assert!(wait_for(|| reactor.stats().disconnects == 1));
    }

    #[test]
    fn peer_close_cancels_key() {
        let reactor = reactor();
        let (handler, log) = echo();
        let (server, client) = socket_pair();
        reactor.connect("A", server, handler, ()).unwrap();
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "connect:A");

        drop(client);
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "disconnect:A");
        assert!(!reactor.is_connected("A"));
        assert_eq!(reactor.stats().disconnects, 1);
    }

    #[test]
    fn disconnect_closes_and_notifies() {
        let reactor = reactor();
        let (handler, log) = echo();
        let (server, mut client) = socket_pair();
        reactor.connect("A", server, handler, ()).unwrap();
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "connect:A");

        reactor.disconnect("A").unwrap();
        assert!(!reactor.is_connected("A"));
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "disconnect:A");

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0, "peer sees end of stream");
    }

    #[test]
    fn tokens_are_never_reused() {
        let reactor = reactor();
        let (handler, _log) = echo();
        let (s1, _c1) = socket_pair();
        let (s2, _c2) = socket_pair();

        let first = reactor.connect("A", s1, handler.clone(), ()).unwrap();
        reactor.disconnect("A").unwrap();
        let second = reactor.connect("A", s2, handler, ()).unwrap();
        assert_ne!(first, second);
        assert_ne!(first, WAKER_TOKEN);
    }

    #[derive(Default)]
    struct CountingMonitor {
        invalid: AtomicUsize,
        panics: AtomicUsize,
    }

    impl ReactorMonitor for CountingMonitor {
        fn on_invalid_key(&self, _token: Token) {
            self.invalid.fetch_add(1, Ordering::Relaxed);
        }

        fn on_handler_panic(&self, _name: &str) {
            self.panics.fetch_add(1, Ordering::Relaxed);
        }

        fn on_close_error(&self, _error: &io::Error) {}
    }

    #[test]
    fn stale_token_is_reported_and_skipped() {
        let monitor = Arc::new(CountingMonitor::default());
        let reactor: Reactor<()> = Reactor::with_monitor(
            ReactorConfig::default(),
            TransportConfig::default(),
            monitor.clone(),
        );
        reactor.startup().unwrap();

        let mux = reactor.handle.shared.multiplexer().unwrap();
        reactor.handle.shared.dispatch(&*mux, Token(999), true, false);

        assert_eq!(monitor.invalid.load(Ordering::Relaxed), 1);
        assert_eq!(reactor.stats().invalid_keys, 1);
    }

    struct PanickingHandler;

    impl SocketDataHandler<()> for PanickingHandler {
        fn on_ready(&self, key: &mut SelectionKey<'_>, _: &mut ()) {
            if key.is_readable() {
                panic!("handler bug");
            }
        }
    }

    #[test]
    fn handler_panic_is_contained() {
        let monitor = Arc::new(CountingMonitor::default());
        let reactor: Reactor<()> = Reactor::with_monitor(
            ReactorConfig::default(),
            TransportConfig::default(),
            monitor.clone(),
        );
        reactor.startup().unwrap();

        let (server, mut client) = socket_pair();
        reactor.connect("bad", server, Arc::new(PanickingHandler), ()).unwrap();
        client.write_all(b"boom").unwrap();

        assert!(wait_for(|| !reactor.is_connected("bad")));
        assert_eq!(monitor.panics.load(Ordering::Relaxed), 1);
        assert_eq!(reactor.stats().handler_panics, 1);

        // The loop survived.
        let (handler, _log) = echo();
        let (server, mut client) = socket_pair();
        reactor.connect("good", server, handler, ()).unwrap();
        client.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn shutdown_closes_connections() {
        let reactor = reactor();
        let (handler, log) = echo();
        let (server, mut client) = socket_pair();
        // Keep a handler reference so the log stays open after the
        // registration is dropped.
        reactor.connect("A", server, handler.clone(), ()).unwrap();
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "connect:A");

        reactor.shutdown();
        assert_eq!(log.recv_timeout(WAIT).unwrap(), "disconnect:A");
        assert_eq!(reactor.connection_count(), 0);
        reactor.shutdown();
        assert!(matches!(
            log.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        ));

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
