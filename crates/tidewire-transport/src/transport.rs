//! # Socket Transport
//!
//! One connected non-blocking stream plus a receive and a transmit
//! [`CircularBuffer`]. The transport never blocks and never closes itself:
//! every outcome of a read or write attempt is turned into a
//! [`TransportEvent`] and handed to the caller, who decides what to do.
//!
//! Readiness interest is derived purely from buffer occupancy:
//!
//! | receive buffer | transmit buffer | interest    |
//! |----------------|-----------------|-------------|
//! | has space      | empty           | `Read`      |
//! | has space      | has data        | `ReadWrite` |
//! | full           | has data        | `Write`     |
//! | full           | empty           | `None`      |

use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::CircularBuffer;
use crate::error::BufferError;

// ─── Stream ──────────────────────────────────────────────────────────────────

/// A byte stream a transport can drive.
pub trait Stream: Read + Write {
    /// Shut down both directions.
    fn shutdown(&self) -> io::Result<()>;
}

impl Stream for mio::net::TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, Shutdown::Both)
    }
}

// ─── Interest ────────────────────────────────────────────────────────────────

/// Readiness a transport currently wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectInterest {
    None,
    Read,
    Write,
    ReadWrite,
}

impl SelectInterest {
    pub fn from_flags(read: bool, write: bool) -> Self {
        match (read, write) {
            (false, false) => SelectInterest::None,
            (true, false) => SelectInterest::Read,
            (false, true) => SelectInterest::Write,
            (true, true) => SelectInterest::ReadWrite,
        }
    }

    pub fn is_readable(self) -> bool {
        matches!(self, SelectInterest::Read | SelectInterest::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, SelectInterest::Write | SelectInterest::ReadWrite)
    }

    /// The multiplexer interest, or `None` when nothing is wanted.
    pub fn to_mio(self) -> Option<mio::Interest> {
        match self {
            SelectInterest::None => None,
            SelectInterest::Read => Some(mio::Interest::READABLE),
            SelectInterest::Write => Some(mio::Interest::WRITABLE),
            SelectInterest::ReadWrite => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// What happened on a transport.
#[derive(Debug, Clone)]
pub enum TransportEventKind {
    /// The transport was registered with a reactor.
    Connect,
    /// Bytes moved from the socket into the receive buffer.
    Read(usize),
    /// Bytes moved from the transmit buffer to the socket.
    Write(usize),
    ReadError(Arc<io::Error>),
    WriteError(Arc<io::Error>),
    /// The peer closed its end of the stream.
    Closed,
    /// Data may be pending but the receive buffer is full.
    BufferOverflow,
    /// Write readiness fired with nothing to send.
    BufferUnderflow,
}

/// An event tagged with the connection that produced it.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub connection: Arc<str>,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(connection: Arc<str>, kind: TransportEventKind) -> Self {
        TransportEvent { connection, kind }
    }

    /// Whether this event reports a failure or end of stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TransportEventKind::ReadError(_)
                | TransportEventKind::WriteError(_)
                | TransportEventKind::Closed
        )
    }
}

// ─── SocketTransport ─────────────────────────────────────────────────────────

/// Buffered non-blocking stream.
#[derive(Debug)]
pub struct SocketTransport<S = mio::net::TcpStream> {
    name: Arc<str>,
    stream: Option<S>,
    rx: CircularBuffer,
    tx: CircularBuffer,
    /// Set when a read stopped with the socket possibly still readable, so the
    /// registration must be re-armed once space frees up.
    rearm: bool,
}

impl<S: Stream> SocketTransport<S> {
    pub fn new(
        name: impl Into<Arc<str>>,
        stream: S,
        receive_capacity: usize,
        transmit_capacity: usize,
    ) -> Result<Self, BufferError> {
        Ok(SocketTransport {
            name: name.into(),
            stream: Some(stream),
            rx: CircularBuffer::new(receive_capacity)?,
            tx: CircularBuffer::new(transmit_capacity)?,
            rearm: false,
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn event(&self, kind: TransportEventKind) -> TransportEvent {
        TransportEvent::new(self.name.clone(), kind)
    }

    /// The `Connect` event for this transport.
    pub fn connect_event(&self) -> TransportEvent {
        self.event(TransportEventKind::Connect)
    }

    /// Interest derived from buffer occupancy. A closed transport wants
    /// nothing.
    pub fn select_interest(&self) -> SelectInterest {
        if self.stream.is_none() {
            return SelectInterest::None;
        }
        SelectInterest::from_flags(!self.rx.is_full(), !self.tx.is_empty())
    }

    /// Pull whatever the socket has into the receive buffer.
    ///
    /// Emits `BufferOverflow` without touching the socket when the receive
    /// buffer is already full. Otherwise reads until the socket would block,
    /// the buffer fills, or a terminal condition occurs; emits `Read(n)` for
    /// the bytes gathered followed by `Closed` or `ReadError` if one ended the
    /// loop. Returns the number of bytes read.
    pub fn perform_read(&mut self, mut emit: impl FnMut(TransportEvent)) -> usize {
        if self.rx.is_full() {
            self.rearm = true;
            emit(self.event(TransportEventKind::BufferOverflow));
            return 0;
        }

        let SocketTransport {
            name, stream, rx, rearm, ..
        } = self;
        let Some(stream) = stream.as_mut() else {
            return 0;
        };

        let mut total = 0;
        let mut terminal = None;
        loop {
            if rx.is_full() {
                *rearm = true;
                break;
            }
            let result = {
                let (first, second) = rx.write_regions();
                stream.read_vectored(&mut [IoSliceMut::new(first), IoSliceMut::new(second)])
            };
            match result {
                Ok(0) => {
                    terminal = Some(TransportEventKind::Closed);
                    break;
                }
                Ok(n) => {
                    if let Err(err) = rx.commit(n) {
                        let err = io::Error::new(io::ErrorKind::InvalidData, err);
                        terminal = Some(TransportEventKind::ReadError(Arc::new(err)));
                        break;
                    }
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    terminal = Some(TransportEventKind::ReadError(Arc::new(e)));
                    break;
                }
            }
        }

        trace!(connection = %name, bytes = total, "read");
        if total > 0 {
            emit(TransportEvent::new(name.clone(), TransportEventKind::Read(total)));
        }
        if let Some(kind) = terminal {
            emit(TransportEvent::new(name.clone(), kind));
        }
        total
    }

    /// Push the transmit buffer to the socket.
    ///
    /// Emits `BufferUnderflow` without touching the socket when there is
    /// nothing to send. Otherwise writes until the buffer drains, the socket
    /// would block, or an error occurs; emits `Write(n)` then `WriteError` if
    /// one ended the loop. Returns the number of bytes written.
    pub fn perform_write(&mut self, mut emit: impl FnMut(TransportEvent)) -> usize {
        if self.tx.is_empty() {
            emit(self.event(TransportEventKind::BufferUnderflow));
            return 0;
        }

        let SocketTransport {
            name, stream, tx, ..
        } = self;
        let Some(stream) = stream.as_mut() else {
            return 0;
        };

        let mut total = 0;
        let mut terminal = None;
        while !tx.is_empty() {
            let result = {
                let (first, second) = tx.read_regions();
                stream.write_vectored(&[IoSlice::new(first), IoSlice::new(second)])
            };
            match result {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes");
                    terminal = Some(TransportEventKind::WriteError(Arc::new(err)));
                    break;
                }
                Ok(n) => {
                    if let Err(err) = tx.consume(n) {
                        let err = io::Error::new(io::ErrorKind::InvalidData, err);
                        terminal = Some(TransportEventKind::WriteError(Arc::new(err)));
                        break;
                    }
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    terminal = Some(TransportEventKind::WriteError(Arc::new(e)));
                    break;
                }
            }
        }

        trace!(connection = %name, bytes = total, "write");
        if total > 0 {
            emit(TransportEvent::new(name.clone(), TransportEventKind::Write(total)));
        }
        if let Some(kind) = terminal {
            emit(TransportEvent::new(name.clone(), kind));
        }
        total
    }

    /// Queue bytes for transmission, all or nothing.
    pub fn send(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.tx.write_all(data)
    }

    /// Take up to `max` received bytes.
    pub fn receive(&mut self, max: usize) -> Bytes {
        self.rx.read(max)
    }

    pub fn receive_buffer(&self) -> &CircularBuffer {
        &self.rx
    }

    pub fn receive_buffer_mut(&mut self) -> &mut CircularBuffer {
        &mut self.rx
    }

    pub fn transmit_buffer(&self) -> &CircularBuffer {
        &self.tx
    }

    pub fn transmit_buffer_mut(&mut self) -> &mut CircularBuffer {
        &mut self.tx
    }

    /// Returns and clears the re-arm flag.
    pub fn take_rearm(&mut self) -> bool {
        std::mem::take(&mut self.rearm)
    }

    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Shut down and release the socket. Safe to call repeatedly; a socket
    /// the peer already tore down is not an error.
    pub fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        match stream.shutdown() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!(connection = %self.name, error = %e, "shutdown failed"),
        }
        debug!(connection = %self.name, "transport closed");
    }
}
