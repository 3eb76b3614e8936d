//! Callbacks the reactor makes into application code.

use std::io;
use std::sync::Arc;

use mio::Token;
use tracing::{error, warn};

use crate::transport::SocketTransport;

/// A ready registration as seen by a handler.
///
/// Borrowed from the reactor for the duration of one callback.
#[derive(Debug)]
pub struct SelectionKey<'a> {
    name: &'a Arc<str>,
    token: Token,
    readable: bool,
    writable: bool,
    transport: &'a mut SocketTransport,
    cancelled: bool,
}

impl<'a> SelectionKey<'a> {
    pub(crate) fn new(
        name: &'a Arc<str>,
        token: Token,
        readable: bool,
        writable: bool,
        transport: &'a mut SocketTransport,
    ) -> Self {
        SelectionKey {
            name,
            token,
            readable,
            writable,
            transport,
            cancelled: false,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        self.name
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn transport(&mut self) -> &mut SocketTransport {
        self.transport
    }

    /// Drop this registration once the callback returns. The transport is
    /// closed and the handler's `on_disconnect` runs.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Per-connection callbacks. Run on the reactor thread, so they must hand
/// work off rather than block.
///
/// `P` is the passback: per-connection state owned by the registration and
/// handed to every callback.
pub trait SocketDataHandler<P>: Send + Sync {
    /// The socket is ready for the readiness flags on `key`.
    fn on_ready(&self, key: &mut SelectionKey<'_>, passback: &mut P);

    /// The registration was created. Cancelling here drops it straight away.
    fn on_connect(&self, _key: &mut SelectionKey<'_>, _passback: &mut P) {}

    /// The registration is gone and its transport closed. The passback is
    /// returned to the handler.
    fn on_disconnect(&self, _name: &Arc<str>, _passback: P) {}
}

/// Observer for conditions the reactor absorbs rather than propagates.
pub trait ReactorMonitor: Send + Sync {
    /// Readiness arrived for a token with no live registration.
    fn on_invalid_key(&self, token: Token);

    /// A handler callback panicked; its registration was dropped.
    fn on_handler_panic(&self, name: &str);

    /// Closing the multiplexer at shutdown failed.
    fn on_close_error(&self, error: &io::Error);
}

/// Default monitor: log and carry on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMonitor;

impl ReactorMonitor for LoggingMonitor {
    fn on_invalid_key(&self, token: Token) {
        warn!(token = token.0, "readiness for unknown or cancelled key");
    }

    fn on_handler_panic(&self, name: &str) {
        error!(connection = name, "handler panicked, connection dropped");
    }

    fn on_close_error(&self, error: &io::Error) {
        warn!(error = %error, "failed to close multiplexer");
    }
}
