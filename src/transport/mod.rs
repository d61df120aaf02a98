//! Primitive socket capability consumed by the reactor.
//!
//! The reactor performs all of its I/O through the [`Transport`] trait:
//! socket setup, accept, send/receive, release, and the readiness wait.
//! Implementations hold no client-set or buffering logic; every failure is
//! reported as a [`TransportError`].

mod error;
#[cfg(test)]
pub(crate) mod mock;
mod socket;

pub use error::{Condition, Operation, TransportError};
pub use socket::SocketTransport;

use bytes::BytesMut;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub use std::net::Shutdown;

/// Opaque identity of one open transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    pub const fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection taken off a listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub handle: Handle,
    pub remote: SocketAddr,
}

/// Result of one readiness wait.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub readable: HashSet<Handle>,
    pub writable: HashSet<Handle>,
    pub errored: HashSet<Handle>,
}

impl Readiness {
    pub fn is_readable(&self, handle: Handle) -> bool {
        self.readable.contains(&handle)
    }

    pub fn is_writable(&self, handle: Handle) -> bool {
        self.writable.contains(&handle)
    }

    pub fn is_errored(&self, handle: Handle) -> bool {
        self.errored.contains(&handle)
    }

    /// True when the wait timed out with nothing ready.
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.errored.is_empty()
    }
}

/// Socket operations the reactor is built on.
///
/// `bind` and `listen` are one-time setup calls and must follow `create` in
/// that order. `shutdown` and `close` are safe on handles that are already
/// closed.
pub trait Transport {
    /// Create a new unbound stream socket.
    fn create(&mut self) -> Result<Handle, TransportError>;

    fn set_nonblocking(&mut self, handle: Handle) -> Result<(), TransportError>;

    fn set_address_reusable(&mut self, handle: Handle) -> Result<(), TransportError>;

    fn bind(&mut self, handle: Handle, address: &str, port: u16) -> Result<(), TransportError>;

    fn listen(&mut self, handle: Handle) -> Result<(), TransportError>;

    /// Local address a bound endpoint ended up on.
    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError>;

    /// Take one pending connection, or `None` when nothing is pending.
    fn accept(&mut self, handle: Handle) -> Result<Option<Accepted>, TransportError>;

    /// Write as many bytes as the transport takes in one call.
    ///
    /// Fails with [`Condition::WouldBlock`] when the peer's window is full.
    fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Append up to `max_bytes` to `buf`.
    ///
    /// `Ok(0)` means the peer shut down its write side.
    fn receive(
        &mut self,
        handle: Handle,
        buf: &mut BytesMut,
        max_bytes: usize,
        peek: bool,
    ) -> Result<usize, TransportError>;

    fn shutdown(&mut self, handle: Handle, how: Shutdown) -> Result<(), TransportError>;

    /// Release the endpoint. Unknown handles are ignored.
    fn close(&mut self, handle: Handle);

    /// Block until a handle in `readable` can be read, a handle in
    /// `writable` can be written, or any of them is in an error state, or
    /// until `timeout` elapses.
    ///
    /// A client endpoint that cannot be watched is reported as errored; only
    /// a failure that affects a listening endpoint or the wait itself is
    /// returned as an error.
    fn wait(
        &mut self,
        readable: &[Handle],
        writable: &[Handle],
        timeout: Duration,
    ) -> Result<Readiness, TransportError>;
}
