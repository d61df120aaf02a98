//! Socket transport backed by socket2 and mio.
//!
//! The listening socket is created and configured through socket2; accepted
//! connections are non-blocking `TcpStream`s. The readiness wait uses mio
//! (epoll on Linux, kqueue on macOS).
//!
//! mio registrations are edge-triggered, so every wait re-registers its
//! interest set. Re-arming makes the poller report any handle that is still
//! ready, which gives the reactor level-triggered passes.

use super::{Accepted, Condition, Handle, Operation, Readiness, Shutdown, Transport, TransportError};
use bytes::BytesMut;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::iter;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{trace, warn};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

enum Role {
    /// Created by `create`, possibly bound and listening.
    Listener(Socket),
    /// Accepted connection.
    Stream(TcpStream),
}

struct Endpoint {
    role: Role,
    registered: bool,
}

impl Endpoint {
    fn fd(&self) -> RawFd {
        match &self.role {
            Role::Listener(socket) => socket.as_raw_fd(),
            Role::Stream(stream) => stream.as_raw_fd(),
        }
    }
}

/// Transport over real TCP sockets.
pub struct SocketTransport {
    poll: Poll,
    events: Events,
    endpoints: Slab<Endpoint>,
}

impl SocketTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a transport that reports at most `events` ready handles per wait.
    pub fn with_capacity(events: usize) -> Result<Self, TransportError> {
        let poll = Poll::new().map_err(TransportError::during(Operation::Wait))?;
        Ok(Self {
            poll,
            events: Events::with_capacity(events.max(1)),
            endpoints: Slab::new(),
        })
    }

    /// Number of open endpoints, listening socket included.
    pub fn open_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    fn raw(&self, handle: Handle, operation: Operation) -> Result<&Socket, TransportError> {
        match self.endpoints.get(handle.as_raw()) {
            Some(Endpoint {
                role: Role::Listener(socket),
                ..
            }) => Ok(socket),
            Some(_) => Err(TransportError::new(operation, Condition::OperationUnsupported)),
            None => Err(TransportError::new(operation, Condition::InvalidHandle)),
        }
    }

    fn stream(&self, handle: Handle, operation: Operation) -> Result<&TcpStream, TransportError> {
        match self.endpoints.get(handle.as_raw()) {
            Some(Endpoint {
                role: Role::Stream(stream),
                ..
            }) => Ok(stream),
            Some(_) => Err(TransportError::new(operation, Condition::NotConnected)),
            None => Err(TransportError::new(operation, Condition::InvalidHandle)),
        }
    }
}

impl Transport for SocketTransport {
    fn create(&mut self) -> Result<Handle, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::during(Operation::Create))?;
        let key = self.endpoints.insert(Endpoint {
            role: Role::Listener(socket),
            registered: false,
        });
        Ok(Handle::from_raw(key))
    }

    fn set_nonblocking(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.raw(handle, Operation::SetNonBlocking)?
            .set_nonblocking(true)
            .map_err(TransportError::during(Operation::SetNonBlocking))
    }

    fn set_address_reusable(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.raw(handle, Operation::SetAddressReusable)?
            .set_reuse_address(true)
            .map_err(TransportError::during(Operation::SetAddressReusable))
    }

    fn bind(&mut self, handle: Handle, address: &str, port: u16) -> Result<(), TransportError> {
        let unresolvable = TransportError::new(Operation::Bind, Condition::UnresolvableAddress);
        let addr = (address, port)
            .to_socket_addrs()
            .map_err(|_| unresolvable)?
            .find(SocketAddr::is_ipv4)
            .ok_or(unresolvable)?;

        self.raw(handle, Operation::Bind)?
            .bind(&addr.into())
            .map_err(TransportError::during(Operation::Bind))
    }

    fn listen(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.raw(handle, Operation::Listen)?
            .listen(libc::SOMAXCONN)
            .map_err(TransportError::during(Operation::Listen))
    }

    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError> {
        let addr = match self.endpoints.get(handle.as_raw()) {
            Some(Endpoint {
                role: Role::Listener(socket),
                ..
            }) => socket
                .local_addr()
                .map_err(TransportError::during(Operation::LocalAddress))?
                .as_socket(),
            Some(Endpoint {
                role: Role::Stream(stream),
                ..
            }) => Some(
                stream
                    .local_addr()
                    .map_err(TransportError::during(Operation::LocalAddress))?,
            ),
            None => {
                return Err(TransportError::new(
                    Operation::LocalAddress,
                    Condition::InvalidHandle,
                ))
            }
        };
        addr.ok_or(TransportError::new(
            Operation::LocalAddress,
            Condition::AddressFamilyUnsupported,
        ))
    }

    fn accept(&mut self, handle: Handle) -> Result<Option<Accepted>, TransportError> {
        let (socket, addr) = match self.raw(handle, Operation::Accept)?.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(TransportError::from_io(Operation::Accept, &e)),
        };

        let remote = addr.as_socket().ok_or(TransportError::new(
            Operation::Accept,
            Condition::AddressFamilyUnsupported,
        ))?;

        // Linux does not carry O_NONBLOCK over from the listener.
        socket
            .set_nonblocking(true)
            .map_err(TransportError::during(Operation::Accept))?;

        let key = self.endpoints.insert(Endpoint {
            role: Role::Stream(TcpStream::from(socket)),
            registered: false,
        });
        Ok(Some(Accepted {
            handle: Handle::from_raw(key),
            remote,
        }))
    }

    fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut stream = self.stream(handle, Operation::Send)?;
        loop {
            match stream.write(bytes) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::from_io(Operation::Send, &e)),
            }
        }
    }

    fn receive(
        &mut self,
        handle: Handle,
        buf: &mut BytesMut,
        max_bytes: usize,
        peek: bool,
    ) -> Result<usize, TransportError> {
        let mut stream = self.stream(handle, Operation::Receive)?;

        let start = buf.len();
        buf.resize(start + max_bytes, 0);
        let result = loop {
            let attempt = if peek {
                stream.peek(&mut buf[start..])
            } else {
                stream.read(&mut buf[start..])
            };
            match attempt {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                buf.truncate(start);
                Err(TransportError::from_io(Operation::Receive, &e))
            }
        }
    }

    fn shutdown(&mut self, handle: Handle, how: Shutdown) -> Result<(), TransportError> {
        let result = match self.endpoints.get(handle.as_raw()) {
            Some(Endpoint {
                role: Role::Stream(stream),
                ..
            }) => stream.shutdown(how),
            Some(Endpoint {
                role: Role::Listener(socket),
                ..
            }) => socket.shutdown(how),
            None => return Ok(()),
        };

        match result {
            // The peer may already have torn the connection down.
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(TransportError::during(Operation::Shutdown)),
        }
    }

    fn close(&mut self, handle: Handle) {
        let Some(endpoint) = self.endpoints.try_remove(handle.as_raw()) else {
            return;
        };
        if endpoint.registered {
            let fd = endpoint.fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
        trace!(%handle, "endpoint closed");
        // Dropping the socket closes the descriptor.
    }

    fn wait(
        &mut self,
        readable: &[Handle],
        writable: &[Handle],
        timeout: Duration,
    ) -> Result<Readiness, TransportError> {
        let mut readiness = Readiness::default();
        let registry = self.poll.registry();
        let interest = readable
            .iter()
            .zip(iter::repeat(Interest::READABLE))
            .chain(writable.iter().zip(iter::repeat(Interest::WRITABLE)));

        for (&handle, interest) in interest {
            let Some(endpoint) = self.endpoints.get_mut(handle.as_raw()) else {
                continue;
            };
            let fd = endpoint.fd();
            let token = Token(handle.as_raw());
            let result = if endpoint.registered {
                registry.reregister(&mut SourceFd(&fd), token, interest)
            } else {
                registry.register(&mut SourceFd(&fd), token, interest)
            };

            match result {
                Ok(()) => endpoint.registered = true,
                Err(e) if matches!(endpoint.role, Role::Listener(_)) => {
                    return Err(TransportError::from_io(Operation::Wait, &e));
                }
                Err(e) => {
                    warn!(%handle, error = %e, "cannot watch endpoint");
                    readiness.errored.insert(handle);
                }
            }
        }

        // A failed registration is already an answer; do not sleep on it.
        let timeout = if readiness.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(readiness),
            Err(e) => return Err(TransportError::from_io(Operation::Wait, &e)),
        }

        for event in self.events.iter() {
            let handle = Handle::from_raw(event.token().0);
            if event.is_error() {
                readiness.errored.insert(handle);
            }
            if event.is_readable() || event.is_read_closed() {
                readiness.readable.insert(handle);
            }
            if event.is_writable() || event.is_write_closed() {
                readiness.writable.insert(handle);
            }
        }
        Ok(readiness)
    }
}
