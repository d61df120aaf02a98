//! Single-threaded readiness reactor.
//!
//! The reactor owns one listening endpoint and the set of accepted clients.
//! Each pass waits for readiness, accepts at most one pending connection,
//! then gives every ready client exactly one receive and at most one handler
//! invocation. Failures on one client only ever tear down that client; a
//! failed wait or an error on the listening endpoint stops the reactor.
//!
//! Replies go out as far as the peer's window allows. Whatever is left is
//! kept on the connection, which is then watched for writability instead of
//! readability until the backlog drains. A peer that stops reading therefore
//! only stalls itself.

use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::handler::{Response, ResponseHandler};
use crate::transport::{
    Condition, Handle, Operation, Readiness, Shutdown, Transport, TransportError,
};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Dispatch};

/// Errors that stop the reactor.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("listening socket setup failed: {0}")]
    Setup(#[source] TransportError),
    #[error("listening socket {0} reported an error condition")]
    ListeningSocket(Handle),
    #[error("readiness wait failed: {0}")]
    Wait(#[source] TransportError),
}

/// Why a client was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The readiness wait put the handle in the error set.
    ErrorCondition,
    /// Zero-byte receive.
    PeerClosed,
    /// The handler returned [`Response::Close`].
    HandlerClosed,
    /// A receive or send failed.
    Io(TransportError),
    /// Removed through [`Reactor::teardown`].
    Evicted,
    /// The reactor itself is closing.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ErrorCondition => f.write_str("error condition"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::HandlerClosed => f.write_str("closed by handler"),
            CloseReason::Io(err) => write!(f, "{err}"),
            CloseReason::Evicted => f.write_str("evicted"),
            CloseReason::Shutdown => f.write_str("reactor shutdown"),
        }
    }
}

/// Cooperative stop flag shared between the run loop and anyone who may
/// ask it to end.
///
/// The flag is checked once per pass, so a pass already in progress always
/// completes.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask the run loop to exit at the next pass boundary.
    pub fn terminate(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime settings for a reactor.
#[derive(Debug, Clone)]
pub struct ReactorSettings {
    /// Bind address, IPv4 literal or host name.
    pub address: String,
    pub port: u16,
    /// Upper bound on one readiness wait.
    pub timeout: Duration,
    pub max_connections: usize,
    /// Most bytes taken from one client in one receive.
    pub receive_size: usize,
    /// Give the handler one last look at buffered input when the peer closes.
    pub flush_on_close: bool,
    /// Sink for diagnostic log lines. `None` discards them.
    pub diagnostics: Option<Dispatch>,
    pub stop: StopHandle,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            timeout: Duration::from_secs(1),
            max_connections: 1024,
            receive_size: 4096,
            flush_on_close: true,
            diagnostics: None,
            stop: StopHandle::new(),
        }
    }
}

/// The readiness-wait/dispatch loop over one listening endpoint.
///
/// After a fatal error the remaining clients stay open until the reactor
/// is closed or dropped, which tears all of them down.
pub struct Reactor<T: Transport, H: ResponseHandler> {
    transport: T,
    handler: H,
    listening: Handle,
    local_addr: SocketAddr,
    clients: ConnectionRegistry,
    timeout: Duration,
    receive_size: usize,
    flush_on_close: bool,
    stop: StopHandle,
    diagnostics: Dispatch,
    closed: bool,
}

impl<T: Transport, H: ResponseHandler> Reactor<T, H> {
    /// Create the listening endpoint and return a reactor ready to run.
    ///
    /// Runs create, non-blocking, address reuse, bind and listen in that
    /// order. The endpoint is closed again if any step fails.
    pub fn new(
        mut transport: T,
        handler: H,
        settings: ReactorSettings,
    ) -> Result<Self, ReactorError> {
        let diagnostics = settings.diagnostics.unwrap_or_else(Dispatch::none);

        let (listening, local_addr) = tracing::dispatcher::with_default(&diagnostics, || {
            open_listener(&mut transport, &settings.address, settings.port)
        })
        .map_err(ReactorError::Setup)?;

        Ok(Self {
            transport,
            handler,
            listening,
            local_addr,
            clients: ConnectionRegistry::new(settings.max_connections),
            timeout: settings.timeout,
            receive_size: settings.receive_size.max(1),
            flush_on_close: settings.flush_on_close,
            stop: settings.stop,
            diagnostics,
            closed: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listening_handle(&self) -> Handle {
        self.listening
    }

    pub fn clients(&self) -> &ConnectionRegistry {
        &self.clients
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }

    /// Ask [`run`](Self::run) to return after the current pass.
    pub fn terminate(&self) {
        self.stop.terminate();
    }

    /// Run passes until terminated or until a fatal error.
    ///
    /// A fatal error is logged, clears the running flag and is returned.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        while self.stop.is_running() {
            if let Err(err) = self.poll_once(self.timeout) {
                self.stop.terminate();
                let clients = self.clients.len();
                tracing::dispatcher::with_default(&self.diagnostics, || {
                    error!(error = %err, clients, "reactor stopped on fatal error");
                });
                return Err(err);
            }
        }

        tracing::dispatcher::with_default(&self.diagnostics, || info!("reactor stopped"));
        Ok(())
    }

    /// Execute one readiness pass, waiting at most `timeout`.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<(), ReactorError> {
        let dispatch = self.diagnostics.clone();
        tracing::dispatcher::with_default(&dispatch, || self.pass(timeout))
    }

    /// Shut down, close and forget one client.
    ///
    /// Returns `false` without touching the transport when `handle` is not
    /// a current client.
    pub fn teardown(&mut self, handle: Handle) -> bool {
        let dispatch = self.diagnostics.clone();
        tracing::dispatcher::with_default(&dispatch, || {
            self.teardown_with(handle, CloseReason::Evicted)
        })
    }

    /// Tear down every client, then close the listening endpoint.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.terminate();

        let dispatch = self.diagnostics.clone();
        tracing::dispatcher::with_default(&dispatch, || {
            for handle in self.clients.handles() {
                self.teardown_with(handle, CloseReason::Shutdown);
            }
            release(&mut self.transport, self.listening);
            debug!(handle = %self.listening, "listening socket closed");
        });
    }

    fn pass(&mut self, timeout: Duration) -> Result<(), ReactorError> {
        let clients = self.clients.handles();
        let mut readable = Vec::with_capacity(clients.len() + 1);
        let mut writable = Vec::new();
        readable.push(self.listening);
        for conn in self.clients.iter() {
            if conn.has_pending_output() {
                writable.push(conn.handle());
            } else {
                readable.push(conn.handle());
            }
        }

        let readiness = self
            .transport
            .wait(&readable, &writable, timeout)
            .map_err(ReactorError::Wait)?;
        if readiness.is_empty() {
            return Ok(());
        }

        if readiness.is_errored(self.listening) {
            return Err(ReactorError::ListeningSocket(self.listening));
        }

        if readiness.is_readable(self.listening) {
            self.accept_client();
        }

        // Handles accepted above are not in this snapshot; they had no
        // chance to be ready yet.
        for handle in clients {
            self.service(handle, &readiness);
        }

        Ok(())
    }

    fn accept_client(&mut self) {
        let accepted = match self.transport.accept(self.listening) {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                trace!("no pending connection");
                return;
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
        };

        if self.clients.contains(accepted.handle) {
            error!(handle = %accepted.handle, "transport returned the handle of a live client");
            return;
        }

        match self.clients.insert(Connection::new(accepted.handle, accepted.remote)) {
            Ok(()) => {
                info!(
                    handle = %accepted.handle,
                    peer = %accepted.remote,
                    clients = self.clients.len(),
                    "connection opened"
                );
            }
            Err(rejected) => {
                warn!(
                    handle = %rejected.handle(),
                    peer = %rejected.peer(),
                    capacity = self.clients.capacity(),
                    "connection limit reached"
                );
                release(&mut self.transport, rejected.handle());
            }
        }
    }

    fn service(&mut self, handle: Handle, readiness: &Readiness) {
        if readiness.is_errored(handle) {
            self.teardown_with(handle, CloseReason::ErrorCondition);
            return;
        }

        let Some(conn) = self.clients.get_mut(handle) else {
            return;
        };
        // Input waits until the peer has taken the previous replies.
        if conn.has_pending_output() {
            if readiness.is_writable(handle) {
                self.drain(handle);
            }
            return;
        }
        if !readiness.is_readable(handle) {
            return;
        }

        let received = match self.transport.receive(
            handle,
            conn.inbound_mut(),
            self.receive_size,
            false,
        ) {
            Ok(n) => n,
            Err(err) if err.is_would_block() => {
                trace!(%handle, "spurious readiness");
                return;
            }
            Err(err) => {
                self.teardown_with(handle, CloseReason::Io(err));
                return;
            }
        };

        if received == 0 {
            self.finish(handle);
            return;
        }

        trace!(%handle, received, buffered = conn.inbound().len(), "received");
        let response = self.handler.respond(conn.inbound_mut());
        self.apply(handle, response);
    }

    fn apply(&mut self, handle: Handle, response: Response) {
        let Some(conn) = self.clients.get_mut(handle) else {
            return;
        };
        match response {
            Response::Reply(reply) => conn.queue(&reply),
            Response::NeedData => {
                trace!(%handle, "awaiting more input");
                return;
            }
            Response::Close(farewell) => {
                if let Some(reply) = farewell {
                    conn.queue(&reply);
                }
                conn.close_after_flush(CloseReason::HandlerClosed);
            }
        }
        self.drain(handle);
    }

    /// End-of-stream: flush buffered input through the handler once, then
    /// tear the client down when its queued output is sent. The peer only
    /// closed its write side, so a reply can still reach it.
    fn finish(&mut self, handle: Handle) {
        let Some(conn) = self.clients.get_mut(handle) else {
            return;
        };
        if self.flush_on_close && !conn.inbound().is_empty() {
            if let Response::Reply(reply) | Response::Close(Some(reply)) =
                self.handler.respond(conn.inbound_mut())
            {
                conn.queue(&reply);
            }
        }
        conn.close_after_flush(CloseReason::PeerClosed);
        self.drain(handle);
    }

    /// Push queued output to the transport, then finish a pending close
    /// once nothing is left.
    fn drain(&mut self, handle: Handle) {
        let Some(conn) = self.clients.get_mut(handle) else {
            return;
        };
        let reason = match send_queued(&mut self.transport, handle, conn.outbound_mut()) {
            Err(err) => Some(CloseReason::Io(err)),
            Ok(()) if conn.has_pending_output() => {
                debug!(%handle, pending = conn.outbound().len(), "peer window full");
                None
            }
            Ok(()) => conn.pending_close(),
        };
        if let Some(reason) = reason {
            self.teardown_with(handle, reason);
        }
    }

    fn teardown_with(&mut self, handle: Handle, reason: CloseReason) -> bool {
        let Some(conn) = self.clients.remove(handle) else {
            return false;
        };
        release(&mut self.transport, handle);

        let peer = conn.peer();
        let clients = self.clients.len();
        match reason {
            CloseReason::ErrorCondition | CloseReason::Io(_) => {
                warn!(%handle, %peer, %reason, clients, "connection closed");
            }
            _ => info!(%handle, %peer, %reason, clients, "connection closed"),
        }
        true
    }
}

impl<T: Transport, H: ResponseHandler> Drop for Reactor<T, H> {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_listener<T: Transport>(
    transport: &mut T,
    address: &str,
    port: u16,
) -> Result<(Handle, SocketAddr), TransportError> {
    let handle = transport.create()?;
    match configure_listener(transport, handle, address, port) {
        Ok(local_addr) => {
            info!(%handle, addr = %local_addr, "listening");
            Ok((handle, local_addr))
        }
        Err(err) => {
            error!(error = %err, "listening socket setup failed");
            transport.close(handle);
            Err(err)
        }
    }
}

fn configure_listener<T: Transport>(
    transport: &mut T,
    handle: Handle,
    address: &str,
    port: u16,
) -> Result<SocketAddr, TransportError> {
    transport.set_nonblocking(handle)?;
    transport.set_address_reusable(handle)?;
    transport.bind(handle, address, port)?;
    transport.listen(handle)?;
    transport.local_addr(handle)
}

/// Send from the front of `outbound` until it is empty or the transport
/// would block. Sent bytes are removed from the queue.
fn send_queued<T: Transport>(
    transport: &mut T,
    handle: Handle,
    outbound: &mut BytesMut,
) -> Result<(), TransportError> {
    while !outbound.is_empty() {
        match transport.send(handle, &outbound[..]) {
            Ok(0) => return Err(TransportError::new(Operation::Send, Condition::WriteZero)),
            Ok(n) => outbound.advance(n),
            Err(err) if err.is_would_block() => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn release<T: Transport>(transport: &mut T, handle: Handle) {
    if let Err(err) = transport.shutdown(handle, Shutdown::Both) {
        debug!(%handle, error = %err, "shutdown failed");
    }
    transport.close(handle);
}
