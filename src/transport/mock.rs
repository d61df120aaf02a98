//! Scripted in-memory transport for reactor tests.

use super::{Accepted, Condition, Handle, Operation, Readiness, Shutdown, Transport, TransportError};
use bytes::BytesMut;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

/// One scripted receive result. An empty chunk is end-of-stream.
type Chunk = Result<Vec<u8>, TransportError>;

#[derive(Default)]
pub struct MockTransport {
    next_handle: usize,
    open: HashSet<Handle>,
    pending: VecDeque<Result<Accepted, TransportError>>,
    inbound: HashMap<Handle, VecDeque<Chunk>>,
    errored: HashSet<Handle>,
    failing_sends: HashSet<Handle>,
    /// Handles whose peer window is full.
    blocked_sends: HashSet<Handle>,
    wait_failure: Option<TransportError>,
    setup_failure: Option<TransportError>,
    /// Largest number of bytes one `send` call accepts.
    send_limit: Option<usize>,
    pub sent: HashMap<Handle, Vec<u8>>,
    pub send_calls: HashMap<Handle, usize>,
    pub receive_calls: HashMap<Handle, usize>,
    pub shutdowns: Vec<Handle>,
    pub closes: Vec<Handle>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> Handle {
        let handle = Handle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.open.insert(handle);
        handle
    }

    /// Queue a connection for the next accept; returns its handle.
    pub fn connect(&mut self, port: u16) -> Handle {
        let handle = self.allocate();
        let remote = SocketAddr::from(([127, 0, 0, 1], port));
        self.pending.push_back(Ok(Accepted { handle, remote }));
        handle
    }

    pub fn fail_next_accept(&mut self, condition: Condition) {
        self.pending
            .push_back(Err(TransportError::new(Operation::Accept, condition)));
    }

    pub fn deliver(&mut self, handle: Handle, bytes: &[u8]) {
        self.inbound
            .entry(handle)
            .or_default()
            .push_back(Ok(bytes.to_vec()));
    }

    pub fn hang_up(&mut self, handle: Handle) {
        self.inbound.entry(handle).or_default().push_back(Ok(Vec::new()));
    }

    pub fn fail_receive(&mut self, handle: Handle, condition: Condition) {
        self.inbound
            .entry(handle)
            .or_default()
            .push_back(Err(TransportError::new(Operation::Receive, condition)));
    }

    pub fn fail_sends(&mut self, handle: Handle) {
        self.failing_sends.insert(handle);
    }

    /// Make sends to `handle` fail with `WouldBlock` until unblocked.
    pub fn block_sends(&mut self, handle: Handle) {
        self.blocked_sends.insert(handle);
    }

    pub fn unblock_sends(&mut self, handle: Handle) {
        self.blocked_sends.remove(&handle);
    }

    pub fn raise_error(&mut self, handle: Handle) {
        self.errored.insert(handle);
    }

    pub fn fail_next_wait(&mut self, condition: Condition) {
        self.wait_failure = Some(TransportError::new(Operation::Wait, condition));
    }

    /// Make one of the listener setup calls fail.
    pub fn fail_setup(&mut self, operation: Operation, condition: Condition) {
        self.setup_failure = Some(TransportError::new(operation, condition));
    }

    pub fn limit_sends(&mut self, limit: usize) {
        self.send_limit = Some(limit);
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.open.contains(&handle)
    }

    pub fn sent_to(&self, handle: Handle) -> &[u8] {
        self.sent.get(&handle).map(Vec::as_slice).unwrap_or_default()
    }

    fn check_open(&self, handle: Handle, operation: Operation) -> Result<(), TransportError> {
        if self.open.contains(&handle) {
            Ok(())
        } else {
            Err(TransportError::new(operation, Condition::InvalidHandle))
        }
    }

    fn check_setup(&self, handle: Handle, operation: Operation) -> Result<(), TransportError> {
        match self.setup_failure {
            Some(err) if err.operation == operation => Err(err),
            _ => self.check_open(handle, operation),
        }
    }
}

impl Transport for MockTransport {
    fn create(&mut self) -> Result<Handle, TransportError> {
        Ok(self.allocate())
    }

    fn set_nonblocking(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.check_setup(handle, Operation::SetNonBlocking)
    }

    fn set_address_reusable(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.check_setup(handle, Operation::SetAddressReusable)
    }

    fn bind(&mut self, handle: Handle, _address: &str, _port: u16) -> Result<(), TransportError> {
        self.check_setup(handle, Operation::Bind)
    }

    fn listen(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.check_setup(handle, Operation::Listen)
    }

    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError> {
        self.check_open(handle, Operation::LocalAddress)?;
        Ok(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }

    fn accept(&mut self, handle: Handle) -> Result<Option<Accepted>, TransportError> {
        self.check_open(handle, Operation::Accept)?;
        self.pending.pop_front().transpose()
    }

    fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<usize, TransportError> {
        self.check_open(handle, Operation::Send)?;
        *self.send_calls.entry(handle).or_default() += 1;
        if self.failing_sends.contains(&handle) {
            return Err(TransportError::new(Operation::Send, Condition::BrokenPipe));
        }
        if self.blocked_sends.contains(&handle) {
            return Err(TransportError::new(Operation::Send, Condition::WouldBlock));
        }
        let n = self.send_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        self.sent
            .entry(handle)
            .or_default()
            .extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn receive(
        &mut self,
        handle: Handle,
        buf: &mut BytesMut,
        max_bytes: usize,
        peek: bool,
    ) -> Result<usize, TransportError> {
        self.check_open(handle, Operation::Receive)?;
        *self.receive_calls.entry(handle).or_default() += 1;
        let queue = self.inbound.entry(handle).or_default();
        let Some(front) = queue.front_mut() else {
            return Err(TransportError::new(Operation::Receive, Condition::WouldBlock));
        };

        let chunk = match front {
            Ok(chunk) => chunk,
            Err(err) => {
                let err = *err;
                queue.pop_front();
                return Err(err);
            }
        };

        let n = chunk.len().min(max_bytes);
        buf.extend_from_slice(&chunk[..n]);
        if !peek {
            // End-of-stream stays queued so later reads see it again.
            if n == chunk.len() && n > 0 {
                queue.pop_front();
            } else {
                chunk.drain(..n);
            }
        }
        Ok(n)
    }

    fn shutdown(&mut self, handle: Handle, _how: Shutdown) -> Result<(), TransportError> {
        if self.open.contains(&handle) {
            self.shutdowns.push(handle);
        }
        Ok(())
    }

    fn close(&mut self, handle: Handle) {
        if self.open.remove(&handle) {
            self.closes.push(handle);
        }
    }

    fn wait(
        &mut self,
        readable: &[Handle],
        writable: &[Handle],
        _timeout: Duration,
    ) -> Result<Readiness, TransportError> {
        if let Some(err) = self.wait_failure.take() {
            return Err(err);
        }

        let mut readiness = Readiness::default();
        for &handle in readable.iter().chain(writable) {
            if self.errored.contains(&handle) {
                readiness.errored.insert(handle);
            }
        }
        for &handle in readable {
            let has_input = self.inbound.get(&handle).is_some_and(|q| !q.is_empty());
            let has_pending = self.is_listener(handle) && !self.pending.is_empty();
            if has_input || has_pending {
                readiness.readable.insert(handle);
            }
        }
        for &handle in writable {
            if self.open.contains(&handle) && !self.blocked_sends.contains(&handle) {
                readiness.writable.insert(handle);
            }
        }
        Ok(readiness)
    }
}

impl MockTransport {
    /// The first handle created is the listener in every reactor test.
    fn is_listener(&self, handle: Handle) -> bool {
        handle == Handle::from_raw(0)
    }
}
