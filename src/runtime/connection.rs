//! Client connections and the registry that owns them.
//!
//! A connection is one accepted transport endpoint plus the bytes received
//! from it that the response handler has not consumed yet, and the reply
//! bytes the peer has not taken yet.

use crate::runtime::CloseReason;
use crate::transport::Handle;
use bytes::BytesMut;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Initial capacity of a connection's inbound buffer.
const INBOUND_CAPACITY: usize = 4096;

/// A single accepted client connection.
#[derive(Debug)]
pub struct Connection {
    handle: Handle,
    remote_address: IpAddr,
    remote_port: u16,
    /// Bytes received and not yet consumed by the handler.
    inbound: BytesMut,
    /// Reply bytes not yet accepted by the transport.
    outbound: BytesMut,
    /// Set once the connection should be torn down after `outbound` drains.
    pending_close: Option<CloseReason>,
}

impl Connection {
    pub fn new(handle: Handle, remote: SocketAddr) -> Self {
        Self {
            handle,
            remote_address: remote.ip(),
            remote_port: remote.port(),
            inbound: BytesMut::with_capacity(INBOUND_CAPACITY),
            outbound: BytesMut::new(),
            pending_close: None,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn peer(&self) -> SocketAddr {
        SocketAddr::new(self.remote_address, self.remote_port)
    }

    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }

    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    pub fn outbound_mut(&mut self) -> &mut BytesMut {
        &mut self.outbound
    }

    /// Queue reply bytes behind anything still unsent.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Tear the connection down once its queued output is sent. The first
    /// reason recorded wins.
    pub fn close_after_flush(&mut self, reason: CloseReason) {
        self.pending_close.get_or_insert(reason);
    }

    pub fn pending_close(&self) -> Option<CloseReason> {
        self.pending_close
    }
}

/// Registry of live client connections, keyed by handle.
///
/// Holds at most `max_connections` entries and never two entries for the
/// same handle.
pub struct ConnectionRegistry {
    connections: HashMap<Handle, Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection.
    ///
    /// Hands the connection back if the registry is full or its handle is
    /// already present.
    pub fn insert(&mut self, conn: Connection) -> Result<(), Connection> {
        if self.is_full() || self.connections.contains_key(&conn.handle) {
            return Err(conn);
        }
        self.connections.insert(conn.handle, conn);
        Ok(())
    }

    pub fn get(&self, handle: Handle) -> Option<&Connection> {
        self.connections.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Connection> {
        self.connections.get_mut(&handle)
    }

    /// Remove a connection. Removing an absent handle is a no-op.
    pub fn remove(&mut self, handle: Handle) -> Option<Connection> {
        self.connections.remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.connections.contains_key(&handle)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of the current handles.
    ///
    /// Iterating the snapshot stays valid while connections are removed.
    pub fn handles(&self) -> Vec<Handle> {
        self.connections.keys().copied().collect()
    }

    /// Connections in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}
