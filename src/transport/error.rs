//! Transport failure taxonomy.
//!
//! Every socket call either succeeds or fails with a [`TransportError`]: the
//! operation that failed plus a named [`Condition`]. Platform error codes are
//! classified here and never leave this module.

use std::fmt;
use std::io;

/// Transport call that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    SetNonBlocking,
    SetAddressReusable,
    Bind,
    Listen,
    Accept,
    Send,
    Receive,
    Shutdown,
    Wait,
    LocalAddress,
}

impl Operation {
    /// Short name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::SetNonBlocking => "set-nonblocking",
            Operation::SetAddressReusable => "set-reuse-address",
            Operation::Bind => "bind",
            Operation::Listen => "listen",
            Operation::Accept => "accept",
            Operation::Send => "send",
            Operation::Receive => "receive",
            Operation::Shutdown => "shutdown",
            Operation::Wait => "wait",
            Operation::LocalAddress => "local-address",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named failure condition reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    PermissionDenied,
    /// Blocked by a local firewall rule (`EPERM`).
    Forbidden,
    AddressInUse,
    AddressNotAvailable,
    /// Host name did not resolve to an IPv4 address.
    UnresolvableAddress,
    AddressFamilyUnsupported,
    ProtocolUnsupported,
    InvalidHandle,
    NotASocket,
    InvalidArgument,
    AlreadyBound,
    NotListening,
    ProcessDescriptorLimit,
    SystemDescriptorLimit,
    OutOfMemory,
    WouldBlock,
    Interrupted,
    ConnectionAborted,
    ConnectionReset,
    ConnectionRefused,
    NotConnected,
    BrokenPipe,
    /// The peer accepted zero bytes of a non-empty write.
    WriteZero,
    OperationUnsupported,
    ProtocolError,
    OptionUnknown,
    Unknown,
}

impl Condition {
    /// Classify an I/O error into a named condition.
    ///
    /// Platform codes are checked first; the portable `ErrorKind` is the
    /// fallback for errors synthesized by std or by the poller.
    pub fn classify(err: &io::Error) -> Condition {
        if let Some(condition) = err.raw_os_error().and_then(Self::from_code) {
            return condition;
        }

        match err.kind() {
            io::ErrorKind::WouldBlock => Condition::WouldBlock,
            io::ErrorKind::Interrupted => Condition::Interrupted,
            io::ErrorKind::PermissionDenied => Condition::PermissionDenied,
            io::ErrorKind::AddrInUse => Condition::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Condition::AddressNotAvailable,
            io::ErrorKind::ConnectionAborted => Condition::ConnectionAborted,
            io::ErrorKind::ConnectionReset => Condition::ConnectionReset,
            io::ErrorKind::ConnectionRefused => Condition::ConnectionRefused,
            io::ErrorKind::NotConnected => Condition::NotConnected,
            io::ErrorKind::BrokenPipe => Condition::BrokenPipe,
            io::ErrorKind::WriteZero => Condition::WriteZero,
            io::ErrorKind::InvalidInput => Condition::InvalidArgument,
            io::ErrorKind::Unsupported => Condition::OperationUnsupported,
            io::ErrorKind::OutOfMemory => Condition::OutOfMemory,
            _ => Condition::Unknown,
        }
    }

    fn from_code(code: i32) -> Option<Condition> {
        let condition = match code {
            libc::EACCES => Condition::PermissionDenied,
            libc::EPERM => Condition::Forbidden,
            libc::EADDRINUSE => Condition::AddressInUse,
            libc::EADDRNOTAVAIL => Condition::AddressNotAvailable,
            libc::EAFNOSUPPORT => Condition::AddressFamilyUnsupported,
            libc::EPROTONOSUPPORT | libc::EPROTOTYPE => Condition::ProtocolUnsupported,
            libc::EBADF => Condition::InvalidHandle,
            libc::ENOTSOCK => Condition::NotASocket,
            libc::EINVAL => Condition::InvalidArgument,
            libc::EMFILE => Condition::ProcessDescriptorLimit,
            libc::ENFILE => Condition::SystemDescriptorLimit,
            libc::ENOBUFS | libc::ENOMEM => Condition::OutOfMemory,
            libc::EINTR => Condition::Interrupted,
            libc::ECONNABORTED => Condition::ConnectionAborted,
            libc::ECONNRESET => Condition::ConnectionReset,
            libc::ECONNREFUSED => Condition::ConnectionRefused,
            libc::ENOTCONN => Condition::NotConnected,
            libc::EPIPE => Condition::BrokenPipe,
            libc::EOPNOTSUPP => Condition::OperationUnsupported,
            libc::EPROTO => Condition::ProtocolError,
            libc::ENOPROTOOPT => Condition::OptionUnknown,
            // EAGAIN and EWOULDBLOCK may or may not share a value
            code if code == libc::EAGAIN || code == libc::EWOULDBLOCK => Condition::WouldBlock,
            _ => return None,
        };
        Some(condition)
    }

    /// Narrow a generic condition using the operation it came from.
    fn refine(self, operation: Operation) -> Condition {
        match (operation, self) {
            (Operation::Bind, Condition::InvalidArgument) => Condition::AlreadyBound,
            (Operation::Accept, Condition::InvalidArgument) => Condition::NotListening,
            (_, condition) => condition,
        }
    }

    /// Human-readable description of this condition for the given operation.
    pub fn describe(self, operation: Operation) -> &'static str {
        match (self, operation) {
            (Condition::PermissionDenied, Operation::Create) => {
                "Permission to create a socket of the specified type and/or protocol is denied."
            }
            (Condition::PermissionDenied, Operation::Bind) => {
                "The address is protected, and the user is not the superuser."
            }
            (Condition::PermissionDenied, _) => "Permission denied.",
            (Condition::Forbidden, _) => "Firewall rules forbid connection.",
            (Condition::AddressInUse, Operation::Listen) => {
                "Another socket is already listening on the same port."
            }
            (Condition::AddressInUse, _) => "The given address is already in use.",
            (Condition::AddressNotAvailable, _) => {
                "A nonexistent interface was requested or the requested address was not local."
            }
            (Condition::UnresolvableAddress, _) => {
                "The host name did not resolve to an IPv4 address."
            }
            (Condition::AddressFamilyUnsupported, _) => {
                "The implementation does not support the specified address family."
            }
            (Condition::ProtocolUnsupported, _) => {
                "The protocol type or the specified protocol is not supported within this domain."
            }
            (Condition::InvalidHandle, _) => "The handle is not a valid open socket.",
            (Condition::NotASocket, _) => "The handle does not refer to a socket.",
            (Condition::InvalidArgument, Operation::SetAddressReusable) => {
                "The option length or value passed to setsockopt() is invalid."
            }
            (Condition::InvalidArgument, Operation::Wait) => {
                "Too many handles were passed to the readiness wait, or the timeout is invalid."
            }
            (Condition::InvalidArgument, _) => "Invalid argument passed.",
            (Condition::AlreadyBound, _) => "The socket is already bound to an address.",
            (Condition::NotListening, _) => "The socket is not listening for connections.",
            (Condition::ProcessDescriptorLimit, _) => {
                "The per-process limit on the number of open file descriptors has been reached."
            }
            (Condition::SystemDescriptorLimit, _) => {
                "The system-wide limit on the total number of open files has been reached."
            }
            (Condition::OutOfMemory, Operation::Accept) => {
                "Not enough free memory. The allocation is often limited by the socket buffer limits, not by the system memory."
            }
            (Condition::OutOfMemory, _) => "Insufficient memory is available.",
            (Condition::WouldBlock, Operation::Accept) => {
                "The socket is non-blocking and no connections are present to be accepted."
            }
            (Condition::WouldBlock, _) => {
                "The socket is non-blocking and the requested operation would block."
            }
            (Condition::Interrupted, _) => {
                "The call was interrupted by a signal before it could complete."
            }
            (Condition::ConnectionAborted, _) => "A connection has been aborted.",
            (Condition::ConnectionReset, _) => "Connection reset by peer.",
            (Condition::ConnectionRefused, _) => {
                "The remote host refused to allow the network connection."
            }
            (Condition::NotConnected, _) => "The socket is not connected.",
            (Condition::BrokenPipe, _) => {
                "The local end has been shut down on a connection oriented socket."
            }
            (Condition::WriteZero, _) => "The peer accepted no bytes of a non-empty write.",
            (Condition::OperationUnsupported, Operation::Listen) => {
                "The socket is not of a type that supports the listen() operation."
            }
            (Condition::OperationUnsupported, Operation::Accept) => {
                "The referenced socket is not a stream socket."
            }
            (Condition::OperationUnsupported, _) => "The operation is not supported by the socket.",
            (Condition::ProtocolError, _) => "Protocol error.",
            (Condition::OptionUnknown, _) => "The option is unknown at the level indicated.",
            (Condition::Unknown, _) => "Unknown transport error.",
        }
    }
}

/// A failed transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {}", .condition.describe(*.operation))]
pub struct TransportError {
    pub operation: Operation,
    pub condition: Condition,
}

impl TransportError {
    pub fn new(operation: Operation, condition: Condition) -> Self {
        Self {
            operation,
            condition,
        }
    }

    /// Classify an I/O error raised by `operation`.
    pub fn from_io(operation: Operation, err: &io::Error) -> Self {
        Self::new(operation, Condition::classify(err).refine(operation))
    }

    /// Returns a closure suitable for `map_err`.
    pub fn during(operation: Operation) -> impl Fn(io::Error) -> TransportError {
        move |err| TransportError::from_io(operation, &err)
    }

    pub fn description(&self) -> &'static str {
        self.condition.describe(self.operation)
    }

    pub fn is_would_block(&self) -> bool {
        self.condition == Condition::WouldBlock
    }
}
