//! tcp-reactor: a single-threaded TCP connection reactor.
//!
//! One listening socket and every accepted client are multiplexed through a
//! readiness wait. Each client's accumulated input is handed to a
//! caller-supplied [`ResponseHandler`](runtime::ResponseHandler), which
//! decides whether to reply, wait for more input, or close.

pub mod config;
pub mod protocols;
pub mod runtime;
pub mod transport;
