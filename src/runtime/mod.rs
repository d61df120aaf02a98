//! Reactor runtime.
//!
//! - `Connection` / `ConnectionRegistry`: accepted clients and their buffers
//! - `ResponseHandler`: the application extension point
//! - `Reactor`: the readiness-wait/dispatch loop

mod connection;
mod handler;
mod reactor;

pub use connection::{Connection, ConnectionRegistry};
pub use handler::{Response, ResponseHandler};
pub use reactor::{CloseReason, Reactor, ReactorError, ReactorSettings, StopHandle};
