//! Echo protocol.
//!
//! The shipped demonstration handler. Every byte received is sent straight
//! back; there is no framing:
//!
//! ```text
//! Request:  hello
//! Response: hello
//! ```
//!
//! A request whose text contains `close` is echoed and the connection is
//! then closed by the server.

pub mod handler;

pub use handler::Echo;
