//! Response handlers shipped with the server.
//!
//! - `echo`: byte-identity echo with a `close` keyword

pub mod echo;
