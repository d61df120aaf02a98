//! Application extension point: turns buffered input into an outcome.

use bytes::{Bytes, BytesMut};

/// Outcome of handing a connection's buffered input to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Send these bytes back and keep the connection open.
    Reply(Bytes),
    /// Not enough input yet; keep buffering.
    NeedData,
    /// Close the connection, optionally after sending a final reply.
    Close(Option<Bytes>),
}

/// Caller-supplied response logic.
///
/// `input` holds every byte received from one client that the handler has
/// not consumed. The handler owns consumption: whatever it leaves in the
/// buffer is presented again, followed by newer bytes, on the next call.
/// Returning [`Response::NeedData`] should leave the buffer untouched.
pub trait ResponseHandler {
    fn respond(&mut self, input: &mut BytesMut) -> Response;
}

impl<F> ResponseHandler for F
where
    F: FnMut(&mut BytesMut) -> Response,
{
    fn respond(&mut self, input: &mut BytesMut) -> Response {
        self(input)
    }
}
