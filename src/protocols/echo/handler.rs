//! Echo response handler.

use crate::runtime::{Response, ResponseHandler};
use bytes::BytesMut;

const CLOSE_KEYWORD: &[u8] = b"close";

/// Byte-identity echo that closes after echoing a request containing
/// `close`.
///
/// Every call echoes and consumes the whole buffer, so the keyword is only
/// seen when it arrives within one delivery. A keyword split across two
/// receives (`clo`, then `se`) is echoed but does not close. One handler
/// serves every client, so it keeps no per-client history to match across
/// deliveries.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl ResponseHandler for Echo {
    fn respond(&mut self, input: &mut BytesMut) -> Response {
        if input.is_empty() {
            return Response::NeedData;
        }

        let reply = input.split().freeze();
        if contains(&reply, CLOSE_KEYWORD) {
            Response::Close(Some(reply))
        } else {
            Response::Reply(reply)
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_echo_consumes_input() {
        let mut buf = BytesMut::from(&b"hello"[..]);
        let response = Echo.respond(&mut buf);
        assert_eq!(response, Response::Reply(Bytes::from_static(b"hello")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_close_keyword() {
        let mut buf = BytesMut::from(&b"please close"[..]);
        let response = Echo.respond(&mut buf);
        assert_eq!(
            response,
            Response::Close(Some(Bytes::from_static(b"please close")))
        );
    }

    #[test]
    fn test_keyword_is_case_sensitive() {
        let mut buf = BytesMut::from(&b"CLOSE"[..]);
        assert!(matches!(Echo.respond(&mut buf), Response::Reply(_)));
    }

    #[test]
    fn test_empty_input_waits() {
        let mut buf = BytesMut::new();
        assert_eq!(Echo.respond(&mut buf), Response::NeedData);
    }

    #[test]
    fn test_binary_input_is_echoed() {
        let mut buf = BytesMut::from(&[0u8, 159, 146, 150][..]);
        let response = Echo.respond(&mut buf);
        assert_eq!(response, Response::Reply(Bytes::from_static(&[0, 159, 146, 150])));
    }

    #[test]
    fn test_keyword_split_across_deliveries_does_not_close() {
        let mut echo = Echo;
        let mut buf = BytesMut::from(&b"clo"[..]);
        assert!(matches!(echo.respond(&mut buf), Response::Reply(_)));

        buf.extend_from_slice(b"se");
        assert_eq!(
            echo.respond(&mut buf),
            Response::Reply(Bytes::from_static(b"se"))
        );
    }
}
