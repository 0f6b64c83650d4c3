//! Echo request handler.

use bytes::BytesMut;
use tracing::trace;

use crate::protocols::RequestHandler;

/// Responds with the request payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl RequestHandler for Echo {
    fn handle(&mut self, request: &[u8], response: &mut BytesMut) {
        trace!(len = request.len(), payload = ?String::from_utf8_lossy(request), "client says");
        response.extend_from_slice(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_copies_payload() {
        let mut response = BytesMut::new();
        Echo.handle(b"hello", &mut response);
        assert_eq!(&response[..], b"hello");
    }

    #[test]
    fn test_echo_empty() {
        let mut response = BytesMut::new();
        Echo.handle(b"", &mut response);
        assert!(response.is_empty());
    }

    #[test]
    fn test_echo_binary() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let mut response = BytesMut::new();
        Echo.handle(&payload, &mut response);
        assert_eq!(&response[..], &payload[..]);
    }
}
