//! Wire protocol and request handlers.
//!
//! - `frame`: length-prefixed framing shared by every handler
//! - `echo`: default handler, responds with the request payload

pub mod echo;
pub mod frame;

use bytes::BytesMut;

/// Turns one request payload into one response payload.
///
/// Called by the connection state machine once per decoded frame, in request
/// order. The payload is opaque to the runtime. `response` is empty on entry
/// and its contents are framed and sent back; it must not exceed
/// [`frame::MAX_PAYLOAD`] bytes or the connection is closed.
pub trait RequestHandler {
    fn handle(&mut self, request: &[u8], response: &mut BytesMut);
}
