//! Length-prefixed frame codec.
//!
//! Every message on the wire is a 4-byte little-endian `u32` length followed
//! by exactly that many payload bytes:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (LE)  | payload: [u8; len]        |
//! +----------------+---------------------------+
//!
//! Example:
//! 05 00 00 00 68 65 6c 6c 6f   ("hello")
//! ```
//!
//! The payload may be empty and may not exceed [`MAX_PAYLOAD`] bytes. The
//! functions here are pure: they never touch a socket and never allocate
//! except in [`encode`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 4096;

/// Largest complete frame (header plus payload).
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD;

/// Framing violations. Any of these is fatal for the connection that
/// produced it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The length prefix (or a response payload) exceeds the maximum.
    #[error("frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer closed the stream in the middle of a frame.
    #[error("unexpected EOF with {buffered} bytes of a partial frame buffered")]
    UnexpectedEof { buffered: usize },

    /// A response was produced while the previous one was still unsent.
    #[error("write buffer still holds an unsent response")]
    BufferBusy,
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns `Ok(Some((payload, frame_len)))` when a complete frame is present,
/// where `frame_len` is the number of bytes to consume. Returns `Ok(None)`
/// when more bytes are needed. An oversized length prefix is reported as soon
/// as the header is available, without waiting for the payload.
pub fn try_decode(buf: &[u8]) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = read_len(buf);
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }

    let frame_len = HEADER_LEN + len;
    if buf.len() < frame_len {
        return Ok(None);
    }

    Ok(Some((&buf[HEADER_LEN..frame_len], frame_len)))
}

/// Encode `payload` as a freshly allocated frame.
pub fn encode(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    check_len(payload.len())?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Encode `payload` into the front of `out`, returning the frame length.
///
/// `out` must have room for the whole frame; a frame that does not fit is
/// reported as `FrameTooLarge` against the space available.
pub fn encode_into(payload: &[u8], out: &mut [u8]) -> Result<usize, ProtocolError> {
    check_len(payload.len())?;

    let frame_len = HEADER_LEN + payload.len();
    if frame_len > out.len() {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: out.len().saturating_sub(HEADER_LEN),
        });
    }

    out[..HEADER_LEN].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out[HEADER_LEN..frame_len].copy_from_slice(payload);
    Ok(frame_len)
}

fn check_len(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

fn read_len(buf: &[u8]) -> usize {
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    u32::from_le_bytes(header) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hello() {
        let buf = [5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o'];
        let (payload, frame_len) = try_decode(&buf).unwrap().unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(frame_len, 9);
    }

    #[test]
    fn test_encode_hello() {
        let frame = encode(b"hello").unwrap();
        assert_eq!(&frame[..], &[5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_round_trip_boundaries() {
        for len in [0, 1, 255, 256, MAX_PAYLOAD - 1, MAX_PAYLOAD] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = encode(&payload).unwrap();
            let (decoded, frame_len) = try_decode(&frame).unwrap().unwrap();
            assert_eq!(decoded, &payload[..]);
            assert_eq!(frame_len, frame.len());
        }
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(try_decode(&[]).unwrap(), None);
        assert_eq!(try_decode(&[5, 0, 0]).unwrap(), None);
    }

    #[test]
    fn test_incomplete_payload() {
        // Header alone is not an empty frame.
        assert_eq!(try_decode(&[5, 0, 0, 0]).unwrap(), None);
        assert_eq!(try_decode(&[5, 0, 0, 0, b'h', b'e']).unwrap(), None);
    }

    #[test]
    fn test_empty_payload() {
        let (payload, frame_len) = try_decode(&[0, 0, 0, 0]).unwrap().unwrap();
        assert!(payload.is_empty());
        assert_eq!(frame_len, HEADER_LEN);
    }

    #[test]
    fn test_oversized_prefix() {
        let header = ((MAX_PAYLOAD + 1) as u32).to_le_bytes();
        assert_eq!(
            try_decode(&header),
            Err(ProtocolError::FrameTooLarge {
                len: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );

        let header = u32::MAX.to_le_bytes();
        assert!(matches!(
            try_decode(&header),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_only_first_of_two() {
        let mut buf = encode(b"hello1").unwrap().to_vec();
        buf.extend_from_slice(&encode(b"hello2").unwrap());

        let (first, used) = try_decode(&buf).unwrap().unwrap();
        assert_eq!(first, b"hello1");
        let (second, rest) = try_decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, b"hello2");
        assert_eq!(used + rest, buf.len());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode(&payload),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_into() {
        let mut out = [0u8; MAX_FRAME];
        let len = encode_into(b"abc", &mut out).unwrap();
        assert_eq!(&out[..len], &[3, 0, 0, 0, b'a', b'b', b'c']);

        let mut small = [0u8; 6];
        assert!(matches!(
            encode_into(b"abc", &mut small),
            Err(ProtocolError::FrameTooLarge { len: 3, max: 2 })
        ));
    }
}
