//! Echo protocol.
//!
//! The default request handler: every request payload is sent back
//! unchanged, framed the same way it arrived.
//!
//! ```text
//! Request:  05 00 00 00 "hello"
//! Response: 05 00 00 00 "hello"
//! ```
//!
//! Useful for throughput testing and for validating framing, pipelining and
//! partial read/write handling without any payload interpretation.

pub mod handler;

pub use handler::Echo;
