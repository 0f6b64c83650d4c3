//! frame-echo: a readiness-driven, length-prefixed echo server.
//!
//! Many clients are multiplexed over one mio poll loop on a single thread.
//! Requests are framed with a 4-byte little-endian length prefix (see
//! [`protocols::frame`]); each decoded request is passed to a
//! [`protocols::RequestHandler`] and its response is framed and written
//! back in request order. Pipelined requests are supported.

pub mod config;
pub mod protocols;
pub mod runtime;

pub use config::Config;
pub use protocols::echo::Echo;
pub use protocols::RequestHandler;
pub use runtime::{EventLoop, ShutdownHandle};
