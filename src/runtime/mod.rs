//! Readiness-driven runtime.
//!
//! - `buffer`: fixed per-connection read and write buffers
//! - `connection`: per-connection state machine and the slab registry
//! - `mio`: poller adapter and the event loop itself
//!
//! Everything runs on the caller's thread. The only blocking call is the
//! poll inside the event loop.

pub mod buffer;
pub mod connection;
pub mod mio;

pub use self::connection::{ConnState, Connection, ConnectionRegistry, Termination};
pub use self::mio::{EventLoop, ShutdownHandle};

use crate::config::Config;
use crate::protocols::echo::Echo;

/// Run the server with the default echo handler.
pub fn run(config: &Config) -> std::io::Result<()> {
    self::mio::run(config, Echo)
}
