//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;
pub mod poller;

pub use event_loop::{EventLoop, ShutdownHandle};

use crate::config::Config;
use crate::protocols::RequestHandler;

/// Bind and run the server with `handler` until shutdown.
pub fn run<H: RequestHandler>(config: &Config, handler: H) -> std::io::Result<()> {
    let mut event_loop = EventLoop::bind(config, handler)?;
    event_loop.run()
}
