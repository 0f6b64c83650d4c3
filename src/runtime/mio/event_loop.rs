//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread, one loop. Each tick:
//!
//! 1. sync every live connection's interest with its state
//! 2. block in poll until something is ready (no timeout)
//! 3. dispatch each ready token exactly once: accept on the listener,
//!    stop on the shutdown waker, otherwise drive the connection
//! 4. reap a connection as soon as it terminates, in the same tick

use crate::config::Config;
use crate::protocols::RequestHandler;
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry, Termination};
use crate::runtime::mio::poller::{Poller, Ready};
use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Stops a running [`EventLoop`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the current tick.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Single-threaded server loop.
///
/// Owns the listener, the poller and every connection. Nothing here is
/// shared; the only cross-thread entry point is the [`ShutdownHandle`].
pub struct EventLoop<H> {
    poller: Poller,
    ready: Vec<Ready>,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    handler: H,
    /// The last accept drain stopped on an error before would-block.
    accept_pending: bool,
    /// Reused for every response the handler produces.
    scratch: BytesMut,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl<H: RequestHandler> EventLoop<H> {
    /// Bind the listener and set up the poller.
    ///
    /// Any error here means the server cannot make progress at all.
    pub fn bind(config: &Config, handler: H) -> io::Result<Self> {
        let poller = Poller::new(config.events_capacity)?;

        let listener = create_listener(config.listen, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poller
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poller.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poller,
            ready: Vec::with_capacity(config.events_capacity),
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            handler,
            accept_pending: false,
            scratch: BytesMut::with_capacity(crate::protocols::frame::MAX_PAYLOAD),
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
            requested: Arc::clone(&self.shutdown),
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until shutdown is requested, then close every connection.
    ///
    /// Only poll failures end the loop early; connection and accept errors
    /// are contained.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_connections = self.connections.capacity(),
            "Event loop started"
        );

        while !self.shutdown.load(Ordering::Acquire) {
            self.tick()?;
        }

        self.teardown();
        Ok(())
    }

    /// One sync, poll and dispatch cycle.
    pub fn tick(&mut self) -> io::Result<()> {
        self.sync_interests();
        if self.accept_pending {
            self.accept();
        }
        self.poller.poll(&mut self.ready)?;

        for i in 0..self.ready.len() {
            let ready = self.ready[i];
            let Token(id) = ready.token;

            if self.connections.contains(id) {
                trace!(
                    conn_id = id,
                    readable = ready.readable,
                    writable = ready.writable,
                    error = ready.error,
                    "Connection ready"
                );
                self.service(id);
                continue;
            }

            match ready.token {
                LISTENER_TOKEN => self.accept(),
                WAKER_TOKEN => debug!("Shutdown requested"),
                _ => trace!(conn_id = id, "Ignoring event for closed connection"),
            }
        }

        Ok(())
    }

    fn sync_interests(&mut self) {
        let mut failed = Vec::new();
        for (id, conn) in self.connections.iter_mut() {
            if let Err(e) = self.poller.sync(id, conn) {
                warn!(conn_id = id, error = %e, "Failed to update registration");
                failed.push(id);
            }
        }
        for id in failed {
            self.reap(id);
        }
    }

    /// Accept until the listener would block.
    ///
    /// Readiness is edge-triggered, so a drain cut short by an error (e.g.
    /// `EMFILE`) leaves queued connections without a new event. The next tick
    /// drains again before polling.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let conn = Connection::new(stream).with_peer(peer);
                    match self.connections.insert(conn) {
                        Some(id) => debug!(conn_id = id, peer = %peer, "Accepted connection"),
                        None => warn!(
                            peer = %peer,
                            max_connections = self.connections.capacity(),
                            "Connection limit reached, closing"
                        ),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_pending = false;
                    break;
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    self.accept_pending = true;
                    break;
                }
            }
        }
    }

    fn service(&mut self, id: usize) {
        let conn = match self.connections.get_mut(id) {
            Some(conn) => conn,
            None => return,
        };

        match conn.drive(&mut self.handler, &mut self.scratch) {
            Ok(ConnState::Terminated) => self.reap(id),
            Ok(state) => trace!(conn_id = id, ?state, "Connection would block"),
            Err(termination) => {
                let peer = conn.peer();
                match &termination {
                    Termination::PeerClosed => {
                        debug!(conn_id = id, peer = ?peer, "Peer closed connection")
                    }
                    Termination::Protocol(e) => {
                        warn!(conn_id = id, peer = ?peer, error = %e, "Protocol violation")
                    }
                    Termination::Io(e) => {
                        debug!(conn_id = id, peer = ?peer, error = %e, "Connection error")
                    }
                }
                self.reap(id);
            }
        }
    }

    /// Deregister and drop a connection, closing its socket.
    fn reap(&mut self, id: usize) {
        if let Some(mut conn) = self.connections.remove(id) {
            if let Err(e) = self.poller.deregister(&mut conn) {
                debug!(conn_id = id, error = %e, "Deregister failed");
            }
            debug!(conn_id = id, "Connection closed");
        }
    }

    fn teardown(&mut self) {
        let count = self.connections.len();
        for mut conn in self.connections.drain() {
            if let Err(e) = self.poller.deregister(&mut conn) {
                debug!(error = %e, "Deregister failed");
            }
        }
        if let Err(e) = self.poller.registry().deregister(&mut self.listener) {
            debug!(error = %e, "Listener deregister failed");
        }
        info!(closed = count, "Event loop stopped");
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
