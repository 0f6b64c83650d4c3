//! Connection state machine for managing client connections.
//!
//! Each connection cycles through request-read and response-write phases:
//!
//! ```text
//!            frame decoded, response encoded
//!   Reading ---------------------------------> Writing
//!      ^                                          |
//!      +------------------------------------------+
//!                 response fully flushed
//!
//!   Reading/Writing --(EOF, protocol or socket error)--> Terminated
//! ```
//!
//! Within one readiness notification the connection loops locally until the
//! socket would block or the connection terminates. Frames that arrived in
//! the same read (pipelining) are served one after another from the read
//! buffer without waiting for new readiness.

use crate::protocols::frame::{self, ProtocolError};
use crate::protocols::RequestHandler;
use crate::runtime::buffer::{ReadBuffer, WriteBuffer};
use bytes::BytesMut;
use mio::Interest;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use thiserror::Error;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (more of) a request.
    Reading,
    /// Draining a response to the socket.
    Writing,
    /// Finished; the event loop reaps it in the same tick.
    Terminated,
}

/// Why a connection terminated.
#[derive(Debug, Error)]
pub enum Termination {
    /// Clean EOF with no partial frame buffered.
    #[error("peer closed the connection")]
    PeerClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    peer: Option<SocketAddr>,
    /// Interest currently registered with the poller, if any.
    pub(crate) registered: Option<Interest>,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the initial reading state.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
            read_buf: ReadBuffer::new(),
            write_buf: WriteBuffer::new(),
            peer: None,
            registered: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes received but not yet decoded into a frame.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Bytes of the current response not yet accepted by the socket.
    pub fn unsent(&self) -> usize {
        self.write_buf.unsent().len()
    }

    /// Make as much progress as possible without blocking.
    ///
    /// `scratch` is a reusable buffer the handler writes responses into.
    /// Returns the state to wait in, or the reason the connection terminated
    /// (the state is then `Terminated`).
    pub fn drive<H: RequestHandler>(
        &mut self,
        handler: &mut H,
        scratch: &mut BytesMut,
    ) -> Result<ConnState, Termination> {
        match self.run_until_blocked(handler, scratch) {
            Ok(()) => Ok(self.state),
            Err(termination) => {
                self.state = ConnState::Terminated;
                Err(termination)
            }
        }
    }

    fn run_until_blocked<H: RequestHandler>(
        &mut self,
        handler: &mut H,
        scratch: &mut BytesMut,
    ) -> Result<(), Termination> {
        loop {
            match self.state {
                ConnState::Reading => {
                    if self.try_one_request(handler, scratch)? {
                        continue;
                    }
                    if !self.try_fill()? {
                        return Ok(());
                    }
                }
                ConnState::Writing => {
                    if !self.try_flush()? {
                        return Ok(());
                    }
                    // Buffered pipelined frames are served on the next pass.
                    self.state = ConnState::Reading;
                }
                ConnState::Terminated => return Ok(()),
            }
        }
    }

    /// Decode one buffered frame and stage its response.
    ///
    /// Returns `true` if a response was staged (state is now `Writing`).
    fn try_one_request<H: RequestHandler>(
        &mut self,
        handler: &mut H,
        scratch: &mut BytesMut,
    ) -> Result<bool, Termination> {
        if !self.write_buf.is_empty() {
            return Ok(false);
        }

        let (request, frame_len) = match frame::try_decode(self.read_buf.pending())? {
            Some(decoded) => decoded,
            None => return Ok(false),
        };

        scratch.clear();
        handler.handle(request, scratch);
        self.write_buf.fill(&scratch[..])?;
        self.read_buf.consume(frame_len);
        self.state = ConnState::Writing;
        Ok(true)
    }

    /// Read once from the socket into the read buffer.
    ///
    /// Returns `true` if bytes arrived, `false` if the socket would block.
    fn try_fill(&mut self) -> Result<bool, Termination> {
        self.read_buf.compact();

        if self.read_buf.spare_mut().is_empty() {
            // Unreachable with frame-sized buffers: a full buffer always
            // holds a decodable frame or an oversized header.
            return Err(ProtocolError::FrameTooLarge {
                len: self.read_buf.len(),
                max: frame::MAX_PAYLOAD,
            }
            .into());
        }

        loop {
            match self.stream.read(self.read_buf.spare_mut()) {
                Ok(0) if self.read_buf.is_empty() => return Err(Termination::PeerClosed),
                Ok(0) => {
                    return Err(ProtocolError::UnexpectedEof {
                        buffered: self.read_buf.len(),
                    }
                    .into())
                }
                Ok(n) => {
                    self.read_buf.commit(n);
                    return Ok(true);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write the pending response until it drains or the socket would block.
    ///
    /// Returns `true` once the response is fully flushed.
    fn try_flush(&mut self) -> Result<bool, Termination> {
        loop {
            match self.stream.write(self.write_buf.unsent()) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into())
                }
                Ok(n) => {
                    if self.write_buf.advance(n) {
                        return Ok(true);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Registry of live connections using slab allocation.
///
/// Connection ids are slab keys, independent of OS handle numbering. They
/// double as poller tokens. Removing an entry drops the connection, which
/// closes its socket and frees its buffers.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection<S>)> {
        self.connections.iter_mut()
    }

    /// Remove every connection, yielding them for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection<S>> + '_ {
        self.connections.drain()
    }
}
