//! Readiness registration on top of mio.
//!
//! Interest is derived from connection state before every poll:
//! `Reading` wants `READABLE`, `Writing` wants `WRITABLE`. Error and hang-up
//! readiness are always reported by mio regardless of interest.
//!
//! Registration is an upsert. A connection registered with a different
//! interest is re-registered, falling back to a fresh registration if the
//! OS no longer knows the handle; an unregistered connection is registered,
//! falling back to re-registration if the OS already knows it. Either path
//! ends with the same interest recorded on the connection, so syncing twice
//! is a no-op.

use crate::runtime::connection::{ConnState, Connection};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read, Write};

/// One actionable readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Interest a connection in `state` should be registered with.
pub fn desired_interest(state: ConnState) -> Option<Interest> {
    match state {
        ConnState::Reading => Some(Interest::READABLE),
        ConnState::Writing => Some(Interest::WRITABLE),
        ConnState::Terminated => None,
    }
}

/// Owns the OS readiness handle (epoll on Linux, kqueue on macOS).
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    /// Create a poller that returns at most `capacity` events per poll.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Bring a connection's registration in line with its state.
    pub fn sync<S>(&self, id: usize, conn: &mut Connection<S>) -> io::Result<()>
    where
        S: Source + Read + Write,
    {
        let desired = match desired_interest(conn.state()) {
            Some(interest) => interest,
            None => return Ok(()),
        };

        let token = Token(id);
        let registry = self.registry();
        match conn.registered {
            Some(current) if current == desired => return Ok(()),
            Some(_) => match registry.reregister(conn.stream_mut(), token, desired) {
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                    registry.register(conn.stream_mut(), token, desired)?
                }
                result => result?,
            },
            None => match registry.register(conn.stream_mut(), token, desired) {
                Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    registry.reregister(conn.stream_mut(), token, desired)?
                }
                result => result?,
            },
        }

        conn.registered = Some(desired);
        Ok(())
    }

    /// Remove a connection's registration, if it has one.
    pub fn deregister<S>(&self, conn: &mut Connection<S>) -> io::Result<()>
    where
        S: Source + Read + Write,
    {
        if conn.registered.take().is_some() {
            self.registry().deregister(conn.stream_mut())?;
        }
        Ok(())
    }

    /// Block until at least one event is ready, then replace `ready` with
    /// the actionable events. There is no timeout.
    pub fn poll(&mut self, ready: &mut Vec<Ready>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        ready.clear();
        ready.extend(self.events.iter().map(|event| Ready {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::time::Duration;

    #[test]
    fn test_desired_interest() {
        assert_eq!(desired_interest(ConnState::Reading), Some(Interest::READABLE));
        assert_eq!(desired_interest(ConnState::Writing), Some(Interest::WRITABLE));
        assert_eq!(desired_interest(ConnState::Terminated), None);
    }

    fn connected_pair() -> (std::net::TcpStream, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, TcpStream::from_std(server))
    }

    #[test]
    fn test_sync_is_idempotent() {
        let poller = Poller::new(8).unwrap();
        let (_client, server) = connected_pair();
        let mut conn = Connection::new(server);

        poller.sync(3, &mut conn).unwrap();
        assert_eq!(conn.registered, Some(Interest::READABLE));
        poller.sync(3, &mut conn).unwrap();
        assert_eq!(conn.registered, Some(Interest::READABLE));

        poller.deregister(&mut conn).unwrap();
        assert_eq!(conn.registered, None);
        // Deregistering twice is harmless.
        poller.deregister(&mut conn).unwrap();
    }

    #[test]
    fn test_sync_falls_back_when_registration_is_stale() {
        let poller = Poller::new(8).unwrap();
        let (_client, server) = connected_pair();
        let mut conn = Connection::new(server);

        // Claims a different registration than the OS has (none at all).
        conn.registered = Some(Interest::WRITABLE);
        poller.sync(7, &mut conn).unwrap();
        assert_eq!(conn.registered, Some(Interest::READABLE));

        // Forgets a registration the OS still has.
        conn.registered = None;
        poller.sync(7, &mut conn).unwrap();
        assert_eq!(conn.registered, Some(Interest::READABLE));
    }

    #[test]
    fn test_poll_reports_listener_and_connection() {
        let mut poller = Poller::new(8).unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        poller
            .registry()
            .register(&mut listener, Token(usize::MAX), Interest::READABLE)
            .unwrap();

        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut ready = Vec::new();
        poller.poll(&mut ready).unwrap();
        assert!(ready
            .iter()
            .any(|r| r.token == Token(usize::MAX) && r.readable));

        let (stream, _) = listener.accept().unwrap();
        let mut conn = Connection::new(stream);
        poller.sync(0, &mut conn).unwrap();

        client.write_all(b"ping").unwrap();
        client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        poller.poll(&mut ready).unwrap();
        assert!(ready.iter().any(|r| r.token == Token(0) && r.readable));
    }
}
