//! UDP socket creation and the blocking/non-blocking mode switches the handshake and the
//! connection engine need. A thin wrapper over `std::net::UdpSocket`; readiness checks for
//! the single-threaded polling variant go through `mio`.

use mio::{Events, Poll, PollOpt, Ready, Token};
use race_proto::{AdapterError, AdapterResult, ErrorKind, ResourceError};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

const POLL_TOKEN: Token = Token(0);

pub struct Socket {
    inner: UdpSocket,
}

impl Socket {
    /// Binds a server-role socket on `INADDR_ANY:port`.
    pub fn server(port: u16) -> AdapterResult<Socket> {
        let inner = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|_| AdapterError::Fatal(ErrorKind::Resource(ResourceError::Bind)))?;
        Ok(Socket { inner })
    }

    /// Resolves `host:port` and binds an ephemeral local socket for the client role. Returns
    /// the socket and the resolved remote address; UDP socket creation does not by itself
    /// confirm the peer is reachable.
    pub fn client(host: &str, port: u16) -> AdapterResult<(Socket, SocketAddr)> {
        let remote = (host, port)
            .to_socket_addrs()
            .map_err(|_| AdapterError::Fatal(ErrorKind::Resource(ResourceError::Resolve)))?
            .next()
            .ok_or(AdapterError::Fatal(ErrorKind::Resource(ResourceError::Resolve)))?;

        let local_any = if remote.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let inner = UdpSocket::bind(local_any)
            .map_err(|_| AdapterError::Fatal(ErrorKind::Resource(ResourceError::SocketCreate)))?;

        Ok((Socket { inner }, remote))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> AdapterResult<()> {
        self.inner.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// `None` clears the timeout, making the next receive block indefinitely.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> AdapterResult<()> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Duplicates the underlying descriptor so the sender and receiver sides of a connection
    /// can hold independent `Socket` handles (independent timeouts/blocking modes) onto the
    /// same bound port.
    pub fn try_clone(&self) -> AdapterResult<Socket> {
        Ok(Socket {
            inner: self.inner.try_clone()?,
        })
    }

    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> AdapterResult<usize> {
        Ok(self.inner.send_to(buf, addr)?)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> AdapterResult<(usize, SocketAddr)> {
        Ok(self.inner.recv_from(buf)?)
    }

    pub fn local_addr(&self) -> AdapterResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Non-blocking readability poll used by the single-threaded polling variant: a momentary
    /// `mio` registration with a zero-duration wait, equivalent to a `select()` with a zero
    /// timeout.
    pub fn check_available(&self) -> AdapterResult<bool> {
        self.inner.set_nonblocking(true)?;

        let mio_socket = mio::net::UdpSocket::from_socket(self.inner.try_clone()?)
            .map_err(|_| AdapterError::Fatal(ErrorKind::Resource(ResourceError::SocketCreate)))?;

        let poll = Poll::new().map_err(|_| AdapterError::Fatal(ErrorKind::Resource(ResourceError::SocketCreate)))?;
        poll.register(&mio_socket, POLL_TOKEN, Ready::readable(), PollOpt::edge())?;

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_millis(0)))?;

        Ok(events.iter().any(|e| e.token() == POLL_TOKEN && e.readiness().is_readable()))
    }
}
