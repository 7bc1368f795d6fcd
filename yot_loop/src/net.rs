//! Non-blocking TCP on top of the loop's readiness waits.
//!
//! Sockets register with the loop when created and deregister when dropped.
//! Every operation tries the non-blocking call first and only suspends on
//! `WouldBlock`, so readiness that arrived before the call is never lost.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::io::Watched;
use crate::runtime::Handle;

/// Retries `op` until it stops reporting `WouldBlock` or `Interrupted`.
///
/// The result is bound before matching so no borrow of the socket is held
/// while suspended.
macro_rules! retry_nonblocking {
    ($wait:expr, $op:expr) => {
        loop {
            let result = $op;
            match result {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => $wait.await?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        }
    };
}

pub struct TcpListener {
    inner: RefCell<mio::net::TcpListener>,
    token: Token,
    handle: Handle,
}

impl TcpListener {
    /// Binds a listening socket and registers it with the loop behind `handle`.
    pub fn bind(handle: &Handle, addr: SocketAddr) -> io::Result<Self> {
        let mut inner = mio::net::TcpListener::bind(addr)?;
        let token = handle.next_token();
        handle
            .registry()
            .register(&mut inner, token, Interest::READABLE)?;
        debug!(?token, %addr, "listener registered");
        Ok(Self {
            inner: RefCell::new(inner),
            token,
            handle: handle.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.borrow().local_addr()
    }

    /// Accepts the next connection, suspending until one is pending.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) =
            retry_nonblocking!(self.handle.read_wait(self), self.inner.borrow().accept())?;
        let stream = TcpStream::register(&self.handle, stream)?;
        Ok((stream, peer))
    }
}

impl Watched for TcpListener {
    fn token(&self) -> Token {
        self.token
    }

    fn rearm(&self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.reregister(&mut *self.inner.borrow_mut(), self.token, interest)
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.handle.forget_io(self.token);
        if let Err(e) = self.handle.registry().deregister(self.inner.get_mut()) {
            warn!(token = ?self.token, error = %e, "failed to deregister listener");
        }
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("token", &self.token)
            .field("local_addr", &self.local_addr().ok())
            .finish()
    }
}

pub struct TcpStream {
    inner: RefCell<mio::net::TcpStream>,
    token: Token,
    handle: Handle,
}

impl TcpStream {
    /// Opens a connection to `addr`, suspending until it is established.
    pub async fn connect(handle: &Handle, addr: SocketAddr) -> io::Result<Self> {
        let stream = Self::register(handle, mio::net::TcpStream::connect(addr)?)?;

        // A non-blocking connect finishes once the socket turns writable.
        handle.write_wait(&stream).await?;
        let pending = stream.inner.borrow().take_error()?;
        if let Some(e) = pending {
            return Err(e);
        }
        let peer = stream.inner.borrow().peer_addr();
        match peer {
            Ok(_) => Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                Err(io::ErrorKind::ConnectionRefused.into())
            }
            Err(e) => Err(e),
        }
    }

    fn register(handle: &Handle, mut inner: mio::net::TcpStream) -> io::Result<Self> {
        let token = handle.next_token();
        handle.registry().register(
            &mut inner,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        Ok(Self {
            inner: RefCell::new(inner),
            token,
            handle: handle.clone(),
        })
    }

    /// Receives at most `max_bytes`. An empty vector means the peer closed
    /// its end.
    pub async fn recv(&self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; max_bytes];
        let n = retry_nonblocking!(
            self.handle.read_wait(self),
            (&*self.inner.borrow()).read(&mut buf)
        )?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Sends a prefix of `data` and returns how many bytes were accepted.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        retry_nonblocking!(
            self.handle.write_wait(self),
            (&*self.inner.borrow()).write(data)
        )
    }

    pub async fn send_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.send(data).await? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.borrow().peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.borrow().local_addr()
    }

    pub fn shutdown(&self, how: std::net::Shutdown) -> io::Result<()> {
        self.inner.borrow().shutdown(how)
    }
}

impl Watched for TcpStream {
    fn token(&self) -> Token {
        self.token
    }

    fn rearm(&self, registry: &Registry, interest: Interest) -> io::Result<()> {
        registry.reregister(&mut *self.inner.borrow_mut(), self.token, interest)
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.handle.forget_io(self.token);
        if let Err(e) = self.handle.registry().deregister(self.inner.get_mut()) {
            warn!(token = ?self.token, error = %e, "failed to deregister stream");
        }
    }
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream")
            .field("token", &self.token)
            .field("peer_addr", &self.peer_addr().ok())
            .finish()
    }
}
