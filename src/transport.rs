//! Byte transport underneath the connection manager.
//!
//! [`Connector`] opens a [`Transport`]; the only production implementation is
//! [`TcpConnector`], which yields a plain blocking [`TcpStream`].
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A connected, blocking byte stream.
pub trait Transport: Read + Write + Send {
    /// Switches the stream between blocking and non-blocking reads.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Bounds how long a blocking read waits. `None` waits indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shuts down both directions of the stream.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Opens transports to a host and port.
pub trait Connector: Send {
    type Stream: Transport;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Opens TCP connections, optionally bounded by a connect timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// A zero timeout is treated as no timeout.
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout: connect_timeout.filter(|timeout| !timeout.is_zero()),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} did not resolve to any address"),
            )
        }))
    }
}
