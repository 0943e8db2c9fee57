//! Connection manager and reply reader.
//!
//! [`Connection`] owns at most one live transport. It knows the last host and
//! port it was asked to use so the dispatcher can re-establish the link, drains
//! stale bytes after every fresh connect and frames replies on
//! [`proto::TERMINATOR`] under a bounded wait.
use crate::error::{Error, Result};
use crate::protocol as proto;
use crate::transport::{Connector, Transport};
use log::*;
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Default wall-clock bound for a single reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);
/// Default wait per receive round while a reply is incomplete.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 1024;
const MIN_READ_WAIT: Duration = Duration::from_millis(1);

pub struct Connection<C: Connector> {
    connector: C,
    stream: Option<C::Stream>,
    host: Option<String>,
    port: u16,
    reply_timeout: Duration,
    poll_interval: Duration,
}

impl<C: Connector> Connection<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            stream: None,
            host: None,
            port: proto::DEFAULT_PORT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn set_timeouts(&mut self, reply_timeout: Duration, poll_interval: Duration) {
        self.reply_timeout = reply_timeout;
        self.poll_interval = poll_interval.max(MIN_READ_WAIT);
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Last host and port handed to [`Self::set_address`] or [`Self::connect`].
    pub fn address(&self) -> Option<(&str, u16)> {
        self.host.as_deref().map(|host| (host, self.port))
    }

    /// Validates and stores connection parameters without connecting.
    pub fn set_address(&mut self, host: &str, port: u16) -> Result<()> {
        let host = host.trim();
        if host.is_empty() || port == 0 {
            error!("Invalid connection parameters: {host:?}:{port}");
            return Err(Error::InvalidAddress {
                host: host.to_string(),
                port,
            });
        }
        self.host = Some(host.to_string());
        self.port = port;
        Ok(())
    }

    /// Connects to `host:port`. Connecting while connected is a no-op.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.set_address(host, port)?;
        self.open()
    }

    /// Connects to the last known host and port.
    pub fn reconnect(&mut self) -> Result<()> {
        if self.host.is_none() {
            error!("No connection parameters set");
            return Err(Error::NoAddress);
        }
        self.open()
    }

    fn open(&mut self) -> Result<()> {
        let Some(host) = self.host.as_deref() else {
            return Err(Error::NoAddress);
        };
        if self.stream.is_some() {
            debug!("Already connected");
            return Ok(());
        }
        match self.connector.connect(host, self.port) {
            Ok(stream) => {
                info!("Connected to {host}:{}", self.port);
                self.stream = Some(stream);
            }
            Err(source) => {
                error!("Connection error: {source}");
                return Err(Error::Connect {
                    address: format!("{host}:{}", self.port),
                    source,
                });
            }
        }
        if let Err(err) = self.drain() {
            warn!("Cannot clear socket: {err}");
        }
        Ok(())
    }

    /// Discards whatever a previous session left unread on the socket.
    fn drain(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        stream.set_nonblocking(true)?;
        let mut buf = [0u8; READ_CHUNK];
        let mut discarded = 0;
        let result = loop {
            match stream.read(&mut buf) {
                Ok(0) => break Ok(discarded),
                Ok(n) => discarded += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(discarded),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        stream.set_nonblocking(false)?;
        if discarded > 0 {
            debug!("Discarded {discarded} stale bytes");
        }
        result
    }

    /// Shuts the transport down. The handle is dropped even when shutdown fails.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            warn!("Already disconnected");
            return Ok(());
        };
        match stream.shutdown() {
            Ok(()) => {
                info!("Disconnected controller");
                Ok(())
            }
            Err(err) => {
                error!("Disconnection error: {err}");
                Err(Error::Disconnect(err))
            }
        }
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Drops the stream after a read-side transport failure.
    fn tear_down(&mut self, reason: &str) {
        if let Some(stream) = self.stream.take() {
            warn!("{reason}, dropping connection");
            if let Err(err) = stream.shutdown() {
                debug!("Shutdown after transport failure: {err}");
            }
        }
    }

    /// Reads one reply frame.
    ///
    /// Keeps receiving until the terminator shows up or the reply timeout
    /// elapses, whichever comes first. Whatever arrived is returned trimmed,
    /// so a silent device yields an empty string rather than an error.
    /// Peer EOF and read errors other than timeouts drop the connection.
    pub fn read_reply(&mut self) -> Result<String> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        let deadline = Instant::now() + self.reply_timeout;
        let mut reply: Vec<u8> = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        let end = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            stream.set_read_timeout(Some(self.poll_interval.min(remaining).max(MIN_READ_WAIT)))?;
            match stream.read(&mut buf) {
                Ok(0) => break ReadEnd::Closed,
                Ok(n) => {
                    reply.extend_from_slice(&buf[..n]);
                    trace!("reply: {:?}", String::from_utf8_lossy(&reply));
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(err) => break ReadEnd::Failed(err),
            }
            if let Some(end) = find_terminator(&reply) {
                break ReadEnd::Frame(end);
            }
            if Instant::now() >= deadline {
                debug!("Reply timed out after {:?}", self.reply_timeout);
                break ReadEnd::TimedOut;
            }
        };
        match end {
            ReadEnd::Closed => self.tear_down("Controller closed the connection while replying"),
            ReadEnd::Failed(err) => {
                self.tear_down(&format!("Receive failed ({err})"));
                return Err(err.into());
            }
            ReadEnd::Frame(end) => {
                stream.set_read_timeout(None)?;
                let trailing = reply.len() - end - proto::TERMINATOR.len();
                if trailing > 0 {
                    debug!("Dropping {trailing} bytes after the reply terminator");
                }
                reply.truncate(end);
            }
            ReadEnd::TimedOut => stream.set_read_timeout(None)?,
        }
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

enum ReadEnd {
    Frame(usize),
    TimedOut,
    Closed,
    Failed(io::Error),
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    let terminator = proto::TERMINATOR.as_bytes();
    bytes
        .windows(terminator.len())
        .position(|window| window == terminator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use assert_matches::assert_matches;

    fn connected(device: &MockDevice) -> Connection<MockDevice> {
        let mut connection = Connection::new(device.clone());
        connection.set_timeouts(Duration::from_millis(300), Duration::from_millis(10));
        connection.connect("lakeshore", 7777).unwrap();
        connection
    }

    #[test]
    fn rejects_invalid_parameters() {
        let device = MockDevice::default();
        let mut connection = Connection::new(device.clone());
        assert_matches!(connection.connect("", 7777), Err(Error::InvalidAddress { .. }));
        assert_matches!(connection.connect("host", 0), Err(Error::InvalidAddress { .. }));
        assert_matches!(connection.reconnect(), Err(Error::NoAddress));
        assert_eq!(device.state().connects, 0);
    }

    #[test]
    fn refused_connect_stays_disconnected() {
        let device = MockDevice::default();
        device.state().refuse_connects = 1;
        let mut connection = Connection::new(device.clone());
        assert_matches!(connection.connect("lakeshore", 7777), Err(Error::Connect { .. }));
        assert!(!connection.is_connected());
        assert_eq!(connection.address(), Some(("lakeshore", 7777)));

        connection.reconnect().unwrap();
        assert!(connection.is_connected());
    }

    #[test]
    fn connect_is_idempotent() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        connection.connect("lakeshore", 7777).unwrap();
        assert!(connection.is_connected());
        assert_eq!(device.state().connects, 1);
    }

    #[test]
    fn connect_drains_stale_bytes() {
        let device = MockDevice::default();
        device.state().stale = b"+012.50\r\n+013.00\r\n".to_vec();
        let mut connection = connected(&device);
        assert!(device.state().stale.is_empty());
        assert!(!device.state().nonblocking);

        device.state().pending.push_back(b"LSCI,MODEL336\r\n".to_vec());
        assert_eq!(connection.read_reply().unwrap(), "LSCI,MODEL336");
    }

    #[test]
    fn disconnect_twice() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        connection.disconnect().unwrap();
        assert!(!connection.is_connected());
        connection.disconnect().unwrap();
        assert!(!connection.is_connected());
        assert_eq!(device.state().shutdowns, 1);
    }

    #[test]
    fn failed_shutdown_still_disconnects() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        device.state().fail_shutdown = true;
        assert_matches!(connection.disconnect(), Err(Error::Disconnect(..)));
        assert!(!connection.is_connected());
    }

    #[test]
    fn reply_independent_of_chunking() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        for chunks in [
            vec!["+273.15\r\n"],
            vec!["+27", "3.1", "5\r", "\n"],
            vec!["+273.15", "", "", "\r\n"],
            vec!["+", "2", "7", "3", ".", "1", "5", "\r", "\n"],
        ] {
            {
                let mut state = device.state();
                for chunk in chunks {
                    state.pending.push_back(chunk.as_bytes().to_vec());
                }
            }
            assert_eq!(connection.read_reply().unwrap(), "+273.15");
        }
    }

    #[test]
    fn reply_drops_bytes_after_terminator() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        device.state().pending.push_back(b"0\r\n1\r\n".to_vec());
        assert_eq!(connection.read_reply().unwrap(), "0");
    }

    #[test]
    fn reply_times_out_with_partial_data() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        device.state().pending.push_back(b"+27".to_vec());

        let start = Instant::now();
        assert_eq!(connection.read_reply().unwrap(), "+27");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[test]
    fn silent_device_yields_empty_reply() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        let start = Instant::now();
        assert_eq!(connection.read_reply().unwrap(), "");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn peer_eof_drops_the_stream() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        {
            let mut state = device.state();
            state.pending.push_back(b"+27".to_vec());
            state.eof = true;
        }
        assert_eq!(connection.read_reply().unwrap(), "+27");
        assert!(!connection.is_connected());
        assert_eq!(device.state().shutdowns, 1);

        connection.reconnect().unwrap();
        assert!(connection.is_connected());
        assert_eq!(device.state().connects, 2);
    }

    #[test]
    fn read_error_drops_the_stream() {
        let device = MockDevice::default();
        let mut connection = connected(&device);
        device.state().read_error = Some(ErrorKind::ConnectionReset);
        assert_matches!(
            connection.read_reply(),
            Err(Error::Io(err)) if err.kind() == ErrorKind::ConnectionReset
        );
        assert!(!connection.is_connected());
        assert_matches!(connection.read_reply(), Err(Error::Io(err)) if err.kind() == ErrorKind::NotConnected);
    }

    #[test]
    fn send_requires_connection() {
        let device = MockDevice::default();
        let mut connection = Connection::new(device);
        assert_matches!(connection.send(b"*idn?\r\n"), Err(Error::Io(err)) if err.kind() == ErrorKind::NotConnected);
        assert_matches!(connection.read_reply(), Err(Error::Io(..)));
    }
}
