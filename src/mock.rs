//! Scripted in-memory controller used by the unit tests.
use crate::transport::{Connector, Transport};
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    /// Reply bodies keyed by the command line without terminator.
    pub replies: HashMap<String, String>,
    /// Bytes handed out by non-blocking reads only.
    pub stale: Vec<u8>,
    /// Chunks handed out by blocking reads, one per read. An empty chunk is
    /// a round where nothing arrives.
    pub pending: VecDeque<Vec<u8>>,
    /// Blocking reads report EOF once `pending` runs dry.
    pub eof: bool,
    /// Fails the next blocking read.
    pub read_error: Option<ErrorKind>,
    pub written: Vec<String>,
    pub fail_writes: usize,
    pub refuse_connects: usize,
    pub fail_shutdown: bool,
    pub connects: usize,
    pub shutdowns: usize,
    pub nonblocking: bool,
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockDevice(Arc<Mutex<DeviceState>>);

impl MockDevice {
    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reply(self, command: &str, reply: &str) -> Self {
        self.state()
            .replies
            .insert(command.to_string(), reply.to_string());
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }
}

impl Connector for MockDevice {
    type Stream = MockStream;

    fn connect(&mut self, _host: &str, _port: u16) -> io::Result<MockStream> {
        let mut state = self.state();
        state.connects += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(ErrorKind::ConnectionRefused.into());
        }
        Ok(MockStream {
            device: self.clone(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockStream {
    device: MockDevice,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.nonblocking {
            if state.stale.is_empty() {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = state.stale.len().min(buf.len());
            buf[..n].copy_from_slice(&state.stale[..n]);
            state.stale.drain(..n);
            return Ok(n);
        }
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        match state.pending.pop_front() {
            Some(chunk) if !chunk.is_empty() => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.pending.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            _ if state.eof => Ok(0),
            _ => {
                let wait = state.read_timeout.unwrap_or(Duration::from_millis(10));
                drop(state);
                std::thread::sleep(wait);
                Err(ErrorKind::WouldBlock.into())
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(ErrorKind::BrokenPipe.into());
        }
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        if let Some(reply) = state.replies.get(&line).cloned() {
            state.pending.push_back(format!("{reply}\r\n").into_bytes());
        }
        state.written.push(line);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.device.state().nonblocking = nonblocking;
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.device.state().read_timeout = timeout;
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        let mut state = self.device.state();
        state.shutdowns += 1;
        if state.fail_shutdown {
            return Err(ErrorKind::NotConnected.into());
        }
        Ok(())
    }
}
