//! Thread-safe client for a Lakeshore 224/336 controller.
//!
//! [`Lakeshore`] wraps a [`Connection`] in a mutex so that a command and its
//! reply always travel the wire as one unit, even when the client is shared
//! between threads behind an `Arc`.
//!
//! Two flavours of accessor exist. The `read_*` methods return every failure
//! as a typed [`Error`]. The `get_*` methods are meant for pollers: they log
//! and report recoverable failures and return `Ok(None)`, so only a fatal
//! [`Error::RetriesExhausted`] reaches the caller.
//!
//! ## Example
//!
//! ```no_run
//! use lakeshore_lib::{client::Lakeshore, config::ControllerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = Lakeshore::new(&ControllerConfig::default());
//!     controller.connect("192.168.1.50", 7777)?;
//!     controller.initialize(true)?;
//!
//!     if let Some(temperature) = controller.get_atomic_value("A")? {
//!         println!("Sensor A: {temperature} °C");
//!     }
//!     controller.disconnect()?;
//!     Ok(())
//! }
//! ```

use crate::config::ControllerConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol as proto;
use crate::transport::{Connector, TcpConnector};
use log::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Status code published for informational events.
pub const STATUS_INFO: i32 = 0;
/// Status code published for reported, recoverable errors.
pub const STATUS_ERROR: i32 = -1;

/// Receives `(code, message)` status updates.
pub type StatusCallback = Box<dyn Fn(i32, &str) + Send + Sync>;

/// Coarse link health, updated after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Ready,
    Connecting,
    NotConnected,
    Unresponsive,
    Disconnected,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ready => "ready",
            Self::Connecting => "connecting",
            Self::NotConnected => "not connected",
            Self::Unresponsive => "unresponsive",
            Self::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// Cached configuration of one heater output, filled by [`Lakeshore::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterOutput {
    pub name: &'static str,
    pub resistance: Option<proto::HeaterResistance>,
    /// Max current in amps.
    pub max_current: f64,
    /// User max current in amps.
    pub user_max_current: f64,
    pub display: Option<proto::HeaterDisplay>,
    /// `None` while the status is unknown.
    pub status: Option<proto::HeaterStatus>,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl HeaterOutput {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            resistance: None,
            max_current: 0.0,
            user_max_current: 0.0,
            display: None,
            status: None,
            p: 0.0,
            i: 0.0,
            d: 0.0,
        }
    }
}

impl fmt::Display for HeaterOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heater {}: ", self.name)?;
        match self.resistance {
            Some(resistance) => write!(f, "{resistance}")?,
            None => write!(f, "unknown resistance")?,
        }
        write!(
            f,
            ", max current {} A, user max current {} A",
            self.max_current, self.user_max_current
        )?;
        if let Some(display) = self.display {
            write!(f, ", display {display}")?;
        }
        match self.status {
            Some(status) => write!(f, ", status {status}")?,
            None => write!(f, ", status unknown")?,
        }
        write!(f, ", P {} I {} D {}", self.p, self.i, self.d)
    }
}

#[derive(Debug)]
struct DeviceState {
    status: ControllerStatus,
    revision: Option<String>,
    initialized: bool,
    outputs: Vec<HeaterOutput>,
}

/// Driver for one Lakeshore 224 or 336 controller.
///
/// All methods take `&self`, so one client can be shared between threads.
/// Each command holds the link for its full send/reply round trip.
pub struct Lakeshore<C: Connector = TcpConnector> {
    model: proto::Model,
    channels: proto::ChannelTable,
    send_retries: u32,
    link: Mutex<Connection<C>>,
    celsius: AtomicBool,
    state: Mutex<DeviceState>,
    status_callback: Option<StatusCallback>,
}

impl Lakeshore<TcpConnector> {
    /// Creates a TCP client. No connection is attempted yet.
    pub fn new(config: &ControllerConfig) -> Self {
        Self::with_connector(config, TcpConnector::new(Some(config.connect_timeout)))
    }
}

impl<C: Connector> Lakeshore<C> {
    /// Creates a client on top of any [`Connector`].
    ///
    /// A host in `config` is remembered so [`Self::reconnect`] and the first
    /// command can connect without an explicit [`Self::connect`].
    pub fn with_connector(config: &ControllerConfig, connector: C) -> Self {
        let channels = proto::ChannelTable::new(config.model, config.opt3062);
        let mut link = Connection::new(connector);
        link.set_timeouts(config.reply_timeout, config.poll_interval);
        if let Some(host) = &config.host {
            if let Err(err) = link.set_address(host, config.port) {
                warn!("Ignoring configured address: {err}");
            }
        }
        Self {
            model: config.model,
            channels,
            send_retries: config.send_retries.max(1),
            link: Mutex::new(link),
            celsius: AtomicBool::new(config.celsius),
            state: Mutex::new(DeviceState {
                status: ControllerStatus::NotConnected,
                revision: None,
                initialized: false,
                outputs: channels.outputs().map(HeaterOutput::new).collect(),
            }),
            status_callback: None,
        }
    }

    /// Installs a callback that receives `(code, message)` status updates.
    pub fn with_status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, &str) + Send + Sync + 'static,
    {
        self.status_callback = Some(Box::new(callback));
        self
    }

    pub fn model(&self) -> proto::Model {
        self.model
    }

    pub fn channels(&self) -> &proto::ChannelTable {
        &self.channels
    }

    fn lock_link(&self) -> MutexGuard<'_, Connection<C>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, code: i32, message: &str) {
        if let Some(callback) = &self.status_callback {
            callback(code, message);
        }
    }

    fn set_status(&self, status: ControllerStatus) {
        self.lock_state().status = status;
    }

    pub fn status(&self) -> ControllerStatus {
        self.lock_state().status
    }

    pub fn is_connected(&self) -> bool {
        self.lock_link().is_connected()
    }

    /// Identity string read by the last [`Self::initialize`].
    pub fn revision(&self) -> Option<String> {
        self.lock_state().revision.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Snapshot of the cached heater outputs. Empty on the model 224.
    pub fn heater_outputs(&self) -> Vec<HeaterOutput> {
        self.lock_state().outputs.clone()
    }

    pub fn set_celsius(&self) {
        self.celsius.store(true, Ordering::Relaxed);
    }

    pub fn set_kelvin(&self) {
        self.celsius.store(false, Ordering::Relaxed);
    }

    pub fn is_celsius(&self) -> bool {
        self.celsius.load(Ordering::Relaxed)
    }

    /// Stores connection parameters without connecting.
    pub fn set_connection(&self, host: &str, port: u16) -> Result<()> {
        self.lock_link().set_address(host, port)
    }

    /// Connects to `host:port`; a no-op while already connected.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        let result = self.lock_link().connect(host, port);
        self.after_connect(&result);
        result
    }

    /// Connects to the last known host and port.
    pub fn reconnect(&self) -> Result<()> {
        let result = self.lock_link().reconnect();
        self.after_connect(&result);
        result
    }

    fn after_connect(&self, result: &Result<()>) {
        match result {
            Ok(()) => self.set_status(ControllerStatus::Ready),
            Err(err) => {
                self.set_status(ControllerStatus::NotConnected);
                self.report(STATUS_ERROR, &err.to_string());
            }
        }
    }

    /// Closes the connection. Calling it while disconnected only logs a warning.
    pub fn disconnect(&self) -> Result<()> {
        let result = self.lock_link().disconnect();
        if let Err(err) = &result {
            self.report(STATUS_ERROR, &err.to_string());
        }
        self.set_status(ControllerStatus::Disconnected);
        result
    }

    /// Issues `verb[ param]` and returns the reply for queries, `""` otherwise.
    ///
    /// The link lock is held for the send and the reply read, and released on
    /// every return path including [`Error::RetriesExhausted`]. Status events
    /// reach the callback only after the lock is released.
    pub fn command(&self, verb: &str, param: Option<&str>) -> Result<String> {
        let command = proto::Command::new(verb, param);
        let mut events = Vec::new();
        let result = {
            let mut link = self.lock_link();
            let sent = self.send_command(&mut link, &command, &mut events);
            let success = sent.is_ok();
            let result = match sent {
                Ok(()) if command.is_query() => link.read_reply(),
                Ok(()) => Ok(String::new()),
                Err(err) => Err(err),
            };
            self.check_status(link.is_connected(), success);
            result
        };
        for (code, message) in events {
            self.report(code, &message);
        }
        result
    }

    fn check_status(&self, connected: bool, success: bool) {
        let status = if !connected {
            ControllerStatus::NotConnected
        } else if !success {
            ControllerStatus::Unresponsive
        } else {
            ControllerStatus::Ready
        };
        self.set_status(status);
    }

    fn send_command(
        &self,
        link: &mut Connection<C>,
        command: &proto::Command,
        events: &mut Vec<(i32, String)>,
    ) -> Result<()> {
        if !link.is_connected() {
            self.set_status(ControllerStatus::Connecting);
            if let Err(err) = link.reconnect() {
                debug!("Connecting before send failed: {err}");
            }
        }

        let bytes = command.encode();
        let mut retries = self.send_retries;
        while retries > 0 {
            debug!("Sending command {:?}", command.to_string().trim_end());
            match link.send(&bytes) {
                Ok(()) => {
                    events.push((STATUS_INFO, format!("command sent: {}", command.verb())));
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "Failed to send command ({err}), re-opening socket, {retries} retries remaining"
                    );
                    if let Err(err) = link.disconnect() {
                        debug!("Ignoring disconnect failure during retry: {err}");
                    }
                    if let Err(err) = link.reconnect() {
                        error!("Could not reconnect to controller, aborting");
                        events.push((STATUS_ERROR, err.to_string()));
                        return Err(err);
                    }
                    retries -= 1;
                }
            }
        }
        error!("Failed to send command {:?}", command.verb());
        Err(Error::RetriesExhausted {
            command: command.to_string().trim_end().to_string(),
            attempts: self.send_retries,
        })
    }

    fn sensor(&self, name: &str) -> Result<&'static str> {
        self.channels
            .sensor(name)
            .ok_or_else(|| Error::UnknownSensor(name.to_string()))
    }

    fn heater(&self, name: &str) -> Result<&'static str> {
        if !self.model.has_heaters() {
            return Err(Error::HeaterUnsupported(self.model));
        }
        self.channels
            .output(name)
            .ok_or_else(|| Error::UnknownOutput(name.to_string()))
    }

    /// Logs and reports recoverable errors as an absent value.
    fn degrade<T>(&self, result: Result<Option<T>>) -> Result<Option<T>> {
        match result {
            Err(err) if !err.is_fatal() => {
                error!("{err}");
                self.report(STATUS_ERROR, &err.to_string());
                Ok(None)
            }
            other => other,
        }
    }

    /// Reads the identity string (`*idn?`).
    pub fn identify(&self) -> Result<String> {
        self.command(proto::IDENTIFY, None)
    }

    /// Reads a sensor in the selected unit. An empty reply yields `None`.
    pub fn read_temperature(&self, sensor: &str) -> Result<Option<f64>> {
        let sensor = self.sensor(sensor)?;
        let verb = if self.is_celsius() {
            proto::CELSIUS_READING
        } else {
            proto::KELVIN_READING
        };
        let reply = self.command(verb, Some(sensor))?;
        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(proto::parse_float(&reply)?))
    }

    pub fn read_heater_settings(&self, output: &str) -> Result<Option<proto::HeaterSettings>> {
        let output = self.heater(output)?;
        let reply = self.command(proto::HEATER_SETUP, Some(output))?;
        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(proto::HeaterSettings::decode(&reply)?))
    }

    /// Reads the PID parameters, returned as `(I, D, P)`; see [`proto::decode_pid`].
    pub fn read_heater_pid(&self, output: &str) -> Result<Option<(f64, f64, f64)>> {
        let output = self.heater(output)?;
        let reply = self.command(proto::HEATER_PID, Some(output))?;
        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(proto::decode_pid(&reply)?))
    }

    pub fn read_heater_status(&self, output: &str) -> Result<Option<proto::HeaterStatus>> {
        let output = self.heater(output)?;
        let reply = self.command(proto::HEATER_STATUS, Some(output))?;
        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(proto::HeaterStatus::decode(&reply)?))
    }

    /// Reads the heater output level. Unlike the other readings an empty
    /// reply is an error here.
    pub fn read_heater_output(&self, output: &str) -> Result<f64> {
        let output = self.heater(output)?;
        let reply = self.command(proto::HEATER_OUTPUT, Some(output))?;
        if reply.is_empty() {
            return Err(Error::EmptyReply(format!("{} {output}", proto::HEATER_OUTPUT)));
        }
        Ok(proto::parse_float(&reply)?)
    }

    pub fn get_temperature(&self, sensor: &str) -> Result<Option<f64>> {
        self.degrade(self.read_temperature(sensor))
    }

    pub fn get_heater_settings(&self, output: &str) -> Result<Option<proto::HeaterSettings>> {
        self.degrade(self.read_heater_settings(output))
    }

    pub fn get_heater_pid(&self, output: &str) -> Result<Option<(f64, f64, f64)>> {
        self.degrade(self.read_heater_pid(output))
    }

    /// `Ok(None)` means the status is unknown.
    pub fn get_heater_status(&self, output: &str) -> Result<Option<proto::HeaterStatus>> {
        self.degrade(self.read_heater_status(output))
    }

    pub fn get_heater_output(&self, output: &str) -> Result<Option<f64>> {
        self.degrade(self.read_heater_output(output).map(Some))
    }

    /// Reads whichever value `item` names: a sensor temperature or a heater
    /// output level.
    pub fn get_atomic_value(&self, item: &str) -> Result<Option<f64>> {
        if self.channels.sensor(item).is_some() {
            self.get_temperature(item)
        } else if self.channels.output(item).is_some() {
            self.get_heater_output(item)
        } else {
            self.degrade(Err(Error::UnknownItem(item.to_string())))
        }
    }

    /// Reads the identity and, on heater-capable models, the settings, status
    /// and PID of every output. Per-output failures are logged and leave that
    /// output's fields at their defaults.
    pub fn initialize(&self, celsius: bool) -> Result<()> {
        let revision = match self.identify() {
            Ok(revision) => Some(revision),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!("Cannot read identity: {err}");
                None
            }
        };
        self.lock_state().revision = revision;

        if self.model.has_heaters() {
            for name in self.channels.outputs() {
                let output = self.read_output_state(name)?;
                let mut state = self.lock_state();
                if let Some(slot) = state.outputs.iter_mut().find(|slot| slot.name == name) {
                    *slot = output;
                }
            }
        }

        if celsius {
            self.set_celsius();
        } else {
            self.set_kelvin();
        }
        self.lock_state().initialized = true;
        Ok(())
    }

    fn read_output_state(&self, name: &'static str) -> Result<HeaterOutput> {
        let mut output = HeaterOutput::new(name);
        match self.get_heater_settings(name)? {
            Some(settings) => {
                output.resistance = Some(settings.resistance);
                output.max_current = settings.max_current.amps();
                output.user_max_current = settings.user_max_current;
                output.display = Some(settings.display);
            }
            None => warn!("Unable to get settings for htr {name}"),
        }

        output.status = self.get_heater_status(name)?;

        // Assigned positionally from the (I, D, P) triple.
        match self.get_heater_pid(name)? {
            Some((p, i, d)) => {
                output.p = p;
                output.i = i;
                output.d = d;
            }
            None => warn!("PID not set for htr {name}"),
        }
        Ok(output)
    }
}
