//! Error type shared by the connection manager and the controller client.
use crate::protocol as proto;

/// Represents all possible errors that can occur while talking to a controller.
///
/// Only [`Error::RetriesExhausted`] is fatal: the link is presumed unusable and
/// the calling operation must stop. Everything else is recoverable and the
/// collaborator-facing accessors degrade it to an absent value.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    Protocol(#[from] proto::Error),

    #[error("Invalid connection parameters {host:?}:{port}")]
    InvalidAddress { host: String, port: u16 },

    #[error("No connection parameters set")]
    NoAddress,

    #[error("Connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Disconnection error: {0}")]
    Disconnect(#[source] std::io::Error),

    /// Transport error while sending or receiving.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unable to successfully issue command {command:?} after {attempts} attempts")]
    RetriesExhausted { command: String, attempts: u32 },

    #[error("Sensor {0:?} is not available")]
    UnknownSensor(String),

    #[error("Heater {0:?} is not available")]
    UnknownOutput(String),

    #[error("Item {0:?} is not available")]
    UnknownItem(String),

    #[error("Heater is not available with model {0}")]
    HeaterUnsupported(proto::Model),

    #[error("Empty reply to {0:?}")]
    EmptyReply(String),
}

impl Error {
    /// Whether the error must abort the calling operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }
}

/// The result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;
