//! A library for controlling Lakeshore 224 and 336 temperature controllers over TCP.
//!
//! The controllers speak a line-oriented ASCII protocol: every command is a
//! verb with at most one parameter terminated by `\r\n`, and every query (a
//! verb containing `?`) is answered by a single `\r\n` terminated line.
//!
//! The crate is layered the same way the protocol is:
//!
//! 1.  [`protocol`]: command encoding, channel tables per model and the decode
//!     tables for heater codes. No I/O.
//! 2.  [`connection`]: owns the socket, drains stale bytes after connecting and
//!     frames replies under a bounded wait.
//! 3.  [`client`]: the thread-safe [`client::Lakeshore`] client, which serializes
//!     commands under a lock, reconnects and retries failed sends, and offers
//!     typed accessors for temperatures and heater outputs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lakeshore_lib::{client::Lakeshore, config::ControllerConfig, protocol::Model};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig {
//!         model: Model::M336,
//!         ..ControllerConfig::default()
//!     };
//!     let controller = Lakeshore::new(&config);
//!     controller.connect("192.168.1.50", 7777)?;
//!
//!     let temperature = controller.get_temperature("A")?;
//!     println!("Sensor A: {temperature:?}");
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod mock;

pub use error::{Error, Result};
