use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use lakeshore_lib::protocol as proto;
use std::time::Duration;

fn parse_model(s: &str) -> Result<proto::Model, String> {
    s.parse::<proto::Model>().map_err(|e| e.to_string())
}

/// Splits `host[:port]`, falling back to the controller's default port.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in address '{address}'"))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((address.to_string(), proto::DEFAULT_PORT)),
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: continuously poll channels at a specified interval
    /// and print their values to the console.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for polling (e.g., "10s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "10sec")]
        poll_interval: Duration,

        /// Channels to poll, sensors (e.g. "A", "D3") or heater outputs ("1", "2").
        /// Defaults to the channels of the configuration file.
        #[arg(verbatim_doc_comment)]
        channels: Vec<String>,
    },

    /// Read and display the identity string of the controller.
    Identify,

    /// Read and display one sensor temperature or heater output level.
    Read {
        /// Sensor name or heater output number.
        channel: String,
    },

    /// Read and display every sensor and heater output of the model.
    ReadAll,

    /// Read and display heater settings, status and PID values.
    Heater {
        /// Heater output number (1 or 2). All outputs when omitted.
        output: Option<String>,
    },
}

const fn about_text() -> &'static str {
    "Lakeshore CLI - Read temperatures and heater state from Lakeshore 224/336 controllers via TCP."
}

#[derive(Parser, Debug)]
#[command(name="lakectl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// YAML configuration file with controller settings and daemon channels.
    #[arg(global = true, short, long)]
    pub config: Option<String>,

    /// Controller address as "host" or "host:port".
    /// Overrides the host of the configuration file.
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub address: Option<String>,

    /// Controller model: 336 or 224.
    #[arg(global = true, long, value_parser = parse_model)]
    pub model: Option<proto::Model>,

    /// A 3062 option card is installed (model 336 only).
    #[arg(global = true, long)]
    pub opt3062: bool,

    /// Report temperatures in Kelvin instead of Celsius.
    #[arg(global = true, long)]
    pub kelvin: bool,

    /// Wall-clock bound for a single reply.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    #[command(subcommand)]
    pub command: CliCommands,
}
