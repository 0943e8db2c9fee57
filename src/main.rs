//! Lakeshore Controller CLI
//!
//! A command-line interface (CLI) application for reading Lakeshore 224/336
//! temperature controllers over their TCP interface.
//!
//! This tool allows users to:
//! - Read the identity string of the controller.
//! - Read a single sensor temperature or heater output level.
//! - Read every channel of the configured model at once.
//! - Read heater settings, status and PID values.
//! - Run in a continuous daemon mode to poll channels and print them to the console.
//!
//! The CLI leverages the `lakeshore_lib` crate for protocol definitions and client operations.

use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use lakeshore_lib::client::Lakeshore;
use log::*;
use std::panic;

mod commandline;
mod daemon;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

fn print_channel(controller: &Lakeshore, channel: &str) -> Result<()> {
    let value = controller
        .get_atomic_value(channel)
        .with_context(|| format!("Cannot read channel {channel}"))?;
    match value {
        Some(value) => println!("{channel}: {value}"),
        None => println!("{channel}: no data"),
    }
    Ok(())
}

fn print_heaters(controller: &Lakeshore, output: Option<&str>) -> Result<()> {
    if !controller.model().has_heaters() {
        bail!("Model {} has no heater outputs", controller.model());
    }
    if let Some(output) = output {
        if controller.channels().output(output).is_none() {
            bail!("Heater {output} is not available");
        }
    }
    controller
        .initialize(controller.is_celsius())
        .with_context(|| "Cannot read heater state")?;
    for heater in controller.heater_outputs() {
        if output.is_some_and(|output| output != heater.name) {
            continue;
        }
        println!("{heater}");
        print_channel(controller, heater.name)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Lakeshore CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Merge the configuration file with commandline overrides
    let mut config = match &args.config {
        Some(path) => daemon::AppConfig::load(path)?,
        None => daemon::AppConfig::default(),
    };
    if let Some(address) = &args.address {
        let (host, port) = commandline::parse_address(address)?;
        config.controller.host = Some(host);
        config.controller.port = port;
    }
    if let Some(model) = args.model {
        config.controller.model = model;
    }
    if args.opt3062 {
        config.controller.opt3062 = true;
    }
    if args.kelvin {
        config.controller.celsius = false;
    }
    if let Some(timeout) = args.timeout {
        config.controller.reply_timeout = timeout;
    }
    let Some(host) = config.controller.host.clone() else {
        bail!("No controller address given, use --address or the config file");
    };

    // 3. Connect
    let controller = Lakeshore::new(&config.controller);
    info!("Attempting to connect via TCP to {host}:{}...", config.controller.port);
    controller
        .connect(&host, config.controller.port)
        .with_context(|| format!("Failed to connect to controller at {host}:{}", config.controller.port))?;

    // 4. Execute the command
    let result = match &args.command {
        commandline::CliCommands::Daemon {
            poll_interval,
            channels,
        } => {
            let channels = if channels.is_empty() {
                &config.channels
            } else {
                channels
            };
            info!("Starting daemon mode: channels={channels:?}, interval={poll_interval:?}");
            daemon::run_daemon(&controller, channels, poll_interval)
        }
        commandline::CliCommands::Identify => {
            info!("Executing: Identify");
            controller
                .identify()
                .map(|identity| println!("Identity: {identity}"))
                .with_context(|| "Cannot read identity")
        }
        commandline::CliCommands::Read { channel } => {
            info!("Executing: Read {channel}");
            print_channel(&controller, channel)
        }
        commandline::CliCommands::ReadAll => {
            info!("Executing: Read All Channels");
            let table = *controller.channels();
            table
                .sensors()
                .chain(table.outputs())
                .try_for_each(|channel| print_channel(&controller, channel))
        }
        commandline::CliCommands::Heater { output } => {
            info!("Executing: Read Heater State");
            print_heaters(&controller, output.as_deref())
        }
    };

    if let Err(err) = controller.disconnect() {
        warn!("{err}");
    }
    result
}
