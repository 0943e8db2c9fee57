use anyhow::{bail, Context, Result};
use lakeshore_lib::{client::Lakeshore, config::ControllerConfig, transport::Connector};
use log::*;
use serde::Deserialize;
use std::fs::File;
use std::time::Duration;

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Channels polled in daemon mode when none are given on the commandline.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        debug!("Loading config file from {path:?}");
        let file = File::open(path).with_context(|| format!("Cannot open config file {path}"))?;
        serde_yaml::from_reader(file).with_context(|| format!("Cannot parse config file {path}"))
    }
}

/// Polls `channels` forever, printing one line per channel and round.
///
/// Returns only when the link is unusable.
pub fn run_daemon<C: Connector>(
    controller: &Lakeshore<C>,
    channels: &[String],
    poll_interval: &Duration,
) -> Result<()> {
    if channels.is_empty() {
        bail!("No channels to poll");
    }
    let table = controller.channels();
    for channel in channels {
        if table.sensor(channel).is_none() && table.output(channel).is_none() {
            bail!("Unknown channel {channel}");
        }
    }

    let unit = if controller.is_celsius() { "°C" } else { "K" };
    loop {
        for channel in channels {
            let value = controller
                .get_atomic_value(channel)
                .with_context(|| format!("Cannot read channel {channel}"))?;
            match (value, table.sensor(channel)) {
                (Some(value), Some(_)) => println!("{channel}: {value} {unit}"),
                (Some(value), None) => println!("{channel}: {value} %"),
                (None, _) => println!("{channel}: no data"),
            }
        }
        trace!("Waiting {poll_interval:?}");
        std::thread::sleep(*poll_interval);
    }
}
