//! Controller settings.
//!
//! With the `serde` feature enabled the settings deserialize from YAML, e.g.
//!
//! ```yaml
//! host: 192.168.1.50
//! port: 7777
//! model: "336"
//! opt3062: true
//! reply_timeout: 1s
//! poll_interval: 100ms
//! ```
use crate::connection::{DEFAULT_POLL_INTERVAL, DEFAULT_REPLY_TIMEOUT};
use crate::protocol as proto;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SEND_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    pub host: Option<String>,
    pub port: u16,
    pub model: proto::Model,
    /// Whether a 3062 option card is installed (model 336 only).
    pub opt3062: bool,
    /// Report temperatures in Celsius rather than Kelvin.
    pub celsius: bool,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub reply_timeout: Duration,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub poll_interval: Duration,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub connect_timeout: Duration,
    pub send_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: proto::DEFAULT_PORT,
            model: proto::Model::default(),
            opt3062: false,
            celsius: true,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_retries: DEFAULT_SEND_RETRIES,
        }
    }
}

#[cfg(feature = "serde")]
impl ControllerConfig {
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(reader)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = ControllerConfig::from_yaml_str(
            "host: 10.0.0.7\nmodel: \"224\"\nreply_timeout: 2s\npoll_interval: 50ms\n",
        )
        .unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.port, 7777);
        assert_eq!(config.model, proto::Model::M224);
        assert_eq!(config.reply_timeout, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.send_retries, 3);
        assert!(config.celsius);
    }

    #[test]
    fn rejects_unknown_model() {
        assert!(ControllerConfig::from_yaml_str("model: \"350\"\n").is_err());
    }
}
