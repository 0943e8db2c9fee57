//! Wire-level definitions for the Lakeshore 224/336 ASCII protocol.
//!
//! This module holds everything that does not touch a socket: command
//! encoding, the reply decode tables for heater codes and the channel tables
//! for both controller models. All decoders reject codes that are not part of
//! their table with [`Error::UnknownCode`], which is kept distinct from an
//! empty reply (callers see an empty reply as "no data").
use std::fmt;
use std::num::ParseFloatError;
use std::str::FromStr;

/// Byte sequence terminating every command and reply frame.
pub const TERMINATOR: &str = "\r\n";

/// Marker identifying a query verb; only queries elicit a reply.
pub const QUERY_MARKER: char = '?';

/// Default TCP port of the controller's ethernet interface.
pub const DEFAULT_PORT: u16 = 7777;

/// Identity string: manufacturer, model, serial number and firmware.
pub const IDENTIFY: &str = "*idn?";
/// Sensor reading in Celsius, takes the sensor name.
pub const CELSIUS_READING: &str = "crdg?";
/// Sensor reading in Kelvin, takes the sensor name.
pub const KELVIN_READING: &str = "krdg?";
/// Heater setup `resistance,max current,max user current,display`, takes the output number.
pub const HEATER_SETUP: &str = "htrset?";
/// Control loop `P,I,D`, takes the output number.
pub const HEATER_PID: &str = "pid?";
/// Heater error code, takes the output number.
pub const HEATER_STATUS: &str = "htrst?";
/// Heater output level in percent, takes the output number.
pub const HEATER_OUTPUT: &str = "htr?";

/// Errors raised while decoding a reply.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unmapped {table} code {code:?}")]
    UnknownCode { table: &'static str, code: String },
    #[error("Expected {expected} comma separated fields, got {found} in {reply:?}")]
    FieldCount {
        expected: usize,
        found: usize,
        reply: String,
    },
    #[error("Cannot parse {value:?} as a number: {source}")]
    ParseFloat {
        value: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("Unknown controller model {0:?}")]
    UnknownModel(String),
}

/// A single command as it goes onto the wire: a verb and at most one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    verb: &'a str,
    param: Option<&'a str>,
}

impl<'a> Command<'a> {
    pub fn new(verb: &'a str, param: Option<&'a str>) -> Self {
        Self { verb, param }
    }

    pub fn verb(&self) -> &'a str {
        self.verb
    }

    /// Whether the device answers this command with a reply line.
    pub fn is_query(&self) -> bool {
        self.verb.contains(QUERY_MARKER)
    }

    /// Encodes the command as `verb[ param]\r\n`.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param {
            Some(param) => write!(f, "{} {}{}", self.verb, param, TERMINATOR),
            None => write!(f, "{}{}", self.verb, TERMINATOR),
        }
    }
}

/// Controller hardware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Model {
    /// Model 336: four inputs (eight with a 3062 board) and two heater outputs.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "336"))]
    M336,
    /// Model 224: twelve inputs, no heaters.
    #[cfg_attr(feature = "serde", serde(rename = "224"))]
    M224,
}

impl Model {
    pub fn has_heaters(&self) -> bool {
        matches!(self, Model::M336)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::M336 => write!(f, "336"),
            Model::M224 => write!(f, "224"),
        }
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(['m', 'M']) {
            "336" => Ok(Model::M336),
            "224" => Ok(Model::M224),
            _ => Err(Error::UnknownModel(s.to_string())),
        }
    }
}

const SENSORS_336: &[(&str, u8)] = &[("A", 1), ("B", 2), ("C", 3), ("D", 4)];
const SENSORS_336_3062: &[(&str, u8)] = &[
    ("A", 1),
    ("B", 2),
    ("C", 3),
    ("D1", 4),
    ("D2", 5),
    ("D3", 6),
    ("D4", 7),
    ("D5", 8),
];
const SENSORS_224: &[(&str, u8)] = &[
    ("A", 1),
    ("B", 2),
    ("C1", 3),
    ("C2", 4),
    ("C3", 5),
    ("C4", 6),
    ("C5", 7),
    ("D1", 8),
    ("D2", 9),
    ("D3", 10),
    ("D4", 11),
    ("D5", 12),
];
const OUTPUTS_336: &[&str] = &["1", "2"];

/// Immutable set of sensor inputs and heater outputs for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTable {
    sensors: &'static [(&'static str, u8)],
    outputs: &'static [&'static str],
}

impl ChannelTable {
    /// Selects the table for `model`. `opt3062` only matters on the 336.
    pub fn new(model: Model, opt3062: bool) -> Self {
        match model {
            Model::M336 if opt3062 => Self {
                sensors: SENSORS_336_3062,
                outputs: OUTPUTS_336,
            },
            Model::M336 => Self {
                sensors: SENSORS_336,
                outputs: OUTPUTS_336,
            },
            Model::M224 => Self {
                sensors: SENSORS_224,
                outputs: &[],
            },
        }
    }

    /// Resolves a sensor name case-insensitively to its canonical spelling.
    pub fn sensor(&self, name: &str) -> Option<&'static str> {
        self.sensors
            .iter()
            .find(|(sensor, _)| sensor.eq_ignore_ascii_case(name.trim()))
            .map(|(sensor, _)| *sensor)
    }

    /// Protocol channel index of a sensor.
    pub fn sensor_index(&self, name: &str) -> Option<u8> {
        self.sensors
            .iter()
            .find(|(sensor, _)| sensor.eq_ignore_ascii_case(name.trim()))
            .map(|(_, index)| *index)
    }

    pub fn output(&self, name: &str) -> Option<&'static str> {
        self.outputs
            .iter()
            .find(|output| output.eq_ignore_ascii_case(name.trim()))
            .copied()
    }

    pub fn sensors(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sensors.iter().map(|(name, _)| *name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outputs.iter().copied()
    }
}

fn lookup<T: Copy>(table: &'static str, entries: &[(&str, T)], code: &str) -> Result<T, Error> {
    let code = code.trim();
    entries
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, value)| *value)
        .ok_or_else(|| Error::UnknownCode {
            table,
            code: code.to_string(),
        })
}

/// Parses a decimal number from a reply field.
pub fn parse_float(value: &str) -> Result<f64, Error> {
    let value = value.trim();
    value.parse::<f64>().map_err(|source| Error::ParseFloat {
        value: value.to_string(),
        source,
    })
}

fn split_fields(reply: &str, expected: usize) -> Result<Vec<&str>, Error> {
    let fields: Vec<&str> = reply.split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(Error::FieldCount {
            expected,
            found: fields.len(),
            reply: reply.to_string(),
        });
    }
    Ok(fields)
}

/// Heater load resistance setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HeaterResistance {
    Ohms25,
    Ohms50,
}

impl HeaterResistance {
    const CODES: [(&'static str, Self); 2] = [("1", Self::Ohms25), ("2", Self::Ohms50)];

    pub fn decode(code: &str) -> Result<Self, Error> {
        lookup("heater resistance", &Self::CODES, code)
    }

    pub fn ohms(&self) -> u32 {
        match self {
            Self::Ohms25 => 25,
            Self::Ohms50 => 50,
        }
    }
}

impl fmt::Display for HeaterResistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Ω", self.ohms())
    }
}

/// Maximum heater current setting. `User` means the limit comes from the
/// separate user max current field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MaxCurrent {
    User,
    A0_707,
    A1_0,
    A1_141,
    A2_0,
}

impl MaxCurrent {
    const CODES: [(&'static str, Self); 5] = [
        ("0", Self::User),
        ("1", Self::A0_707),
        ("2", Self::A1_0),
        ("3", Self::A1_141),
        ("4", Self::A2_0),
    ];

    pub fn decode(code: &str) -> Result<Self, Error> {
        lookup("max current", &Self::CODES, code)
    }

    pub fn amps(&self) -> f64 {
        match self {
            Self::User => 0.0,
            Self::A0_707 => 0.707,
            Self::A1_0 => 1.0,
            Self::A1_141 => 1.141,
            Self::A2_0 => 2.0,
        }
    }
}

impl fmt::Display for MaxCurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} A", self.amps())
    }
}

/// Unit the front panel uses for the heater output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HeaterDisplay {
    Current,
    Power,
}

impl HeaterDisplay {
    const CODES: [(&'static str, Self); 2] = [("1", Self::Current), ("2", Self::Power)];

    pub fn decode(code: &str) -> Result<Self, Error> {
        lookup("heater display", &Self::CODES, code)
    }
}

impl fmt::Display for HeaterDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Power => write!(f, "power"),
        }
    }
}

/// Heater error condition reported by `htrst?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HeaterStatus {
    NoError,
    OpenLoad,
    Short,
}

impl HeaterStatus {
    const CODES: [(&'static str, Self); 3] = [
        ("0", Self::NoError),
        ("1", Self::OpenLoad),
        ("2", Self::Short),
    ];

    pub fn decode(code: &str) -> Result<Self, Error> {
        lookup("heater error", &Self::CODES, code)
    }
}

impl fmt::Display for HeaterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "no error"),
            Self::OpenLoad => write!(f, "heater open load"),
            Self::Short => write!(f, "heater short"),
        }
    }
}

/// Decoded `htrset?` reply.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HeaterSettings {
    pub resistance: HeaterResistance,
    pub max_current: MaxCurrent,
    /// User max current in amps.
    pub user_max_current: f64,
    pub display: HeaterDisplay,
}

impl HeaterSettings {
    /// Decodes `<resistance>,<max current>,<user max current>,<display>`.
    pub fn decode(reply: &str) -> Result<Self, Error> {
        let fields = split_fields(reply, 4)?;
        Ok(Self {
            resistance: HeaterResistance::decode(fields[0])?,
            max_current: MaxCurrent::decode(fields[1])?,
            user_max_current: parse_float(fields[2])?,
            display: HeaterDisplay::decode(fields[3])?,
        })
    }
}

/// Decodes a `pid?` reply.
///
/// The device sends `P,I,D`; the triple is returned as `(I, D, P)`. Existing
/// consumers depend on this ordering, so it is kept until the field order has
/// been checked against the hardware manual.
pub fn decode_pid(reply: &str) -> Result<(f64, f64, f64), Error> {
    let fields = split_fields(reply, 3)?;
    let p = parse_float(fields[0])?;
    let i = parse_float(fields[1])?;
    let d = parse_float(fields[2])?;
    Ok((i, d, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn command_encoding() {
        assert_eq!(Command::new(IDENTIFY, None).encode(), b"*idn?\r\n");
        assert_eq!(
            Command::new(CELSIUS_READING, Some("D3")).encode(),
            b"crdg? D3\r\n"
        );
        assert!(Command::new(HEATER_OUTPUT, Some("1")).is_query());
        assert!(!Command::new("*cls", None).is_query());
    }

    #[test]
    fn channel_tables() {
        let table = ChannelTable::new(Model::M336, false);
        assert_eq!(table.sensor("d"), Some("D"));
        assert_eq!(table.sensor("D3"), None);
        assert_eq!(table.output("2"), Some("2"));
        assert_eq!(table.output("3"), None);

        let table = ChannelTable::new(Model::M336, true);
        assert_eq!(table.sensor("d3"), Some("D3"));
        assert_eq!(table.sensor_index("D5"), Some(8));
        assert_eq!(table.sensor("D"), None);

        let table = ChannelTable::new(Model::M224, true);
        assert_eq!(table.sensors().count(), 12);
        assert_eq!(table.sensor_index("c1"), Some(3));
        assert_eq!(table.sensor_index("D5"), Some(12));
        assert_eq!(table.outputs().count(), 0);
    }

    #[test]
    fn max_current_table() {
        assert_eq!(MaxCurrent::decode("0").map(|c| c.amps()), Ok(0.0));
        assert_eq!(MaxCurrent::decode("3").map(|c| c.amps()), Ok(1.141));
        assert_eq!(MaxCurrent::decode("4").map(|c| c.amps()), Ok(2.0));
        assert_matches!(
            MaxCurrent::decode("5"),
            Err(Error::UnknownCode { table: "max current", .. })
        );
    }

    #[test]
    fn resistance_and_display_tables() {
        assert_eq!(HeaterResistance::decode("1").map(|r| r.ohms()), Ok(25));
        assert_eq!(HeaterResistance::decode("2").map(|r| r.ohms()), Ok(50));
        assert_matches!(HeaterResistance::decode("9"), Err(Error::UnknownCode { .. }));
        assert_eq!(HeaterDisplay::decode("2"), Ok(HeaterDisplay::Power));
        assert_matches!(HeaterDisplay::decode(""), Err(Error::UnknownCode { .. }));
    }

    #[test]
    fn heater_status_table() {
        assert_eq!(HeaterStatus::decode("0"), Ok(HeaterStatus::NoError));
        assert_eq!(HeaterStatus::decode("1 ").map(|s| s.to_string()), Ok("heater open load".to_string()));
        assert_matches!(HeaterStatus::decode("7"), Err(Error::UnknownCode { code, .. }) if code == "7");
    }

    #[test]
    fn heater_settings() {
        let settings = HeaterSettings::decode("2,4,1.5,1").unwrap();
        assert_eq!(settings.resistance, HeaterResistance::Ohms50);
        assert_eq!(settings.max_current.amps(), 2.0);
        assert_eq!(settings.user_max_current, 1.5);
        assert_eq!(settings.display, HeaterDisplay::Current);

        assert_matches!(
            HeaterSettings::decode("2,9,1.5,1"),
            Err(Error::UnknownCode { table: "max current", .. })
        );
        assert_matches!(
            HeaterSettings::decode("2,4,1.5"),
            Err(Error::FieldCount { expected: 4, found: 3, .. })
        );
        assert_matches!(
            HeaterSettings::decode("2,4,abc,1"),
            Err(Error::ParseFloat { .. })
        );
    }

    #[test]
    fn pid_is_returned_as_i_d_p() {
        assert_eq!(decode_pid("1.0,2.0,3.0"), Ok((2.0, 3.0, 1.0)));
        assert_eq!(decode_pid("+50.0, +20.0, +0.0"), Ok((20.0, 0.0, 50.0)));
        assert_matches!(decode_pid("1.0,2.0"), Err(Error::FieldCount { .. }));
    }

    #[test]
    fn model_parsing() {
        assert_eq!("336".parse::<Model>(), Ok(Model::M336));
        assert_eq!("m224".parse::<Model>(), Ok(Model::M224));
        assert_matches!("350".parse::<Model>(), Err(Error::UnknownModel(..)));
        assert!(Model::M336.has_heaters());
        assert!(!Model::M224.has_heaters());
    }
}
