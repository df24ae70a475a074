use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::meter::{MeterIdentity, MeterRole};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where the meters may show up. USB adapters enumerate in whatever order they like.
    pub ports: Vec<String>,

    pub meters: MeterAddresses,

    pub serial: SerialSettings,

    pub influx: InfluxSettings,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Settle time before the first bus access.
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,

    /// How often to re-check which supply is live. `None` checks once at startup only.
    #[serde(with = "humantime_serde")]
    pub redetect_interval: Option<Duration>,

    pub thermal_zone: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ports: (0..3).map(|n| format!("/dev/ttyUSB{n}")).collect(),
            meters: Default::default(),
            serial: Default::default(),
            influx: Default::default(),
            interval: Duration::from_secs(5),
            startup_delay: Duration::from_secs(1),
            redetect_interval: None,
            thermal_zone: "/sys/class/thermal/thermal_zone0/temp".into(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let identities = self.meters.identities()?;
        for (i, a) in identities.iter().enumerate() {
            if let Some(b) = identities[i + 1..].iter().find(|b| b.address() == a.address()) {
                return Err(format!(
                    "{} and {} share slave address {}",
                    a.role(),
                    b.role(),
                    a.address()
                )
                .into());
            }
        }
        if self.ports.is_empty() {
            return Err("no candidate ports configured".into());
        }
        if self.interval.is_zero() {
            return Err("interval must be greater than zero".into());
        }
        Ok(())
    }
}

/// Slave addresses, programmed into each meter once before installation.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeterAddresses {
    pub main_a: u8,
    pub main_b: u8,
    pub generator: u8,
}

impl Default for MeterAddresses {
    fn default() -> Self {
        Self {
            main_a: 4,
            main_b: 5,
            generator: 6,
        }
    }
}

impl MeterAddresses {
    pub fn identities(&self) -> crate::Result<[MeterIdentity; 3]> {
        Ok([
            MeterIdentity::new(MeterRole::MainA, self.main_a)?,
            MeterIdentity::new(MeterRole::MainB, self.main_b)?,
            MeterIdentity::new(MeterRole::Generator, self.generator)?,
        ])
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSettings {
    pub baud_rate: u32,

    /// Per-read limit. A retry cycle can take three times this.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub flow_control: tokio_serial::FlowControl,
    pub parity: tokio_serial::Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_millis(200),
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            flow_control: tokio_serial::FlowControl::None,
            parity: tokio_serial::Parity::None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfluxSettings {
    pub url: Url,
    pub database: String,
    pub measurement: String,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:8086").expect("literal URL parses"),
            database: "housePower".to_owned(),
            measurement: "ALL_SENSORS".to_owned(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn empty_config_matches_house_defaults() {
    let config: Config = serde_json::from_str("{}").unwrap();
    config.validate().unwrap();

    assert_eq!(
        config.ports,
        ["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"]
    );
    assert_eq!(config.interval, Duration::from_secs(5));
    assert_eq!(config.redetect_interval, None);
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.serial.timeout, Duration::from_millis(200));
    assert_eq!(config.influx.measurement, "ALL_SENSORS");
    assert_eq!(
        config.meters.identities().unwrap().map(|m| m.address()),
        [4, 5, 6]
    );
}

#[test]
fn parses_complete_config() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "ports": ["/dev/ttyAMA0", "/dev/ttyUSB3"],
        "meters": { "main_a": 1, "main_b": 2, "generator": 3 },
        "serial": {
            "baud_rate": 19200,
            "timeout": "300ms",
            "data_bits": "Eight",
            "stop_bits": "Two",
            "flow_control": "None",
            "parity": "Even"
        },
        "influx": {
            "url": "http://192.168.1.49:8086",
            "database": "housePower",
            "timeout": "2s"
        },
        "interval": "10s",
        "startup_delay": "0s",
        "redetect_interval": "1m",
        "thermal_zone": "/sys/class/thermal/thermal_zone1/temp"
    }))
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.redetect_interval, Some(Duration::from_secs(60)));
    assert_eq!(config.serial.timeout, Duration::from_millis(300));
    assert!(matches!(config.serial.parity, tokio_serial::Parity::Even));
    assert!(matches!(config.serial.stop_bits, tokio_serial::StopBits::Two));
    assert_eq!(config.influx.url.as_str(), "http://192.168.1.49:8086/");
    assert_eq!(config.influx.measurement, "ALL_SENSORS");
    assert_eq!(config.startup_delay, Duration::ZERO);
}

#[test]
fn rejects_shared_slave_address() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "meters": { "main_a": 4, "main_b": 4 }
    }))
    .unwrap();

    let err = config.validate().unwrap_err();
    assert_eq!(err.to_string(), "MAIN-A and MAIN-B share slave address 4");
}

#[test]
fn rejects_broadcast_address() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "meters": { "generator": 0 }
    }))
    .unwrap();

    assert!(matches!(
        config.validate(),
        Err(crate::Error::InvalidSlaveAddress(0))
    ));
}

#[test]
fn rejects_unknown_keys() {
    assert!(serde_json::from_str::<Config>(r#"{ "intervall": "5s" }"#).is_err());
}

#[test]
fn loads_from_file() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "ports": ["/dev/ttyUSB7"], "interval": "2s" }}"#).unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.ports, ["/dev/ttyUSB7"]);
    assert_eq!(config.interval, Duration::from_secs(2));
}
