//! YAML configuration loader (spec.md §6).
//!
//! A single YAML file describes logging level, the five bus connections and
//! the per-device read/write tables. The file is read once at startup
//! (`Config::from_file`) and validated (`Config::validate`) before any
//! worker is constructed — there is no hot-reload path, by design
//! (spec.md §1 Non-goals).

use std::collections::HashMap;
use std::path::Path;

use cryo_protocol::{DeviceId, ReadEntry, WriteEntry};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is empty")]
    Empty { path: String },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Connection parameters for a network bus (MQTT broker or Modbus-RTU-over-TCP).
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConnection {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Connection parameters for a local serial bus.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConnection {
    pub port: String,
    pub baudrate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsConfig {
    pub external_iface: NetworkConnection,
    pub box_serial: SerialConnection,
    pub therm_serial: NetworkConnection,
    pub turb1_serial: SerialConnection,
    pub turb2_serial: SerialConnection,
    pub vac_mqtt: NetworkConnection,
}

/// Device tables, keyed by the section names used in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicesConfig {
    #[serde(default)]
    pub box_sensor_devices: HashMap<DeviceId, ReadEntry>,
    #[serde(default)]
    pub box_control_devices: HashMap<DeviceId, WriteEntry>,
    #[serde(default)]
    pub therm_sensor_devices: HashMap<DeviceId, ReadEntry>,
    #[serde(default)]
    pub turb1_sensor_devices: HashMap<DeviceId, ReadEntry>,
    #[serde(default)]
    pub turb1_control_devices: HashMap<DeviceId, WriteEntry>,
    #[serde(default)]
    pub turb2_sensor_devices: HashMap<DeviceId, ReadEntry>,
    #[serde(default)]
    pub turb2_control_devices: HashMap<DeviceId, WriteEntry>,
    #[serde(default)]
    pub vac_sensor_devices: HashMap<DeviceId, ReadEntry>,
    #[serde(default)]
    pub vac_control_devices: HashMap<DeviceId, WriteEntry>,
    /// Derived-device id -> ordered list of component device ids.
    #[serde(default)]
    pub multi_devices: HashMap<DeviceId, Vec<DeviceId>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub connections: ConnectionsConfig,
    pub devices: DevicesConfig,
}

impl Config {
    /// Loads and parses the YAML config file. Does not validate semantics —
    /// call [`Config::validate`] after loading.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Err(ConfigError::Empty { path: path_str });
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }

    /// Checks cross-field invariants that `serde` alone cannot express:
    /// every device referenced by `multi_devices` should resolve to a
    /// formula the derived-values worker actually knows about, and every
    /// register table entry must have a non-zero register count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const KNOWN_DERIVED: &[&str] = &["L1", "L2", "H1", "P3"];

        for name in self.devices.multi_devices.keys() {
            if !KNOWN_DERIVED.contains(&name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "multi_devices entry '{name}' has no known formula (derived devices require code changes, spec.md §9)"
                )));
            }
        }

        for (table_name, table) in [
            ("box_sensor_devices", &self.devices.box_sensor_devices),
            ("therm_sensor_devices", &self.devices.therm_sensor_devices),
            ("turb1_sensor_devices", &self.devices.turb1_sensor_devices),
            ("turb2_sensor_devices", &self.devices.turb2_sensor_devices),
            ("vac_sensor_devices", &self.devices.vac_sensor_devices),
        ] {
            for (dev, entry) in table.iter() {
                if entry.num_registers == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{table_name}.{dev}: num_registers must be non-zero"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
logging:
  level: INFO
connections:
  external_iface: { ip: 10.0.0.1, port: 1883, username: op, password: secret }
  box_serial: { port: /dev/ttyUSB0, baudrate: 9600 }
  therm_serial: { ip: 10.0.0.2, port: 502, username: "", password: "" }
  turb1_serial: { port: /dev/ttyUSB1, baudrate: 19200 }
  turb2_serial: { port: /dev/ttyUSB2, baudrate: 19200 }
  vac_mqtt: { ip: 10.0.0.3, port: 1883, username: wb, password: secret }
devices:
  box_sensor_devices:
    V13: { start_register: 100, num_registers: 2, modbus_id: 1, converter_type: Valve }
  box_control_devices:
    V13: { start_register: 100, modbus_id: 1, converter_type: Valve }
  therm_sensor_devices: {}
  turb1_sensor_devices: {}
  turb1_control_devices: {}
  turb2_sensor_devices: {}
  turb2_control_devices: {}
  vac_sensor_devices: {}
  vac_control_devices: {}
  multi_devices:
    L1: [L1a, L1c]
"#;

    #[test]
    fn parses_full_sample() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.logging.level, "INFO");
        assert_eq!(cfg.devices.box_sensor_devices["V13"].num_registers, 2);
        assert_eq!(cfg.devices.multi_devices["L1"], vec!["L1a", "L1c"]);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_derived_device() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.devices
            .multi_devices
            .insert("Bogus".to_string(), vec!["X".to_string()]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_register_count() {
        let mut cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.devices.box_sensor_devices.get_mut("V13").unwrap().num_registers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = std::env::temp_dir().join("cryo_config_test_empty.yaml");
        std::fs::write(&dir, "   \n").unwrap();
        let err = Config::from_file(&dir).unwrap_err();
        assert!(matches!(err, ConfigError::Empty { .. }));
        let _ = std::fs::remove_file(&dir);
    }
}
