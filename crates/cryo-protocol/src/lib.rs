//! Shared types exchanged between the bus workers, the supervisor and the
//! external gateway: device identifiers, the converter dispatch tag, the
//! per-device read/write table entries, the live-value sample type and the
//! error/severity taxonomy that flows over the error channel.
//!
//! Kept in its own crate so that a future automatic-control consumer (spec
//! `spec.md` §1, "reserved extension point") can depend on these types
//! without pulling in the bus transports or the supervisor binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A short textual identifier unique across the whole rig, e.g. `V13`,
/// `P2`, `Turb1_TBearing`. Semantics live entirely in configuration.
pub type DeviceId = String;

/// Identifies which bus worker owns a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerId {
    Box,
    Therm,
    Turb1,
    Turb2,
    Vac,
}

impl WorkerId {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerId::Box => "box_iface",
            WorkerId::Therm => "therm_iface",
            WorkerId::Turb1 => "turb1_iface",
            WorkerId::Turb2 => "turb2_iface",
            WorkerId::Vac => "vac_iface",
        }
    }
}

/// `DeviceId -> WorkerId`, built once at init from the union of every
/// worker's read and write tables. Append-only after init, so a plain map
/// behind an `Arc` is sufficient — no interior mutability required.
pub type RoutingTable = HashMap<DeviceId, WorkerId>;

/// Converter family selector, attached per device in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConverterTag {
    Default,
    Valve,
    Pressure,
    SiTemp,
}

impl Default for ConverterTag {
    fn default() -> Self {
        ConverterTag::Default
    }
}

/// Configuration for a single readable device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadEntry {
    pub start_register: u16,
    pub num_registers: u16,
    pub modbus_id: u8,
    #[serde(default)]
    pub converter_type: ConverterTag,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
}

/// Configuration for a single writable device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEntry {
    pub start_register: u16,
    pub modbus_id: u8,
    #[serde(default)]
    pub converter_type: ConverterTag,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
}

/// A live value in the `ValueMap`. `Null` means "no recent valid reading".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Number(f64),
    Null,
}

impl Sample {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Sample::Number(v) => Some(*v),
            Sample::Null => None,
        }
    }
}

impl From<Option<f64>> for Sample {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) => Sample::Number(v),
            None => Sample::Null,
        }
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sample::Number(v) => write!(f, "{v}"),
            Sample::Null => write!(f, "null"),
        }
    }
}

/// Error severity taxonomy. The entire error model has exactly these three
/// levels (spec.md §7) — no `Info` level, unlike the teacher firmware's
/// `ErrorSeverity`, since the source system this was distilled from has no
/// equivalent of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning = 0,
    Error = 1,
    Critical = 2,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A record delivered over the bounded many-producer single-consumer error
/// channel (capacity 20, spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub severity: Severity,
}

impl ErrorRecord {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_from_option() {
        assert_eq!(Sample::from(Some(1.5)), Sample::Number(1.5));
        assert_eq!(Sample::from(None), Sample::Null);
    }

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn converter_tag_defaults() {
        assert_eq!(ConverterTag::default(), ConverterTag::Default);
    }
}
