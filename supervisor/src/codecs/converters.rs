//! Value converters (spec.md §4.1): pure, per-device transforms between a
//! raw engineering-unit float (already decoded off the wire by the register
//! codec, see [`crate::codecs::modbus_register`]) and the human-facing
//! engineering value stored in the `ValueMap`.
//!
//! The converter family is closed (`ConverterTag`), so dispatch is a match
//! over an enum rather than a trait object, per spec.md §9's design note.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use cryo_protocol::ConverterTag;

/// Devices whose inverted reading sense requires special-casing (spec.md §4.1).
const VALVE_INVERTED: &str = "V13";
/// Slightly-out-of-band acceptance window valves are clamped within.
const VALVE_ACCEPT_LOW: f64 = -2.0;
const VALVE_ACCEPT_HIGH: f64 = 102.0;

/// Per-sensor silicon-thermometry calibration coefficients `K0..K6`.
pub type SiTempCoefficients = [f64; 7];

#[derive(Debug, thiserror::Error)]
pub enum SiTempLoadError {
    #[error("could not read coefficient file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("coefficient file {path} has no sensor name on its first line")]
    MissingName { path: String },
    #[error("coefficient file {path}: line '{line}' has no '= float' value")]
    MissingValue { path: String, line: String },
    #[error("coefficient file {path}: expected 7 coefficient lines, found {found}")]
    WrongCount { path: String, found: usize },
}

/// Loaded silicon-thermometry coefficient table, one entry per calibrated
/// sensor (spec.md §6). Devices absent from this table use the fallback
/// generic platinum curve.
#[derive(Debug, Default)]
pub struct SiTempTable {
    coefficients: HashMap<String, SiTempCoefficients>,
}

impl SiTempTable {
    pub fn empty() -> Self {
        Self {
            coefficients: HashMap::new(),
        }
    }

    /// Loads every file directly under `dir` as one sensor's coefficient
    /// file. Returns an empty table if the directory does not exist (no
    /// silicon-thermometry sensors configured is a valid deployment).
    pub fn load_dir(dir: &Path) -> Result<Self, SiTempLoadError> {
        let mut coefficients = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { coefficients })
            }
            Err(source) => {
                return Err(SiTempLoadError::Io {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| SiTempLoadError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|source| SiTempLoadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let (name, coefs) = parse_coefficient_file(&contents, &path.display().to_string())?;
            coefficients.insert(name, coefs);
        }
        Ok(Self { coefficients })
    }

    pub fn get(&self, device: &str) -> Option<&SiTempCoefficients> {
        self.coefficients.get(device)
    }
}

/// Parses one coefficient file's contents. First whitespace token on the
/// first line is the sensor name; the following lines are `label = float`,
/// six of which populate `K1..K6` (spec.md §6 format: `a..g`, seven lines
/// total including the header's implicit `K0` — see `a = K0` convention
/// below) in declaration order.
fn parse_coefficient_file(
    contents: &str,
    path: &str,
) -> Result<(String, SiTempCoefficients), SiTempLoadError> {
    let mut lines = contents.lines();
    let header = lines.next().unwrap_or("");
    let name = header
        .split_whitespace()
        .next()
        .ok_or_else(|| SiTempLoadError::MissingName {
            path: path.to_string(),
        })?
        .to_string();

    let mut values = Vec::with_capacity(7);
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw = line
            .rsplit('=')
            .next()
            .ok_or_else(|| SiTempLoadError::MissingValue {
                path: path.to_string(),
                line: line.to_string(),
            })?
            .trim();
        let value: f64 = raw.parse().map_err(|_| SiTempLoadError::MissingValue {
            path: path.to_string(),
            line: line.to_string(),
        })?;
        values.push(value);
    }

    if values.len() != 7 {
        return Err(SiTempLoadError::WrongCount {
            path: path.to_string(),
            found: values.len(),
        });
    }

    let mut coefs = [0.0_f64; 7];
    coefs.copy_from_slice(&values);
    Ok((name, coefs))
}

/// Dispatches reads/writes to the pure per-converter transforms. Shared
/// (via `Arc`) across every worker that touches Modbus register devices,
/// since the silicon-thermometry table is loaded once at bootstrap (see
/// DESIGN.md for why this differs from the original's one-table-per-worker
/// duplication).
#[derive(Clone)]
pub struct Converters {
    si_temp: Arc<SiTempTable>,
}

impl Converters {
    pub fn new(si_temp: Arc<SiTempTable>) -> Self {
        Self { si_temp }
    }

    pub fn read(&self, tag: ConverterTag, device: &str, raw: f64) -> f64 {
        match tag {
            ConverterTag::Default => raw,
            ConverterTag::Valve => valve_read(device, raw),
            ConverterTag::Pressure => pressure_read(device, raw),
            ConverterTag::SiTemp => si_temp_read(&self.si_temp, device, raw),
        }
    }

    pub fn write(&self, tag: ConverterTag, device: &str, value: f64) -> f64 {
        match tag {
            ConverterTag::Valve => valve_write(device, value),
            ConverterTag::Default | ConverterTag::Pressure | ConverterTag::SiTemp => value,
        }
    }
}

fn valve_clamp(value: f64) -> f64 {
    if value < 0.0 && value > VALVE_ACCEPT_LOW {
        0.0
    } else if value > 100.0 && value < VALVE_ACCEPT_HIGH {
        100.0
    } else {
        value
    }
}

fn valve_read(device: &str, raw: f64) -> f64 {
    let value = if device == VALVE_INVERTED {
        100.0 - raw
    } else {
        raw
    };
    valve_clamp(value)
}

fn valve_write(device: &str, value: f64) -> f64 {
    if device == VALVE_INVERTED {
        100.0 - value
    } else {
        value
    }
}

fn pressure_read(device: &str, raw: f64) -> f64 {
    match device {
        "Pvac1" | "Pvac2" => raw * 1000.0,
        "P2" => raw + 12.0,
        _ => round_to(raw - 1.0, 2),
    }
}

fn si_temp_read(table: &SiTempTable, device: &str, raw: f64) -> f64 {
    if let Some(coefs) = table.get(device) {
        let inv = 1000.0 / raw;
        let mut t = 0.0;
        let mut term = 1.0;
        for k in coefs {
            t += k * term;
            term *= inv;
        }
        t
    } else {
        let inner = -((17.59246_f64 - 0.00232 * raw).sqrt() - 3.908) / 0.00116;
        round_to(inner, 3) + 273.15
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valve_v13_inverts_then_clamps() {
        assert_eq!(valve_read("V13", 73.0), 27.0);
        assert_eq!(valve_read("V11", 73.0), 73.0);
    }

    #[test]
    fn valve_clamps_slightly_out_of_band() {
        assert_eq!(valve_read("V11", -1.2), 0.0);
        assert_eq!(valve_read("V11", -5.0), -5.0);
        assert_eq!(valve_read("V11", 101.5), 100.0);
        assert_eq!(valve_read("V11", 105.0), 105.0);
    }

    #[test]
    fn valve_v13_write_inverts() {
        assert_eq!(valve_write("V13", 40.0), 60.0);
        assert_eq!(valve_write("V11", 40.0), 40.0);
    }

    #[test]
    fn valve_v13_read_write_involution() {
        for raw in [0, 10, 27, 50, 73, 100] {
            let v = raw as f64;
            assert_eq!(valve_read("V13", valve_write("V13", v)), v);
            assert_eq!(valve_read("V11", valve_write("V11", v)), v);
        }
    }

    #[test]
    fn pressure_special_cases() {
        assert_eq!(pressure_read("Pvac1", 0.017), 17.0);
        assert!((pressure_read("P2", 988.5) - 1000.5).abs() < 1e-9);
    }

    #[test]
    fn pressure_generic_subtracts_one_and_rounds() {
        // raw already decoded off the wire as a float (see modbus_register)
        assert_eq!(pressure_read("Pgen", 1.0), 0.0);
    }

    #[test]
    fn si_temp_uses_fallback_curve_when_uncalibrated() {
        let table = SiTempTable::empty();
        let t = si_temp_read(&table, "Unknown", 1000.0);
        assert!(t > 0.0 && t < 400.0);
    }

    #[test]
    fn si_temp_uses_loaded_coefficients() {
        let mut table = SiTempTable::empty();
        table
            .coefficients
            .insert("TSens1".to_string(), [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let t = si_temp_read(&table, "TSens1", 1000.0);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn parses_coefficient_file_format() {
        let content = "TSens1 silicon diode\na = 1.0\nb = 2.5\nc = -3.0\nd = 0.1\ne = 0.2\nf = 0.3\ng = 0.4\n";
        let (name, coefs) = parse_coefficient_file(content, "test").unwrap();
        assert_eq!(name, "TSens1");
        assert_eq!(coefs, [1.0, 2.5, -3.0, 0.1, 0.2, 0.3, 0.4]);
    }
}
