//! A turbovac worker (`turb1` or `turb2`, spec.md §4.4): owns a raw serial
//! line directly — the telegram protocol doesn't fit the `BusClient`
//! abstraction, so there is no Modbus layer here at all.
//!
//! Device ids in this worker's tables look like `Turb1_TBearing`: the
//! segment after the last underscore names one of the six fixed
//! `TurbineState` attributes, the same convention the original source uses
//! to share one generic read-table shape across every worker flavour.

use std::collections::HashMap;
use std::time::Duration;

use cryo_protocol::{DeviceId, ErrorRecord, ReadEntry, Sample, WriteEntry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialStream;

use crate::bus::command::{drain_ready, CommandReceiver, WorkerCommand};
use crate::bus::report;
use crate::codecs::converters::Converters;
use crate::codecs::turbovac::{self, clamp_setpoint, decode_telegram};
use crate::supervisor::{ErrorSender, ValueMap};

pub const READ_PERIOD: Duration = Duration::from_millis(500);
/// The turbovac serial read must tolerate a slow converter response
/// (spec.md §5 suspension points).
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_TELEGRAM_GAP: Duration = Duration::from_millis(100);

/// Mirrors spec.md §3's `TurbineState`: the worker's own view of the
/// turbine, updated from every decoded telegram. `voltage` has no backing
/// byte in the telegram layout — the original's `cur_voltage` is likewise
/// never written by its telegram decoder and stays at its initial 0 for the
/// life of the interface — but the attribute is always present, never an
/// error.
#[derive(Debug, Clone, Copy, Default)]
struct TurbineState {
    running: bool,
    setpoint_hz: u16,
    freq_hz: u16,
    freq_conv_temp_c: u8,
    bearing_temp_c: u8,
    voltage: u16,
}

impl TurbineState {
    /// Looks up one of the six attribute names spec.md §3/§4.3 define.
    fn attribute(&self, name: &str) -> Option<f64> {
        match name {
            "TBearing" => Some(self.bearing_temp_c as f64),
            "TFreq" => Some(self.freq_conv_temp_c as f64),
            "Freq" => Some(self.freq_hz as f64),
            "Setpoint" => Some(self.setpoint_hz as f64),
            "State" => Some(if self.running { 1.0 } else { 0.0 }),
            "Voltage" => Some(self.voltage as f64),
            _ => None,
        }
    }
}

fn attribute_name(device: &str) -> &str {
    device.rsplit('_').next().unwrap_or(device)
}

pub struct TurboWorker {
    name: &'static str,
    port: SerialStream,
    read_table: HashMap<DeviceId, ReadEntry>,
    write_table: HashMap<DeviceId, WriteEntry>,
    values: ValueMap,
    errors: ErrorSender,
    converters: Converters,
    commands: CommandReceiver,
    state: TurbineState,
}

impl TurboWorker {
    pub fn new(
        name: &'static str,
        port: SerialStream,
        read_table: HashMap<DeviceId, ReadEntry>,
        write_table: HashMap<DeviceId, WriteEntry>,
        values: ValueMap,
        errors: ErrorSender,
        converters: Converters,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            name,
            port,
            read_table,
            write_table,
            values,
            errors,
            converters,
            commands,
            state: TurbineState::default(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(READ_PERIOD).await;

            for command in drain_ready(&mut self.commands) {
                self.handle_command(command).await;
            }

            self.poll_pass().await;
        }
    }

    async fn handle_command(&mut self, command: WorkerCommand) {
        let mut parts = command.command.trim().splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match verb {
            "control" => {
                let frame = turbovac::encode_control(self.state.running, self.state.setpoint_hz);
                self.send(frame).await;
            }
            "start" => {
                let frame = turbovac::encode_start(self.state.setpoint_hz);
                self.send(frame).await;
                self.state.running = true;
            }
            "stop" => {
                self.send(turbovac::encode_stop_first()).await;
                tokio::time::sleep(STOP_TELEGRAM_GAP).await;
                self.send(turbovac::encode_stop_second()).await;
                self.state.running = false;
            }
            "setpoint" => {
                let Some(entry) = self.write_table.get(&command.device) else {
                    report(&self.errors, ErrorRecord::error(format!("{}: no write entry for '{}'", self.name, command.device))).await;
                    return;
                };
                match rest.parse::<f64>() {
                    Ok(requested) => {
                        let converted = self.converters.write(entry.converter_type, &command.device, requested);
                        let clamped = clamp_setpoint(converted as i32);
                        let frame = turbovac::encode_setpoint(self.state.running, clamped);
                        self.send(frame).await;
                        self.state.setpoint_hz = clamped;
                    }
                    Err(_) => {
                        report(&self.errors, ErrorRecord::warning(format!("{}: malformed setpoint command '{rest}'", self.name))).await;
                    }
                }
            }
            "read_temp" => {
                let frame = turbovac::encode_read_temp(self.state.running, self.state.setpoint_hz);
                self.send(frame).await;
            }
            _ => {
                report(&self.errors, ErrorRecord::warning(format!("{}: unknown turbovac command '{}'", self.name, command.command))).await;
            }
        }
    }

    async fn send(&mut self, frame: [u8; 24]) {
        if let Err(err) = self.port.write_all(&frame).await {
            report(&self.errors, ErrorRecord::warning(format!("{}: telegram write failed: {err}", self.name))).await;
            return;
        }

        let mut buf = [0u8; 24];
        let read = tokio::time::timeout(READ_TIMEOUT, self.port.read_exact(&mut buf)).await;
        match read {
            Ok(Ok(_)) => {
                let decoded = decode_telegram(&buf);
                if !decoded.checksum_ok {
                    tracing::debug!(worker = self.name, "received telegram with checksum mismatch");
                }
                if decoded.pzd2 {
                    self.state.setpoint_hz = decoded.payload;
                } else {
                    self.state.freq_hz = decoded.payload;
                }
                self.state.freq_conv_temp_c = decoded.freq_conv_temp_c;
                self.state.bearing_temp_c = decoded.bearing_temp_c;
            }
            Ok(Err(err)) => {
                report(&self.errors, ErrorRecord::warning(format!("{}: telegram read failed: {err}", self.name))).await;
            }
            Err(_) => {
                report(&self.errors, ErrorRecord::warning(format!("{}: telegram read timed out", self.name))).await;
            }
        }
    }

    /// Requests a fresh temperature/frequency frame, then publishes every
    /// configured attribute from the refreshed `TurbineState`.
    async fn poll_pass(&mut self) {
        let frame = turbovac::encode_read_temp(self.state.running, self.state.setpoint_hz);
        self.send(frame).await;

        let devices: Vec<(DeviceId, ReadEntry)> = self.read_table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (device, entry) in devices {
            let attr = attribute_name(&device);
            match self.state.attribute(attr) {
                Some(raw) => {
                    let engineering = self.converters.read(entry.converter_type, &device, raw);
                    self.values.insert(device, Sample::Number(engineering));
                }
                None => {
                    self.values.insert(device.clone(), Sample::Null);
                    report(&self.errors, ErrorRecord::warning(format!("{}: '{device}' names an unknown turbine attribute '{attr}'", self.name))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_name_splits_on_last_underscore() {
        assert_eq!(attribute_name("Turb1_TBearing"), "TBearing");
        assert_eq!(attribute_name("Turb2_Setpoint"), "Setpoint");
    }

    #[test]
    fn voltage_reads_back_default_zero() {
        let state = TurbineState::default();
        assert_eq!(state.attribute("Voltage"), Some(0.0));
        assert_eq!(state.attribute("Freq"), Some(0.0));
    }
}
