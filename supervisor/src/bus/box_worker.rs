//! The `box` worker (spec.md §4.4): Modbus-RTU over serial, IEEE-754
//! register layout, sensors and control devices both present.

use std::collections::HashMap;
use std::time::Duration;

use cryo_protocol::{DeviceId, ErrorRecord, ReadEntry, Sample, WriteEntry};

use crate::bus::client::{BusClient, RtuSerialClient};
use crate::bus::command::{drain_ready, CommandReceiver};
use crate::bus::report;
use crate::codecs::converters::Converters;
use crate::codecs::modbus_register::{decode_box_float, encode_box_float};
use crate::supervisor::{ErrorSender, ValueMap};

pub const READ_PERIOD: Duration = Duration::from_millis(500);

pub struct BoxWorker {
    client: RtuSerialClient,
    read_table: HashMap<DeviceId, ReadEntry>,
    write_table: HashMap<DeviceId, WriteEntry>,
    values: ValueMap,
    errors: ErrorSender,
    converters: Converters,
    commands: CommandReceiver,
}

impl BoxWorker {
    pub fn new(
        client: RtuSerialClient,
        read_table: HashMap<DeviceId, ReadEntry>,
        write_table: HashMap<DeviceId, WriteEntry>,
        values: ValueMap,
        errors: ErrorSender,
        converters: Converters,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            client,
            read_table,
            write_table,
            values,
            errors,
            converters,
            commands,
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

    async fn handle_command(&mut self, command: crate::bus::command::WorkerCommand) {
        let Some(entry) = self.write_table.get(&command.device).cloned() else {
            report(&self.errors, ErrorRecord::error(format!("box_iface has no write entry for '{}'", command.device))).await;
            return;
        };
        let Ok(requested) = command.command.trim().parse::<f64>() else {
            report(&self.errors, ErrorRecord::warning(format!("malformed command payload for '{}': '{}'", command.device, command.command))).await;
            return;
        };
        let raw = self.converters.write(entry.converter_type, &command.device, requested);
        let registers = encode_box_float(raw as f32);
        if let Err(err) = self.client.write_holding(entry.modbus_id, entry.start_register, &registers).await {
            report(&self.errors, ErrorRecord::warning(format!("box_iface write to '{}' failed: {err}", command.device))).await;
        }
    }

    async fn poll_pass(&mut self) {
        let devices: Vec<(DeviceId, ReadEntry)> = self.read_table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (device, entry) in devices {
            match self.client.read_holding(entry.modbus_id, entry.start_register, entry.num_registers).await {
                Ok(registers) if registers.len() >= 2 => {
                    let raw = decode_box_float([registers[0], registers[1]]) as f64;
                    let engineering = self.converters.read(entry.converter_type, &device, raw);
                    self.values.insert(device, Sample::Number(engineering));
                }
                Ok(_) => {
                    self.values.insert(device.clone(), Sample::Null);
                    report(&self.errors, ErrorRecord::warning(format!("box_iface read of '{device}' returned a short response"))).await;
                }
                Err(err) => {
                    self.values.insert(device.clone(), Sample::Null);
                    report(&self.errors, ErrorRecord::warning(format!("box_iface read of '{device}' failed: {err}"))).await;
                }
            }
        }
    }
}
