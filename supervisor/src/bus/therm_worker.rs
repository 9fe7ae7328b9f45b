//! The `therm` worker (spec.md §4.4): Modbus-RTU-over-TCP, fixed-point
//! register layout, sensors only — no control table, so its command queue
//! only ever sees misrouted commands.

use std::collections::HashMap;
use std::time::Duration;

use cryo_protocol::{DeviceId, ErrorRecord, ReadEntry, Sample};

use crate::bus::client::{BusClient, RtuTcpClient};
use crate::bus::command::{drain_ready, CommandReceiver};
use crate::bus::report;
use crate::codecs::converters::Converters;
use crate::codecs::modbus_register::decode_therm_fixed;
use crate::supervisor::{ErrorSender, ValueMap};

pub const READ_PERIOD: Duration = Duration::from_millis(500);

pub struct ThermWorker {
    client: RtuTcpClient,
    read_table: HashMap<DeviceId, ReadEntry>,
    values: ValueMap,
    errors: ErrorSender,
    converters: Converters,
    commands: CommandReceiver,
}

impl ThermWorker {
    pub fn new(
        client: RtuTcpClient,
        read_table: HashMap<DeviceId, ReadEntry>,
        values: ValueMap,
        errors: ErrorSender,
        converters: Converters,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            client,
            read_table,
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
                report(
                    &self.errors,
                    ErrorRecord::error(format!("therm_iface has no control devices, rejecting command for '{}'", command.device)),
                )
                .await;
            }

            self.poll_pass().await;
        }
    }

    async fn poll_pass(&mut self) {
        let devices: Vec<(DeviceId, ReadEntry)> = self.read_table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (device, entry) in devices {
            match self.client.read_holding(entry.modbus_id, entry.start_register, entry.num_registers).await {
                Ok(registers) if registers.len() >= 2 => {
                    let raw = decode_therm_fixed([registers[0], registers[1]]);
                    let engineering = self.converters.read(entry.converter_type, &device, raw);
                    self.values.insert(device, Sample::Number(engineering));
                }
                Ok(_) => {
                    self.values.insert(device.clone(), Sample::Null);
                    report(&self.errors, ErrorRecord::warning(format!("therm_iface read of '{device}' returned a short response"))).await;
                }
                Err(err) => {
                    self.values.insert(device.clone(), Sample::Null);
                    report(&self.errors, ErrorRecord::warning(format!("therm_iface read of '{device}' failed: {err}"))).await;
                }
            }
        }
    }
}
