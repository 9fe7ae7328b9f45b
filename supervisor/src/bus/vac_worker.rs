//! The `vac` worker (spec.md §4.4): a pub/sub bus instead of a polled one.
//! It does not poll — each subscribed topic is written into a worker-local
//! map by the broker callback, and the worker's own tick copies that local
//! map into the shared `ValueMap` at tick granularity. Outbound commands
//! are one plain-payload publish each, no JSON.
//!
//! The original source keeps this local map at class scope, shared across
//! every instance of the interface — harmless there because exactly one
//! instance is ever constructed, but a latent trap. Here it is a plain
//! instance field, which is the correct shape in Rust regardless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cryo_protocol::{ConverterTag, DeviceId, ErrorRecord, ReadEntry, Sample, WriteEntry};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;

use crate::bus::command::{drain_ready, CommandReceiver};
use crate::bus::report;
use crate::codecs::converters::Converters;
use crate::supervisor::{ErrorSender, ValueMap};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
const TOPIC_ROOT: &str = "/devices/control";

type LocalValues = Arc<Mutex<HashMap<DeviceId, Sample>>>;

pub struct VacWorker {
    client: AsyncClient,
    read_table: HashMap<DeviceId, ReadEntry>,
    write_table: HashMap<DeviceId, WriteEntry>,
    values: ValueMap,
    errors: ErrorSender,
    converters: Converters,
    commands: CommandReceiver,
    local: LocalValues,
}

fn topic_for(device: &DeviceId, configured: &Option<String>) -> String {
    let leaf = configured.clone().unwrap_or_else(|| device.clone());
    format!("{TOPIC_ROOT}/{leaf}")
}

impl VacWorker {
    /// Connects to the broker and subscribes to every sensor topic. The
    /// returned worker owns the event loop's polling task internally.
    pub async fn connect(
        ip: &str,
        port: u16,
        username: &str,
        password: &str,
        read_table: HashMap<DeviceId, ReadEntry>,
        write_table: HashMap<DeviceId, WriteEntry>,
        values: ValueMap,
        errors: ErrorSender,
        converters: Converters,
        commands: CommandReceiver,
    ) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new("cryo-supervisor-vac", ip, port);
        options.set_credentials(username, password);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let local: LocalValues = Arc::new(Mutex::new(HashMap::new()));

        for (device, entry) in &read_table {
            client.subscribe(topic_for(device, &entry.mqtt_topic), QoS::AtLeastOnce).await?;
        }

        let poll_errors = errors.clone();
        let poll_local = local.clone();
        let poll_converters = converters.clone();
        let topics: HashMap<String, (DeviceId, ConverterTag)> = read_table
            .iter()
            .map(|(device, entry)| (topic_for(device, &entry.mqtt_topic), (device.clone(), entry.converter_type)))
            .collect();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some((device, converter_type)) = topics.get(publish.topic.as_str()) {
                            let sample = std::str::from_utf8(&publish.payload)
                                .ok()
                                .and_then(|s| s.trim().parse::<f64>().ok())
                                .map(|raw| Sample::Number(poll_converters.read(*converter_type, device, raw)))
                                .unwrap_or(Sample::Null);
                            poll_local.lock().await.insert(device.clone(), sample);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        report(&poll_errors, ErrorRecord::error(format!("vac_iface broker connection error: {err}"))).await;
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            read_table,
            write_table,
            values,
            errors,
            converters,
            commands,
            local,
        })
    }

    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(TICK_PERIOD).await;

            for command in drain_ready(&mut self.commands) {
                self.handle_command(command).await;
            }

            self.copy_local_into_shared().await;
        }
    }

    async fn handle_command(&mut self, command: crate::bus::command::WorkerCommand) {
        let Some(entry) = self.write_table.get(&command.device) else {
            report(&self.errors, ErrorRecord::error(format!("vac_iface has no write entry for '{}'", command.device))).await;
            return;
        };
        let topic = topic_for(&command.device, &entry.mqtt_topic);
        let payload = match command.command.trim().parse::<f64>() {
            Ok(requested) => {
                let converted = self.converters.write(entry.converter_type, &command.device, requested);
                converted.to_string()
            }
            Err(_) => command.command.clone(),
        };
        if let Err(err) = self.client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            report(&self.errors, ErrorRecord::warning(format!("vac_iface publish to '{}' failed: {err}", command.device))).await;
        }
    }

    async fn copy_local_into_shared(&self) {
        let local = self.local.lock().await;
        for device in self.read_table.keys() {
            let sample = local.get(device).copied().unwrap_or(Sample::Null);
            self.values.insert(device.clone(), sample);
        }
    }
}
