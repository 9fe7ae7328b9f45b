//! External gateway (spec.md §4.7, §6): the one pub/sub session an operator
//! console actually talks to. Publishes the whole values map every tick,
//! publishes `State`/`Status` retained on change, and turns `refrig/Command`
//! payloads into `Supervisor::send_command` calls.

use std::sync::Arc;
use std::time::Duration;

use cryo_protocol::ErrorRecord;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::supervisor::Supervisor;

const TOPIC_ROOT: &str = "refrig";
const COMMAND_TOPIC: &str = "refrig/Command";
pub const GATEWAY_PERIOD: Duration = Duration::from_secs(1);

pub async fn connect(ip: &str, port: u16, username: &str, password: &str, supervisor: Arc<Supervisor>) -> anyhow::Result<()> {
    let mut options = MqttOptions::new("cryo-supervisor-external", ip, port);
    options.set_credentials(username, password);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut event_loop) = AsyncClient::new(options, 64);
    client.subscribe(COMMAND_TOPIC, QoS::AtLeastOnce).await?;

    let command_supervisor = supervisor.clone();
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == COMMAND_TOPIC => {
                    handle_command_payload(&command_supervisor, &publish.payload).await;
                }
                Ok(_) => {}
                Err(err) => {
                    command_supervisor
                        .report(ErrorRecord::error(format!("external gateway connection error: {err}")))
                        .await;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::spawn(publish_loop(client, supervisor));
    Ok(())
}

async fn handle_command_payload(supervisor: &Supervisor, payload: &[u8]) {
    let Ok(text) = std::str::from_utf8(payload) else {
        supervisor.report(ErrorRecord::warning("malformed command payload (not UTF-8)")).await;
        return;
    };
    let Some((device, rest)) = text.trim().split_once(' ') else {
        supervisor.report(ErrorRecord::warning(format!("malformed command payload '{text}': missing device/command separator"))).await;
        return;
    };
    supervisor.send_command(device, rest).await;
}

async fn publish_loop(client: AsyncClient, supervisor: Arc<Supervisor>) {
    let mut last_published: Option<(String, String)> = None;
    loop {
        tokio::time::sleep(GATEWAY_PERIOD).await;

        for entry in supervisor.values.iter() {
            let topic = format!("{TOPIC_ROOT}/{}", entry.key());
            if let Err(err) = client.publish(topic, QoS::AtMostOnce, false, entry.value().to_string()).await {
                supervisor
                    .report(ErrorRecord::warning(format!("external gateway publish of '{}' failed: {err}", entry.key())))
                    .await;
            }
        }

        let (state, status) = supervisor.state_snapshot().await;
        if last_published.as_ref() != Some(&(state.clone(), status.clone())) {
            if let Err(err) = client.publish(format!("{TOPIC_ROOT}/State"), QoS::AtLeastOnce, true, state.clone()).await {
                supervisor.report(ErrorRecord::warning(format!("external gateway publish of 'State' failed: {err}"))).await;
            }
            if let Err(err) = client.publish(format!("{TOPIC_ROOT}/Status"), QoS::AtLeastOnce, true, status.clone()).await {
                supervisor.report(ErrorRecord::warning(format!("external gateway publish of 'Status' failed: {err}"))).await;
            }
            last_published = Some((state, status));
        }
    }
}
