//! Command ingress shared by every worker (spec.md §4.4): one bounded,
//! non-blocking queue per worker, capacity 10. A full queue means the bus
//! is wedged; the supervisor surfaces an `Error` rather than block.

use cryo_protocol::DeviceId;
use tokio::sync::mpsc;

pub const COMMAND_QUEUE_CAPACITY: usize = 10;

/// One routed command: the target device and the raw, unparsed command
/// string (an integer percentage for valves, `start|stop|control|setpoint
/// N|read_temp` for turbovac devices).
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub device: DeviceId,
    pub command: String,
}

pub type CommandSender = mpsc::Sender<WorkerCommand>;
pub type CommandReceiver = mpsc::Receiver<WorkerCommand>;

pub fn command_queue() -> (CommandSender, CommandReceiver) {
    mpsc::channel(COMMAND_QUEUE_CAPACITY)
}

/// Drains every command currently queued without blocking, per the worker
/// loop's "drain inbound command queue" step (spec.md §4.4).
pub fn drain_ready(receiver: &mut CommandReceiver) -> Vec<WorkerCommand> {
    let mut commands = Vec::new();
    while let Ok(command) = receiver.try_recv() {
        commands.push(command);
    }
    commands
}
