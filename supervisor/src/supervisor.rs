//! The supervisor (spec.md §4.6): owns the shared values map, the shared
//! error channel, the device→worker routing table, and the debounced
//! state/status fields. `send_command` is the single entry point commands
//! take on their way from the external gateway to a worker's inbound queue.

use std::collections::HashMap;
use std::sync::Arc;

use cryo_protocol::{DeviceId, ErrorRecord, RoutingTable, Sample, Severity, WorkerId};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::bus::command::{CommandSender, WorkerCommand};

/// `DeviceId -> Sample`, one entry per live device plus every derived
/// device. Per-key atomic (DashMap shards its internal locking); no
/// operation holds a lock across more than one key (spec.md §5).
pub type ValueMap = Arc<DashMap<DeviceId, Sample>>;

pub const ERROR_CHANNEL_CAPACITY: usize = 20;

pub type ErrorSender = mpsc::Sender<ErrorRecord>;
pub type ErrorReceiver = mpsc::Receiver<ErrorRecord>;

pub fn error_channel() -> (ErrorSender, ErrorReceiver) {
    mpsc::channel(ERROR_CHANNEL_CAPACITY)
}

pub fn new_value_map() -> ValueMap {
    Arc::new(DashMap::new())
}

/// A device id accepted as a write target and silently ignored (spec.md §9).
const RESERVED_NOOP_DEVICE: &str = "Service";

/// Debounced `(state, status)` pair, suppressing identical consecutive
/// updates (spec.md §3, §7).
struct DebouncedState {
    state: String,
    status: String,
}

pub struct Supervisor {
    pub values: ValueMap,
    pub errors: ErrorSender,
    routing: RoutingTable,
    workers: HashMap<WorkerId, CommandSender>,
    current: Mutex<DebouncedState>,
}

impl Supervisor {
    pub fn new(values: ValueMap, errors: ErrorSender, routing: RoutingTable, workers: HashMap<WorkerId, CommandSender>) -> Self {
        Self {
            values,
            errors,
            routing,
            workers,
            current: Mutex::new(DebouncedState {
                state: "INIT".to_string(),
                status: String::new(),
            }),
        }
    }

    /// Routes one command, per spec.md §4.6:
    /// 1. `device == "State"` is an operator state override.
    /// 2. Otherwise look up the routing table and forward to that worker's queue.
    pub async fn send_command(&self, device: &str, command: &str) {
        if device == "State" {
            self.set_state(command.to_string(), String::new()).await;
            return;
        }
        if device == RESERVED_NOOP_DEVICE {
            return;
        }

        let Some(worker_id) = self.routing.get(device) else {
            self.report(ErrorRecord::error(format!("unknown device '{device}' in command routing"))).await;
            return;
        };

        let Some(sender) = self.workers.get(worker_id) else {
            self.report(ErrorRecord::critical(format!("worker {} has no command queue", worker_id.name()))).await;
            return;
        };

        let outbound = WorkerCommand {
            device: device.to_string(),
            command: command.to_string(),
        };
        if sender.try_send(outbound).is_err() {
            self.report(ErrorRecord::error(format!("command queue of {} is full", worker_id.name()))).await;
        }
    }

    /// Pushes a runtime error onto the shared channel; a full channel is a
    /// log-and-drop (spec.md §3) except a critical, which is also logged
    /// synchronously here so it is never silently lost.
    pub async fn report(&self, record: ErrorRecord) {
        if record.severity == Severity::Critical {
            error!(severity = %record.severity, message = %record.message, "critical error (synchronous)");
        }
        if self.errors.try_send(record.clone()).is_err() {
            warn!(dropped_message = %record.message, "error channel full, dropping locally");
            self.log_and_apply(record).await;
        }
    }

    async fn set_state(&self, state: String, status: String) {
        let mut current = self.current.lock().await;
        if current.state == state && current.status == status {
            return;
        }
        debug!(%state, %status, "state transition");
        current.state = state;
        current.status = status;
    }

    pub async fn state_snapshot(&self) -> (String, String) {
        let current = self.current.lock().await;
        (current.state.clone(), current.status.clone())
    }

    /// Folds one error record into the state/status fields and the logger,
    /// per the error-handling policy table (spec.md §7).
    async fn log_and_apply(&self, record: ErrorRecord) {
        let tag = match record.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        match record.severity {
            Severity::Warning => warn!(message = %record.message, "{tag}"),
            Severity::Error => error!(message = %record.message, "{tag}"),
            Severity::Critical => error!(message = %record.message, "{tag}"),
        }
        self.set_state(format!("{tag}:{}", record.message), String::new()).await;

        if record.severity == Severity::Critical {
            error!("critical error, terminating process");
            std::process::exit(1);
        }
    }

    /// Main loop (spec.md §4.6): non-blocking drain of the error channel,
    /// folding each record through the error-handling policy; sleeps 1 s
    /// when the channel is empty. Returns on ctrl-c for a clean shutdown.
    pub async fn run(self: Arc<Self>, mut errors: ErrorReceiver) {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received, exiting");
                    return;
                }
                maybe_record = errors.recv() => {
                    match maybe_record {
                        Some(record) => self.log_and_apply(record).await,
                        None => {
                            tracing::error!("error channel closed unexpectedly");
                            return;
                        }
                    }
                    while let Ok(record) = errors.try_recv() {
                        self.log_and_apply(record).await;
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
