//! Device-interface supervisor entry point: parses CLI flags, initializes
//! logging, loads and validates configuration, brings up the five bus
//! workers in a fixed order, then hands control to the supervisor's main
//! loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cryo_config::Config;
use cryo_protocol::{RoutingTable, WorkerId};
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cryo_supervisor::bus::client::{RtuSerialClient, RtuTcpClient};
use cryo_supervisor::bus::command::command_queue;
use cryo_supervisor::bus::{box_worker::BoxWorker, therm_worker::ThermWorker, turbo_worker::TurboWorker, vac_worker::VacWorker};
use cryo_supervisor::codecs::converters::{Converters, SiTempTable};
use cryo_supervisor::derived;
use cryo_supervisor::gateway;
use cryo_supervisor::supervisor::{error_channel, new_value_map, Supervisor};
use cryo_supervisor::SupervisorError;

const SI_TEMP_DIR: &str = "data/silicon_thermometry";

#[derive(Parser, Debug)]
#[command(name = "cryo-supervisor")]
#[command(about = "Device-interface supervisor for a cryogenic refrigeration rig")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Log level passed to the env-filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory log files are rolled into.
    #[arg(long, value_name = "DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Load and validate configuration, then exit without opening any bus.
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(level: &str, log_dir: &PathBuf) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir).context("creating log directory")?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Ok(guard)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging must come up before anything else can log; if it fails there
    // is no logger to report through, so this one error goes to stderr
    // directly (spec-mandated bootstrap order).
    let _log_guard = match init_logging(&cli.log_level, &cli.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("logger initialization failed: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match build_runtime() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to build async runtime: {err:?}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn build_runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cryo-supervisor")
        .build()
        .context("building tokio runtime")
}

async fn run(cli: Cli) -> Result<(), SupervisorError> {
    info!("loading configuration from {}", cli.config.display());
    let config = Config::from_file(&cli.config)?;
    config.validate()?;

    let si_temp = SiTempTable::load_dir(std::path::Path::new(SI_TEMP_DIR)).map_err(|err| SupervisorError::Other(anyhow::Error::from(err)))?;
    let converters = Converters::new(Arc::new(si_temp));

    if cli.dry_run {
        info!("configuration valid, exiting (--dry-run)");
        return Ok(());
    }

    let values = new_value_map();
    let (error_tx, error_rx) = error_channel();

    let mut routing: RoutingTable = HashMap::new();
    let mut worker_queues: HashMap<WorkerId, cryo_supervisor::bus::command::CommandSender> = HashMap::new();

    // Bootstrap order: box, therm, turb1, turb2, vac, matching the order
    // the original source brings its interfaces up in.
    spawn_box_worker(&config, &values, &error_tx, &converters, &mut routing, &mut worker_queues).await?;
    spawn_therm_worker(&config, &values, &error_tx, &converters, &mut routing, &mut worker_queues).await?;
    spawn_turbo_worker(
        WorkerId::Turb1,
        "turb1_iface",
        &config.connections.turb1_serial,
        config.devices.turb1_sensor_devices.clone(),
        config.devices.turb1_control_devices.clone(),
        &values,
        &error_tx,
        &converters,
        &mut routing,
        &mut worker_queues,
    )
    .await?;
    spawn_turbo_worker(
        WorkerId::Turb2,
        "turb2_iface",
        &config.connections.turb2_serial,
        config.devices.turb2_sensor_devices.clone(),
        config.devices.turb2_control_devices.clone(),
        &values,
        &error_tx,
        &converters,
        &mut routing,
        &mut worker_queues,
    )
    .await?;
    spawn_vac_worker(&config, &values, &error_tx, &converters, &mut routing, &mut worker_queues).await?;

    let supervisor = Arc::new(Supervisor::new(values, error_tx, routing, worker_queues));

    let configured_formulas: Vec<cryo_protocol::DeviceId> = config.devices.multi_devices.keys().cloned().collect();
    tokio::spawn(derived::run(supervisor.clone(), configured_formulas));

    let conn = &config.connections.external_iface;
    gateway::connect(&conn.ip, conn.port, &conn.username, &conn.password, supervisor.clone())
        .await
        .map_err(|err| SupervisorError::BusInit { worker: "external gateway", source: err })?;

    info!("supervisor up, entering main loop");
    supervisor.run(error_rx).await;
    Ok(())
}

async fn spawn_box_worker(
    config: &Config,
    values: &cryo_supervisor::supervisor::ValueMap,
    errors: &cryo_supervisor::supervisor::ErrorSender,
    converters: &Converters,
    routing: &mut RoutingTable,
    worker_queues: &mut HashMap<WorkerId, cryo_supervisor::bus::command::CommandSender>,
) -> Result<(), SupervisorError> {
    let conn = &config.connections.box_serial;
    let client = RtuSerialClient::connect(&conn.port, conn.baudrate)
        .await
        .map_err(|source| SupervisorError::BusInit { worker: "box_iface", source })?;

    let read_table = config.devices.box_sensor_devices.clone();
    let write_table = config.devices.box_control_devices.clone();
    for device in read_table.keys().chain(write_table.keys()) {
        routing.insert(device.clone(), WorkerId::Box);
    }

    let (sender, receiver) = command_queue();
    worker_queues.insert(WorkerId::Box, sender);
    let worker = BoxWorker::new(client, read_table, write_table, values.clone(), errors.clone(), converters.clone(), receiver);
    tokio::spawn(worker.run());
    Ok(())
}

async fn spawn_therm_worker(
    config: &Config,
    values: &cryo_supervisor::supervisor::ValueMap,
    errors: &cryo_supervisor::supervisor::ErrorSender,
    converters: &Converters,
    routing: &mut RoutingTable,
    worker_queues: &mut HashMap<WorkerId, cryo_supervisor::bus::command::CommandSender>,
) -> Result<(), SupervisorError> {
    let conn = &config.connections.therm_serial;
    let client = RtuTcpClient::connect(&conn.ip, conn.port)
        .await
        .map_err(|source| SupervisorError::BusInit { worker: "therm_iface", source })?;

    let read_table = config.devices.therm_sensor_devices.clone();
    for device in read_table.keys() {
        routing.insert(device.clone(), WorkerId::Therm);
    }

    let (sender, receiver) = command_queue();
    worker_queues.insert(WorkerId::Therm, sender);
    let worker = ThermWorker::new(client, read_table, values.clone(), errors.clone(), converters.clone(), receiver);
    tokio::spawn(worker.run());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn spawn_turbo_worker(
    id: WorkerId,
    name: &'static str,
    conn: &cryo_config::SerialConnection,
    read_table: HashMap<cryo_protocol::DeviceId, cryo_protocol::ReadEntry>,
    write_table: HashMap<cryo_protocol::DeviceId, cryo_protocol::WriteEntry>,
    values: &cryo_supervisor::supervisor::ValueMap,
    errors: &cryo_supervisor::supervisor::ErrorSender,
    converters: &Converters,
    routing: &mut RoutingTable,
    worker_queues: &mut HashMap<WorkerId, cryo_supervisor::bus::command::CommandSender>,
) -> Result<(), SupervisorError> {
    let builder = tokio_serial::new(&conn.port, conn.baudrate);
    let port = tokio_serial::SerialStream::open(&builder).map_err(|err| SupervisorError::BusInit { worker: name, source: err.into() })?;

    for device in read_table.keys().chain(write_table.keys()) {
        routing.insert(device.clone(), id);
    }

    let (sender, receiver) = command_queue();
    worker_queues.insert(id, sender);
    let worker = TurboWorker::new(name, port, read_table, write_table, values.clone(), errors.clone(), converters.clone(), receiver);
    tokio::spawn(worker.run());
    Ok(())
}

async fn spawn_vac_worker(
    config: &Config,
    values: &cryo_supervisor::supervisor::ValueMap,
    errors: &cryo_supervisor::supervisor::ErrorSender,
    converters: &Converters,
    routing: &mut RoutingTable,
    worker_queues: &mut HashMap<WorkerId, cryo_supervisor::bus::command::CommandSender>,
) -> Result<(), SupervisorError> {
    let conn = &config.connections.vac_mqtt;
    let read_table = config.devices.vac_sensor_devices.clone();
    let write_table = config.devices.vac_control_devices.clone();
    for device in read_table.keys().chain(write_table.keys()) {
        routing.insert(device.clone(), WorkerId::Vac);
    }

    let (sender, receiver) = command_queue();
    worker_queues.insert(WorkerId::Vac, sender);
    let worker = VacWorker::connect(
        &conn.ip,
        conn.port,
        &conn.username,
        &conn.password,
        read_table,
        write_table,
        values.clone(),
        errors.clone(),
        converters.clone(),
        receiver,
    )
    .await
    .map_err(|source| SupervisorError::BusInit { worker: "vac_iface", source })?;
    tokio::spawn(worker.run());
    Ok(())
}
