//! Error taxonomy. `SupervisorError` covers bootstrap failures (bus-client
//! init, config load) that abort startup before any worker exists;
//! [`cryo_protocol::ErrorRecord`] covers the three-severity runtime stream
//! described in spec.md §7 once workers are running.

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] cryo_config::ConfigError),

    #[error("logger initialization failed: {0}")]
    LoggerInit(String),

    #[error("bus client initialization failed for {worker}: {source}")]
    BusInit {
        worker: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}
