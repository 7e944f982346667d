//! Process-wide `tracing` subscriber for applications embedding the engine.
//!
//! The engine only emits events. Applications that want them on stderr call
//! [`initialise`] once at start-up; later calls are no-ops.

use std::io::{self, IsTerminal};

use fcp_config::Config;
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Why the subscriber could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid `EnvFilter` directive.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        reason: String,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Installs the stderr subscriber described by `config`.
///
/// Reader and command threads are named, so events carry the thread that
/// produced them.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse or a foreign
/// subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    SUBSCRIBER_INSTALLED
        .get_or_try_init(|| install(config))
        .map(|()| TelemetryHandle)
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        reason: error.to_string(),
    })?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = if config.log_format().is_structured() {
        Box::new(builder.json().flatten_event(true).finish())
    } else {
        Box::new(builder.compact().finish())
    };
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
