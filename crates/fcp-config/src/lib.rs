//! Shared configuration for FCP clients.
//!
//! Settings are layered by `ortho_config`: built-in defaults first, then a
//! configuration file, then `FCP_*` environment variables, and finally
//! command-line flags. Later layers override earlier ones field by field.

mod defaults;
mod endpoint;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CLIENT_NAME, DEFAULT_COMMAND_WORKERS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_FCP_HOST,
    DEFAULT_FCP_PORT, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_LOG_FILTER, default_client_name,
    default_log_filter, default_log_filter_string, default_log_format, default_node_endpoint,
};
pub use endpoint::{EndpointParseError, NodeEndpoint};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for an FCP client.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "FCP")]
pub struct Config {
    /// Node FCP endpoint, e.g. `tcp://127.0.0.1:9481`.
    #[ortho_config(default = default_node_endpoint())]
    node_endpoint: NodeEndpoint,
    /// Name announced to the node in `ClientHello`.
    #[ortho_config(default = default_client_name())]
    client_name: String,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter_string())]
    log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    log_format: LogFormat,
    /// Connect timeout in seconds; `0` waits indefinitely.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,
    /// Seconds to wait for `NodeHello` after `ClientHello`; `0` waits
    /// indefinitely.
    #[ortho_config(default = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    handshake_timeout_secs: u64,
    /// Upper bound on permanent redirects a fetch follows; unbounded if unset.
    max_redirects: Option<u32>,
    /// Threads used to submit commands.
    #[ortho_config(default = DEFAULT_COMMAND_WORKERS)]
    command_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_endpoint: default_node_endpoint(),
            client_name: default_client_name(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            max_redirects: None,
            command_workers: DEFAULT_COMMAND_WORKERS,
        }
    }
}

impl Config {
    /// Node endpoint the client connects to.
    #[must_use]
    pub const fn node_endpoint(&self) -> &NodeEndpoint {
        &self.node_endpoint
    }

    /// Client name announced during the handshake.
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Connect timeout for the node socket; `None` when disabled.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.connect_timeout_secs)
    }

    /// Time allowed for the node to answer `ClientHello`; `None` when
    /// disabled.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.handshake_timeout_secs)
    }

    /// Maximum number of redirects a fetch follows, if bounded.
    #[must_use]
    pub const fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    /// Number of command submission threads, never less than one.
    #[must_use]
    pub fn command_workers(&self) -> usize {
        self.command_workers.max(1)
    }

    /// Replaces the node endpoint.
    #[must_use]
    pub fn with_node_endpoint(mut self, endpoint: NodeEndpoint) -> Self {
        self.node_endpoint = endpoint;
        self
    }

    /// Replaces the client name.
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Bounds the number of redirects a fetch follows.
    #[must_use]
    pub const fn with_max_redirects(mut self, limit: Option<u32>) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Replaces the handshake timeout, rounded up to whole seconds.
    ///
    /// `Duration::ZERO` disables the timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_secs = whole_secs(timeout);
        self
    }

    /// Replaces the connect timeout, rounded up to whole seconds.
    ///
    /// `Duration::ZERO` disables the timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = whole_secs(timeout);
        self
    }
}

/// Sockets reject a zero timeout, so zero means no timeout at all.
const fn timeout_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

const fn whole_secs(timeout: Duration) -> u64 {
    if timeout.subsec_nanos() > 0 {
        timeout.as_secs().saturating_add(1)
    } else {
        timeout.as_secs()
    }
}
