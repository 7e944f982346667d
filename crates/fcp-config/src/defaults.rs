use crate::endpoint::NodeEndpoint;
use crate::logging::LogFormat;

/// Host a local node listens on for FCP clients.
pub const DEFAULT_FCP_HOST: &str = "127.0.0.1";

/// Port assigned to FCP by a stock node installation.
pub const DEFAULT_FCP_PORT: u16 = 9481;

/// Client name announced in `ClientHello`.
pub const DEFAULT_CLIENT_NAME: &str = "fcp-dialog";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds allowed for the TCP or Unix connect call.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Seconds allowed between `ClientHello` and the node's `NodeHello`.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Worker threads that submit commands to the node.
pub const DEFAULT_COMMAND_WORKERS: usize = 2;

/// Endpoint of a node running on the local machine.
#[must_use]
pub fn default_node_endpoint() -> NodeEndpoint {
    NodeEndpoint::tcp(DEFAULT_FCP_HOST, DEFAULT_FCP_PORT)
}

/// Owned client name used where allocation is required (e.g. serde).
#[must_use]
pub fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_owned()
}

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
