//! Error taxonomy for the dialog engine.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;
use crate::message::{CODE_DESCRIPTION_FIELD, CODE_FIELD};

/// Errors surfaced by the connection, the codec and individual dialogs.
///
/// The type is cheap to clone so a single connection failure can resolve
/// every pending handle with the same cause.
#[derive(Debug, Clone, Error)]
pub enum FcpError {
    /// The node sent bytes that do not form a valid frame.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong with the input.
        reason: String,
    },

    /// A frame could not be encoded because a name or value breaks framing.
    #[error("cannot encode field '{field}': {reason}")]
    InvalidField {
        /// Offending field or message name.
        field: String,
        /// Why the field was rejected.
        reason: &'static str,
    },

    /// The node host name did not resolve.
    #[error("failed to resolve node address {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The socket could not be opened.
    #[error("failed to connect to node at {endpoint}: {source}")]
    Connect {
        /// Endpoint being connected to.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A Unix socket endpoint was configured on a platform without them.
    #[error("Unix sockets are not supported on this platform: {endpoint}")]
    UnsupportedUnixTransport {
        /// Endpoint that was requested.
        endpoint: String,
    },

    /// The node did not answer `ClientHello` with `NodeHello`.
    #[error("handshake with {endpoint} failed: {reason}")]
    Handshake {
        /// Endpoint being greeted.
        endpoint: String,
        /// What the node did instead.
        reason: String,
    },

    /// The connection is gone; every dialog on it has been failed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection ended.
        reason: String,
    },

    /// Reading from or writing to the node failed.
    #[error("I/O error on node connection: {0}")]
    Io(Arc<io::Error>),

    /// The node answered a request with a terminal failure frame.
    #[error("node answered with {message}{}", failure_detail(.code, .description))]
    ProtocolFailure {
        /// Message type of the failure frame.
        message: String,
        /// Numeric failure code, when present.
        code: Option<u32>,
        /// Human readable description from the node.
        description: Option<String>,
    },

    /// A local file needed for disk access could not be read.
    #[error("cannot read '{}': {source}", .path.display())]
    UnreadableResource {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A fetch was redirected more often than allowed.
    #[error("redirect limit of {limit} exceeded")]
    TooManyRedirects {
        /// Configured limit.
        limit: u32,
    },

    /// Another dialog already owns the identifier on this connection.
    #[error("identifier '{identifier}' is already in use on this connection")]
    DuplicateIdentifier {
        /// Identifier that collided.
        identifier: String,
    },

    /// A request frame was submitted without an `Identifier`.
    #[error("request '{message}' carries no Identifier field")]
    MissingIdentifier {
        /// Message type of the request.
        message: String,
    },

    /// A bounded wait on a handle ran out.
    #[error("no result within {timeout:?}")]
    Timeout {
        /// Time waited.
        timeout: Duration,
    },
}

impl FcpError {
    /// Builds a [`FcpError::ConnectionClosed`].
    #[must_use]
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Builds a [`FcpError::MalformedFrame`].
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Builds a [`FcpError::ProtocolFailure`] from the node's failure frame.
    #[must_use]
    pub fn protocol_failure(frame: &Frame) -> Self {
        Self::ProtocolFailure {
            message: frame.name().to_owned(),
            code: frame.code(),
            description: frame.field(CODE_DESCRIPTION_FIELD).map(str::to_owned),
        }
    }
}

impl From<io::Error> for FcpError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

fn failure_detail(code: &Option<u32>, description: &Option<String>) -> String {
    match (code, description.as_deref()) {
        (Some(code), Some(description)) => format!(" ({CODE_FIELD} {code}): {description}"),
        (Some(code), None) => format!(" ({CODE_FIELD} {code})"),
        (None, Some(description)) => format!(": {description}"),
        (None, None) => String::new(),
    }
}
