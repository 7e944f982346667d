//! One handshaken socket to the node, its reader thread and its dialogs.
//!
//! A [`Connection`] is usable only after the node answered `ClientHello`
//! with `NodeHello`. From then on a dedicated reader thread decodes frames
//! and hands them to the connection's [`DialogRegistry`]. The first read or
//! write error kills the connection and fails every registered dialog; the
//! client replaces it on next use.

use std::fmt;
use std::io::{BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use fcp_config::{Config, NodeEndpoint};
use tracing::{debug, info, warn};

use crate::codec::{self, FrameReader};
use crate::dialog::{Completion, DialogDriver, DialogHandle, Fold, NoticeListeners, completion_pair};
use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME, NODE_HELLO, PROTOCOL_ERROR};
use crate::registry::{DialogRegistry, FrameSink};
use crate::requests::client_hello;
use crate::subscription::{Subscription, SubscriptionDriver, SubscriptionSpec};
use crate::transport::{self, NodeStream};

pub(crate) const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

type NodeReader = FrameReader<BufReader<NodeStream>>;

/// Where and how to open connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectionSettings {
    pub(crate) endpoint: NodeEndpoint,
    pub(crate) client_name: String,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) handshake_timeout: Option<Duration>,
}

impl ConnectionSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.node_endpoint().clone(),
            client_name: config.client_name().to_owned(),
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

/// Node identification from `NodeHello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGreeting {
    /// Protocol version the node speaks.
    pub fcp_version: String,
    /// Node build, e.g. `Fred,0.7,1.0,1466`.
    pub version: String,
    /// Node implementation name.
    pub node: String,
    /// Identifier the node assigned to this connection, if any.
    pub connection_identifier: Option<String>,
}

impl NodeGreeting {
    fn from_frame(frame: &Frame) -> Self {
        let text = |name: &str| frame.field(name).unwrap_or_default().to_owned();
        Self {
            fcp_version: text("FCPVersion"),
            version: text("Version"),
            node: text("Node"),
            connection_identifier: frame.field("ConnectionIdentifier").map(str::to_owned),
        }
    }
}

/// A live, handshaken connection to the node.
pub struct Connection {
    id: u64,
    endpoint: String,
    greeting: NodeGreeting,
    writer: Mutex<NodeStream>,
    control: NodeStream,
    alive: AtomicBool,
    registry: DialogRegistry,
}

impl Connection {
    /// Connects, greets the node and starts the reader thread.
    pub(crate) fn establish(id: u64, settings: &ConnectionSettings) -> Result<Arc<Self>, FcpError> {
        let endpoint = settings.endpoint.to_string();
        let stream = transport::connect(&settings.endpoint, settings.connect_timeout)?;
        let mut writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        let mut reader = FrameReader::new(BufReader::new(stream));

        let greeting = handshake(&mut reader, &mut writer, &control, settings).map_err(|reason| {
            if let Err(error) = control.shutdown() {
                debug!(
                    target: CONNECTION_TARGET,
                    endpoint = %endpoint,
                    error = %error,
                    "socket shutdown after failed handshake"
                );
            }
            FcpError::Handshake {
                endpoint: endpoint.clone(),
                reason,
            }
        })?;

        let connection = Arc::new(Self {
            id,
            endpoint,
            greeting,
            writer: Mutex::new(writer),
            control,
            alive: AtomicBool::new(true),
            registry: DialogRegistry::new(),
        });

        let reading = Arc::clone(&connection);
        thread::Builder::new()
            .name(format!("fcp-reader-{id}"))
            .spawn(move || run_reader(&reading, reader))?;

        info!(
            target: CONNECTION_TARGET,
            connection = id,
            endpoint = %connection.endpoint,
            node = %connection.greeting.version,
            "connected to node"
        );
        Ok(connection)
    }

    /// Sequence number of this connection within its client.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// What the node reported about itself.
    #[must_use]
    pub const fn greeting(&self) -> &NodeGreeting {
        &self.greeting
    }

    /// False once the connection failed or was closed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::InvalidField`] if the frame cannot be encoded and
    /// [`FcpError::ConnectionClosed`] if the connection is dead. A write
    /// error kills the connection and is returned as well.
    pub fn send(&self, frame: &Frame) -> Result<(), FcpError> {
        if !self.is_alive() {
            return Err(FcpError::closed("connection is no longer alive"));
        }
        let bytes = codec::encode(frame)?;
        let written = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(&bytes).and_then(|()| writer.flush())
        };
        if let Err(error) = written {
            let error = FcpError::from(error);
            self.fail(error.clone());
            return Err(error);
        }

        debug!(
            target: CONNECTION_TARGET,
            connection = self.id,
            message = %frame.name(),
            identifier = ?frame.identifier(),
            "frame sent"
        );
        Ok(())
    }

    /// Registers a dialog under `identifier` without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::DuplicateIdentifier`] if the identifier is taken
    /// and [`FcpError::ConnectionClosed`] if the connection is dead.
    pub fn open_dialog<F: Fold>(
        &self,
        identifier: &str,
        fold: F,
        listeners: NoticeListeners,
    ) -> Result<DialogHandle<F::Output>, FcpError> {
        let (completion, handle) = completion_pair(identifier);
        self.register_dialog(identifier, fold, listeners, completion)?;
        Ok(handle)
    }

    /// Registers a subscription under `identifier` without sending anything.
    ///
    /// # Errors
    ///
    /// As [`Connection::open_dialog`].
    pub fn open_subscription(
        self: &Arc<Self>,
        identifier: &str,
        spec: SubscriptionSpec,
    ) -> Result<DialogHandle<Subscription>, FcpError> {
        let (completion, handle) = completion_pair(identifier);
        self.register_subscription(identifier, spec, completion)?;
        Ok(handle)
    }

    pub(crate) fn register_dialog<F: Fold>(
        &self,
        identifier: &str,
        fold: F,
        listeners: NoticeListeners,
        completion: Completion<F::Output>,
    ) -> Result<(), FcpError> {
        let driver = DialogDriver::new(identifier, fold, listeners, completion);
        self.registry.register(identifier, Box::new(driver))
    }

    pub(crate) fn register_subscription(
        self: &Arc<Self>,
        identifier: &str,
        spec: SubscriptionSpec,
        completion: Completion<Subscription>,
    ) -> Result<(), FcpError> {
        let driver = SubscriptionDriver::new(identifier, spec, Arc::downgrade(self), completion);
        self.registry.register(identifier, Box::new(driver))
    }

    pub(crate) const fn registry(&self) -> &DialogRegistry {
        &self.registry
    }

    /// Closes the socket and fails every pending dialog.
    pub fn close(&self) {
        if let Some(aborted) = self.shut_down(&FcpError::closed("closed by client")) {
            info!(
                target: CONNECTION_TARGET,
                connection = self.id,
                endpoint = %self.endpoint,
                aborted,
                "connection closed"
            );
        }
    }

    pub(crate) fn fail(&self, error: FcpError) {
        if let Some(aborted) = self.shut_down(&error) {
            warn!(
                target: CONNECTION_TARGET,
                connection = self.id,
                endpoint = %self.endpoint,
                error = %error,
                aborted,
                "connection failed"
            );
        }
    }

    /// Marks the connection dead once; returns how many dialogs were aborted.
    fn shut_down(&self, error: &FcpError) -> Option<usize> {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return None;
        }
        if let Err(shutdown) = self.control.shutdown() {
            debug!(
                target: CONNECTION_TARGET,
                connection = self.id,
                error = %shutdown,
                "socket already shut down"
            );
        }
        Some(self.registry.fail_all(error))
    }

    fn handle_incoming(&self, frame: Frame) {
        if frame.is(CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME) {
            self.fail(FcpError::closed(
                "node dropped the connection: another client uses the same name",
            ));
        } else if frame.is(PROTOCOL_ERROR) && frame.identifier().is_none() {
            warn!(
                target: CONNECTION_TARGET,
                connection = self.id,
                error = %FcpError::protocol_failure(&frame),
                "connection-level protocol error"
            );
        } else {
            self.registry.dispatch(frame, self);
        }
    }
}

impl FrameSink for Connection {
    fn send_frame(&self, frame: &Frame) -> Result<(), FcpError> {
        self.send(frame)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("alive", &self.is_alive())
            .field("dialogs", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn handshake(
    reader: &mut NodeReader,
    writer: &mut NodeStream,
    control: &NodeStream,
    settings: &ConnectionSettings,
) -> Result<NodeGreeting, String> {
    let hello = codec::encode(&client_hello(&settings.client_name)).map_err(|e| e.to_string())?;
    writer
        .write_all(&hello)
        .and_then(|()| writer.flush())
        .map_err(|error| format!("could not send ClientHello: {error}"))?;

    control
        .set_read_timeout(settings.handshake_timeout)
        .map_err(|error| error.to_string())?;
    let reply = reader.read_frame();
    control
        .set_read_timeout(None)
        .map_err(|error| error.to_string())?;

    match reply {
        Ok(Some(frame)) if frame.is(NODE_HELLO) => Ok(NodeGreeting::from_frame(&frame)),
        Ok(Some(frame)) => Err(format!("expected {NODE_HELLO}, received {}", frame.name())),
        Ok(None) => Err(format!("connection closed before {NODE_HELLO}")),
        Err(error) => Err(error.to_string()),
    }
}

fn run_reader(connection: &Arc<Connection>, mut reader: NodeReader) {
    debug!(
        target: CONNECTION_TARGET,
        connection = connection.id,
        "reader started"
    );
    while connection.is_alive() {
        match reader.read_frame() {
            Ok(Some(frame)) => {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = connection.id,
                    message = %frame.name(),
                    identifier = ?frame.identifier(),
                    "frame received"
                );
                connection.handle_incoming(frame);
            }
            Ok(None) => connection.fail(FcpError::closed("node closed the connection")),
            Err(error) => connection.fail(error),
        }
    }
    debug!(
        target: CONNECTION_TARGET,
        connection = connection.id,
        "reader stopped"
    );
}
