//! Client facade: lazily connected, one connection at a time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use fcp_config::Config;
use tracing::{debug, warn};

use crate::connection::{CONNECTION_TARGET, Connection, ConnectionSettings};
use crate::dialog::{
    Completion, DialogHandle, FetchedData, Fold, GetFold, NoticeListeners, PutFold, TerminalFold,
    completion_pair,
};
use crate::errors::FcpError;
use crate::executor::CommandExecutor;
use crate::frame::Frame;
use crate::identifier::{IdentifierGenerator, SequentialIdentifiers};
use crate::message::SSK_KEYPAIR;
use crate::requests::{self, GetRequest, PutRequest};
use crate::subscription::{Subscription, SubscriptionSpec};

struct ClientInner {
    settings: ConnectionSettings,
    max_redirects: Option<u32>,
    identifiers: Arc<dyn IdentifierGenerator>,
    connection: Mutex<Option<Arc<Connection>>>,
    connection_ids: AtomicU64,
    executor: CommandExecutor,
}

impl ClientInner {
    fn ensure_connected(&self) -> Result<Arc<Connection>, FcpError> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = slot.as_ref().filter(|connection| connection.is_alive()) {
            return Ok(Arc::clone(connection));
        }
        if let Some(dead) = slot.take() {
            debug!(
                target: CONNECTION_TARGET,
                connection = dead.id(),
                "replacing dead connection"
            );
        }

        let id = self.connection_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = Connection::establish(id, &self.settings).inspect_err(|error| {
            warn!(
                target: CONNECTION_TARGET,
                endpoint = %self.settings.endpoint,
                error = %error,
                "could not connect to node"
            );
        })?;
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn run_dialog<F: Fold>(
        &self,
        identifier: &str,
        request: &Frame,
        fold: F,
        listeners: NoticeListeners,
        mut completion: Completion<F::Output>,
    ) {
        let connection = match self.ensure_connected() {
            Ok(connection) => connection,
            Err(error) => {
                completion.resolve(Err(error));
                return;
            }
        };
        if connection
            .register_dialog(identifier, fold, listeners, completion)
            .is_ok()
        {
            send_request(&connection, identifier, request);
        }
    }

    fn run_subscription(
        &self,
        identifier: &str,
        request: &Frame,
        spec: SubscriptionSpec,
        mut completion: Completion<Subscription>,
    ) {
        let connection = match self.ensure_connected() {
            Ok(connection) => connection,
            Err(error) => {
                completion.resolve(Err(error));
                return;
            }
        };
        if connection
            .register_subscription(identifier, spec, completion)
            .is_ok()
        {
            send_request(&connection, identifier, request);
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let slot = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = slot.take() {
            connection.close();
        }
    }
}

/// Writes a registered request; a failed write resolves its dialog.
fn send_request(connection: &Connection, identifier: &str, request: &Frame) {
    if let Err(error) = connection.send(request) {
        connection.registry().abort(identifier, &error);
    }
}

/// FCP client owning at most one live connection to the node.
///
/// Commands return a [`DialogHandle`] immediately; connecting, registering
/// and sending happen on the command workers. The first command opens the
/// connection, later commands reuse it, and the first command after a
/// connection failure opens a fresh one.
#[derive(Clone)]
pub struct FcpClient {
    inner: Arc<ClientInner>,
}

impl FcpClient {
    /// Client with identifiers `<client name>-<n>`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_identifiers(config, SequentialIdentifiers::new(config.client_name()))
    }

    /// Client drawing correlation tokens from `identifiers`.
    #[must_use]
    pub fn with_identifiers(config: &Config, identifiers: impl IdentifierGenerator + 'static) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                settings: ConnectionSettings::from_config(config),
                max_redirects: config.max_redirects(),
                identifiers: Arc::new(identifiers),
                connection: Mutex::new(None),
                connection_ids: AtomicU64::new(0),
                executor: CommandExecutor::new(config.command_workers()),
            }),
        }
    }

    /// Draws a fresh correlation token.
    #[must_use]
    pub fn next_identifier(&self) -> String {
        self.inner.identifiers.next_identifier()
    }

    /// Returns the live connection, connecting and greeting the node first
    /// if there is none. Concurrent callers share one attempt.
    ///
    /// # Errors
    ///
    /// Returns the connect or handshake failure.
    pub fn ensure_connected(&self) -> Result<Arc<Connection>, FcpError> {
        self.inner.ensure_connected()
    }

    /// The current connection if it is still alive; never connects.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|connection| connection.is_alive())
            .cloned()
    }

    /// Sends `request` and folds the replies addressed to its `Identifier`.
    ///
    /// The handle fails with [`FcpError::MissingIdentifier`] if the request
    /// has no `Identifier` field.
    pub fn execute<F: Fold>(
        &self,
        request: Frame,
        fold: F,
        listeners: NoticeListeners,
    ) -> DialogHandle<F::Output> {
        let Some(identifier) = request.identifier().map(str::to_owned) else {
            let (mut completion, handle) = completion_pair("");
            completion.resolve(Err(FcpError::MissingIdentifier {
                message: request.name().to_owned(),
            }));
            return handle;
        };

        let (completion, handle) = completion_pair(&identifier);
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(Box::new(move || {
            inner.run_dialog(&identifier, &request, fold, listeners, completion);
        }));
        handle
    }

    /// Sends a subscription request; the handle resolves on the ack.
    pub fn subscribe(&self, request: Frame, spec: SubscriptionSpec) -> DialogHandle<Subscription> {
        let Some(identifier) = request.identifier().map(str::to_owned) else {
            let (mut completion, handle) = completion_pair("");
            completion.resolve(Err(FcpError::MissingIdentifier {
                message: request.name().to_owned(),
            }));
            return handle;
        };

        let (completion, handle) = completion_pair(&identifier);
        let inner = Arc::clone(&self.inner);
        self.inner.executor.submit(Box::new(move || {
            inner.run_subscription(&identifier, &request, spec, completion);
        }));
        handle
    }

    /// Fetches a key, following permanent redirects.
    pub fn get(&self, request: GetRequest, listeners: NoticeListeners) -> DialogHandle<FetchedData> {
        let identifier = self.next_identifier();
        let frame = request.to_frame(&identifier);
        let fold = GetFold::new(identifier, request).with_max_redirects(self.inner.max_redirects);
        self.execute(frame, fold, listeners)
    }

    /// Inserts content and resolves with the final key.
    ///
    /// Progress frames are requested when a progress listener is attached.
    pub fn put(&self, mut request: PutRequest, listeners: NoticeListeners) -> DialogHandle<String> {
        if listeners.wants_progress() {
            request.report_progress = true;
        }
        let identifier = self.next_identifier();
        let frame = request.to_frame(&identifier);
        self.execute(frame, PutFold::new(identifier, request), listeners)
    }

    /// Generates a fresh SSK key pair; resolves with the `SSKKeypair` frame.
    pub fn generate_ssk(&self) -> DialogHandle<Frame> {
        let identifier = self.next_identifier();
        self.execute(
            requests::generate_ssk(&identifier),
            TerminalFold::new(&[SSK_KEYPAIR]),
            NoticeListeners::new(),
        )
    }

    /// Subscribes to edition updates of an updatable key.
    pub fn subscribe_usk(&self, uri: &str) -> DialogHandle<Subscription> {
        let identifier = self.next_identifier();
        self.subscribe(
            requests::subscribe_usk(uri, &identifier),
            SubscriptionSpec::usk(&identifier),
        )
    }

    /// Closes the current connection, failing its pending dialogs.
    ///
    /// The next command connects again.
    pub fn close(&self) {
        let current = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = current {
            connection.close();
        }
    }
}

impl fmt::Debug for FcpClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FcpClient")
            .field("endpoint", &self.inner.settings.endpoint)
            .field("client_name", &self.inner.settings.client_name)
            .field("connection", &self.connection().map(|connection| connection.id()))
            .finish_non_exhaustive()
    }
}
