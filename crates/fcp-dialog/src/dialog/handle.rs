//! Caller handles that resolve exactly once.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use tracing::debug;

use crate::errors::FcpError;

use super::DIALOG_TARGET;

/// Sending half of a dialog's completion slot; resolves at most once.
pub(crate) struct Completion<T> {
    identifier: String,
    sender: Option<Sender<Result<T, FcpError>>>,
}

impl<T> Completion<T> {
    /// Resolves the slot. Later calls are ignored and return `false`.
    pub(crate) fn resolve(&mut self, result: Result<T, FcpError>) -> bool {
        let Some(sender) = self.sender.take() else {
            return false;
        };
        if sender.send(result).is_err() {
            debug!(
                target: DIALOG_TARGET,
                identifier = %self.identifier,
                "handle dropped before the dialog resolved"
            );
        }
        true
    }

    pub(crate) const fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }
}

/// Creates a linked completion slot and caller handle.
pub(crate) fn completion_pair<T>(identifier: &str) -> (Completion<T>, DialogHandle<T>) {
    let (sender, receiver) = mpsc::channel();
    (
        Completion {
            identifier: identifier.to_owned(),
            sender: Some(sender),
        },
        DialogHandle {
            identifier: identifier.to_owned(),
            receiver,
        },
    )
}

/// Caller's view of a dialog that resolves exactly once.
#[derive(Debug)]
pub struct DialogHandle<T> {
    identifier: String,
    receiver: Receiver<Result<T, FcpError>>,
}

impl<T> DialogHandle<T> {
    /// Identifier the dialog is registered under.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Blocks until the dialog resolves.
    ///
    /// # Errors
    ///
    /// Returns the dialog's failure, or [`FcpError::ConnectionClosed`] if the
    /// dialog was dropped without resolving.
    pub fn wait(self) -> Result<T, FcpError> {
        self.receiver.recv().unwrap_or_else(|_| Err(abandoned()))
    }

    /// Blocks for at most `timeout`.
    ///
    /// The dialog stays registered when the wait times out, so the handle
    /// can be waited on again.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::Timeout`] when nothing arrived in time, otherwise
    /// as [`DialogHandle::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, FcpError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(FcpError::Timeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(abandoned()),
        }
    }

    /// Returns the result if the dialog has already resolved.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, FcpError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(abandoned())),
        }
    }
}

fn abandoned() -> FcpError {
    FcpError::closed("dialog ended without a result")
}
