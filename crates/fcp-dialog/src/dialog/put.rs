//! Insert dialog and its disk-access handshake.
//!
//! A node that may not read the upload file answers `ProtocolError` code 25.
//! The fold then proves access to the file's directory with
//! `TestDDARequest`, `TestDDAReply`, `TestDDAResponse` and `TestDDAComplete`,
//! and sends the insert again once the node agrees.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{
    DIRECT_DISK_ACCESS_DENIED_CODE, DIRECTORY_FIELD, IDENTIFIER_COLLISION, PROTOCOL_ERROR,
    PUT_FAILED, PUT_SUCCESSFUL, SIMPLE_PROGRESS, TEST_DDA_COMPLETE, TEST_DDA_REPLY,
    URI_FIELD, URI_GENERATED,
};
use crate::requests::{FAILED_TO_READ, PutRequest, test_dda_request, test_dda_response};

use super::DIALOG_TARGET;
use super::fold::{Effect, Fold, Notice, Outcome, RequestProgress};

/// Progress of the disk-access handshake of an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdaState {
    /// The insert was sent and no handshake is running.
    Sent,
    /// `TestDDARequest` was sent; waiting for the node's challenge.
    AwaitingDirectoryProbe {
        /// Directory being verified.
        directory: String,
    },
    /// The challenge was answered; waiting for the verdict.
    AwaitingHandshakeConfirm {
        /// Directory being verified.
        directory: String,
    },
    /// The insert was sent again after a successful handshake.
    Resent,
}

impl DdaState {
    fn directory(&self) -> Option<&str> {
        match self {
            Self::AwaitingDirectoryProbe { directory }
            | Self::AwaitingHandshakeConfirm { directory } => Some(directory),
            Self::Sent | Self::Resent => None,
        }
    }
}

/// Insert dialog that runs the disk-access handshake when the node asks.
#[derive(Debug, Clone)]
pub struct PutFold {
    identifier: String,
    request: PutRequest,
    state: DdaState,
}

impl PutFold {
    /// Tracks `request`, sent under `identifier`.
    #[must_use]
    pub fn new(identifier: impl Into<String>, request: PutRequest) -> Self {
        Self {
            identifier: identifier.into(),
            request,
            state: DdaState::Sent,
        }
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> &DdaState {
        &self.state
    }

    fn on_protocol_error(&mut self, frame: &Frame) -> Outcome<String> {
        if frame.code() != Some(DIRECT_DISK_ACCESS_DENIED_CODE) {
            return Outcome::Fail(FcpError::protocol_failure(frame));
        }
        if self.state == DdaState::Resent {
            warn!(
                target: DIALOG_TARGET,
                identifier = %self.identifier,
                "node refused disk access again after a completed handshake"
            );
            return Outcome::Fail(FcpError::protocol_failure(frame));
        }
        let Some(directory) = self.request.upload_directory() else {
            return Outcome::Fail(FcpError::protocol_failure(frame));
        };

        debug!(
            target: DIALOG_TARGET,
            identifier = %self.identifier,
            directory = %directory,
            "starting disk access handshake"
        );
        let request = test_dda_request(&directory);
        self.state = DdaState::AwaitingDirectoryProbe {
            directory: directory.clone(),
        };
        Outcome::Continue(vec![
            Effect::WatchDirectory(directory),
            Effect::Send(request),
        ])
    }

    fn on_dda_reply(&mut self, frame: &Frame) -> Outcome<String> {
        let Some(directory) = self.challenge_directory(frame) else {
            return Outcome::proceed();
        };

        let content = match frame.field("ReadFilename") {
            Some(path) => read_first_line(Path::new(path)).unwrap_or_else(|error| {
                warn!(
                    target: DIALOG_TARGET,
                    identifier = %self.identifier,
                    error = %error,
                    "answering disk access challenge without file content"
                );
                FAILED_TO_READ.to_owned()
            }),
            None => FAILED_TO_READ.to_owned(),
        };

        let response = test_dda_response(&directory, &content);
        self.state = DdaState::AwaitingHandshakeConfirm { directory };
        Outcome::effect(Effect::Send(response))
    }

    fn on_handshake_complete(&mut self, frame: &Frame) -> Outcome<String> {
        let Some(directory) = self.challenge_directory(frame) else {
            return Outcome::proceed();
        };

        if frame.flag("ReadDirectoryAllowed") == Some(false) {
            return Outcome::Fail(FcpError::ProtocolFailure {
                message: frame.name().to_owned(),
                code: None,
                description: Some(format!("node may not read {directory}")),
            });
        }

        debug!(
            target: DIALOG_TARGET,
            identifier = %self.identifier,
            directory = %directory,
            "disk access granted; resending insert"
        );
        self.state = DdaState::Resent;
        Outcome::Continue(vec![
            Effect::UnwatchDirectory(directory),
            Effect::Send(self.request.to_frame(&self.identifier)),
        ])
    }

    /// Directory of a handshake frame addressed to the running handshake.
    fn challenge_directory(&self, frame: &Frame) -> Option<String> {
        let expected = self.state.directory()?;
        if frame.field(DIRECTORY_FIELD) == Some(expected) {
            Some(expected.to_owned())
        } else {
            debug!(
                target: DIALOG_TARGET,
                identifier = %self.identifier,
                message = %frame.name(),
                directory = ?frame.field(DIRECTORY_FIELD),
                "ignoring handshake frame for another directory"
            );
            None
        }
    }
}

impl Fold for PutFold {
    type Output = String;

    fn fold(&mut self, frame: Frame) -> Outcome<String> {
        match frame.name() {
            PUT_SUCCESSFUL => Outcome::Complete(
                frame
                    .field(URI_FIELD)
                    .unwrap_or(self.request.uri.as_str())
                    .to_owned(),
            ),
            PUT_FAILED | IDENTIFIER_COLLISION => Outcome::Fail(FcpError::protocol_failure(&frame)),
            PROTOCOL_ERROR => self.on_protocol_error(&frame),
            TEST_DDA_REPLY => self.on_dda_reply(&frame),
            TEST_DDA_COMPLETE => self.on_handshake_complete(&frame),
            SIMPLE_PROGRESS => Outcome::effect(Effect::Notify(Notice::Progress(
                RequestProgress::from_frame(&frame),
            ))),
            URI_GENERATED => match frame.field(URI_FIELD) {
                Some(uri) => Outcome::effect(Effect::Notify(Notice::KeyGenerated(uri.to_owned()))),
                None => Outcome::proceed(),
            },
            _ => Outcome::proceed(),
        }
    }
}

fn read_first_line(path: &Path) -> Result<String, FcpError> {
    let content = fs::read_to_string(path).map_err(|source| FcpError::UnreadableResource {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })?;
    Ok(content.lines().next().unwrap_or_default().to_owned())
}
