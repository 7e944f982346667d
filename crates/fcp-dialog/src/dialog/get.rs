//! Fetch dialog.
//!
//! A permanent redirect (`GetFailed` with code 27) is followed in place: the
//! fold notifies listeners and sends `ClientGet` again for the new key under
//! the same identifier.

use tracing::debug;

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{
    ALL_DATA, GET_FAILED, IDENTIFIER_COLLISION, PERMANENT_REDIRECT_CODE, PROTOCOL_ERROR,
    SIMPLE_PROGRESS,
};
use crate::requests::GetRequest;

use super::DIALOG_TARGET;
use super::fold::{Effect, Fold, Notice, Outcome, RequestProgress};

/// MIME type assumed when the node does not report one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Content returned by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedData {
    /// `Metadata.ContentType` of the result.
    pub mime_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

impl FetchedData {
    fn from_frame(frame: Frame) -> Self {
        let mime_type = frame
            .field("Metadata.ContentType")
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_owned();
        Self {
            mime_type,
            data: frame.into_payload().unwrap_or_default(),
        }
    }
}

/// Fetch dialog that follows permanent redirects under its own identifier.
#[derive(Debug, Clone)]
pub struct GetFold {
    identifier: String,
    request: GetRequest,
    redirects: u32,
    max_redirects: Option<u32>,
}

impl GetFold {
    /// Tracks `request`, sent under `identifier`.
    #[must_use]
    pub fn new(identifier: impl Into<String>, request: GetRequest) -> Self {
        Self {
            identifier: identifier.into(),
            request,
            redirects: 0,
            max_redirects: None,
        }
    }

    /// Fails the fetch once more than `limit` redirects were followed.
    #[must_use]
    pub const fn with_max_redirects(mut self, limit: Option<u32>) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Key currently being fetched.
    #[must_use]
    pub fn current_uri(&self) -> &str {
        &self.request.uri
    }

    /// Number of redirects followed so far.
    #[must_use]
    pub const fn redirects(&self) -> u32 {
        self.redirects
    }

    fn follow_redirect(&mut self, frame: &Frame) -> Outcome<FetchedData> {
        let Some(target) = frame.field("RedirectURI") else {
            return Outcome::Fail(FcpError::protocol_failure(frame));
        };
        if let Some(limit) = self.max_redirects
            && self.redirects >= limit
        {
            return Outcome::Fail(FcpError::TooManyRedirects { limit });
        }

        debug!(
            target: DIALOG_TARGET,
            identifier = %self.identifier,
            from = %self.request.uri,
            to = %target,
            "following permanent redirect"
        );
        self.redirects += 1;
        self.request.uri = target.to_owned();
        Outcome::Continue(vec![
            Effect::Notify(Notice::Redirect(target.to_owned())),
            Effect::Send(self.request.to_frame(&self.identifier)),
        ])
    }
}

impl Fold for GetFold {
    type Output = FetchedData;

    fn fold(&mut self, frame: Frame) -> Outcome<FetchedData> {
        match frame.name() {
            ALL_DATA => Outcome::Complete(FetchedData::from_frame(frame)),
            GET_FAILED if frame.code() == Some(PERMANENT_REDIRECT_CODE) => {
                self.follow_redirect(&frame)
            }
            GET_FAILED | PROTOCOL_ERROR | IDENTIFIER_COLLISION => {
                Outcome::Fail(FcpError::protocol_failure(&frame))
            }
            SIMPLE_PROGRESS => Outcome::effect(Effect::Notify(Notice::Progress(
                RequestProgress::from_frame(&frame),
            ))),
            _ => Outcome::proceed(),
        }
    }
}
