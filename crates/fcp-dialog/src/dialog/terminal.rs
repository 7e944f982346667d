//! Request/reply dialogs.

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{IDENTIFIER_COLLISION, PROTOCOL_ERROR};

use super::fold::{Fold, Outcome};

/// Fold for request/reply commands: completes with the first success frame.
///
/// `ProtocolError` and `IdentifierCollision` fail the dialog unless more
/// failure types are added; anything else is ignored.
#[derive(Debug, Clone)]
pub struct TerminalFold {
    success: Vec<String>,
    failure: Vec<String>,
}

impl TerminalFold {
    /// Completes on any of the `success` message types.
    #[must_use]
    pub fn new(success: &[&str]) -> Self {
        Self {
            success: success.iter().map(|name| (*name).to_owned()).collect(),
            failure: vec![PROTOCOL_ERROR.to_owned(), IDENTIFIER_COLLISION.to_owned()],
        }
    }

    /// Also fails on `message`.
    #[must_use]
    pub fn failing_on(mut self, message: &str) -> Self {
        self.failure.push(message.to_owned());
        self
    }
}

impl Fold for TerminalFold {
    type Output = Frame;

    fn fold(&mut self, frame: Frame) -> Outcome<Frame> {
        if self.success.iter().any(|name| frame.is(name)) {
            Outcome::Complete(frame)
        } else if self.failure.iter().any(|name| frame.is(name)) {
            Outcome::Fail(FcpError::protocol_failure(&frame))
        } else {
            Outcome::proceed()
        }
    }
}
