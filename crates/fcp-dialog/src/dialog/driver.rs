//! Registry entry that runs a fold and resolves its handle.
//!
//! Notices are handed back to the dispatcher instead of being delivered
//! here, so listeners never run under the dialog's lock.

use tracing::debug;

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::registry::{Delivery, Driver};

use super::DIALOG_TARGET;
use super::fold::{Effect, Fold, Notice, NoticeListeners, Outcome};
use super::handle::Completion;

/// Registry entry running a [`Fold`] and resolving its handle.
pub(crate) struct DialogDriver<F: Fold> {
    identifier: String,
    fold: F,
    completion: Completion<F::Output>,
    listeners: NoticeListeners,
}

impl<F: Fold> DialogDriver<F> {
    pub(crate) fn new(
        identifier: &str,
        fold: F,
        listeners: NoticeListeners,
        completion: Completion<F::Output>,
    ) -> Self {
        Self {
            identifier: identifier.to_owned(),
            fold,
            completion,
            listeners,
        }
    }

    fn queue_notice(&self, delivery: &mut Delivery, notice: Notice) {
        if self.listeners.is_empty() {
            return;
        }
        let listeners = self.listeners.clone();
        delivery
            .callbacks
            .push(Box::new(move || listeners.notify(&notice)));
    }
}

impl<F: Fold> Driver for DialogDriver<F> {
    fn deliver(&mut self, frame: Frame) -> Delivery {
        if self.completion.is_resolved() {
            return Delivery::finished();
        }

        let message = frame.name().to_owned();
        match self.fold.fold(frame) {
            Outcome::Continue(effects) => {
                let mut delivery = Delivery::default();
                for effect in effects {
                    match effect {
                        Effect::Notify(notice) => self.queue_notice(&mut delivery, notice),
                        Effect::Send(frame) => delivery.outgoing.push(frame),
                        Effect::WatchDirectory(directory) => delivery.watch.push(directory),
                        Effect::UnwatchDirectory(directory) => delivery.unwatch.push(directory),
                    }
                }
                delivery
            }
            Outcome::Complete(value) => {
                debug!(
                    target: DIALOG_TARGET,
                    identifier = %self.identifier,
                    message = %message,
                    "dialog completed"
                );
                self.completion.resolve(Ok(value));
                Delivery::finished()
            }
            Outcome::Fail(error) => {
                debug!(
                    target: DIALOG_TARGET,
                    identifier = %self.identifier,
                    message = %message,
                    error = %error,
                    "dialog failed"
                );
                self.completion.resolve(Err(error));
                Delivery::finished()
            }
        }
    }

    fn abort(&mut self, error: &FcpError) {
        self.completion.resolve(Err(error.clone()));
    }
}
