//! Routing of incoming frames to the dialogs registered on one connection.
//!
//! Frames carry the `Identifier` of the dialog they belong to, except the
//! disk-access handshake replies which only name a directory. Dialogs that
//! run the handshake watch that directory for the duration.
//!
//! Every dialog sits behind its own lock. A frame is folded with only that
//! lock held; the table lock is taken briefly before and after. Listener
//! callbacks run and outgoing frames are written once both are released,
//! so a listener may close the connection or cancel its own dialog.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{DIRECTORY_FIELD, TEST_DDA_COMPLETE, TEST_DDA_REPLY};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// A registered dialog as the dispatcher sees it.
pub(crate) trait Driver: Send {
    /// Consumes the next frame routed to this dialog.
    fn deliver(&mut self, frame: Frame) -> Delivery;

    /// Ends the dialog because its connection is gone.
    fn abort(&mut self, error: &FcpError);
}

/// Listener work deferred until no registry lock is held.
pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// What the dispatcher must do after a delivery.
#[derive(Default)]
pub(crate) struct Delivery {
    pub(crate) callbacks: Vec<Callback>,
    pub(crate) outgoing: Vec<Frame>,
    pub(crate) watch: Vec<String>,
    pub(crate) unwatch: Vec<String>,
    pub(crate) finished: bool,
}

impl Delivery {
    pub(crate) fn finished() -> Self {
        Self {
            finished: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: Self) {
        self.callbacks.extend(other.callbacks);
        self.outgoing.extend(other.outgoing);
    }

    /// Runs and drops the queued callbacks in order.
    pub(crate) fn run_callbacks(&mut self) {
        for callback in self.callbacks.drain(..) {
            callback();
        }
    }
}

/// Destination for frames dialogs send in reaction to a delivery.
pub(crate) trait FrameSink {
    fn send_frame(&self, frame: &Frame) -> Result<(), FcpError>;
}

type Entry = Arc<Mutex<Box<dyn Driver>>>;

#[derive(Default)]
struct Table {
    entries: HashMap<String, Entry>,
    watchers: HashMap<String, Vec<String>>,
    closed: Option<FcpError>,
}

impl Table {
    fn forget_watches(&mut self, identifier: &str) {
        self.watchers.retain(|_, tokens| {
            tokens.retain(|token| token != identifier);
            !tokens.is_empty()
        });
    }

    fn targets(&self, frame: &Frame) -> Vec<(String, Entry)> {
        let tokens: Vec<&str> = if frame.is(TEST_DDA_REPLY) || frame.is(TEST_DDA_COMPLETE) {
            frame
                .field(DIRECTORY_FIELD)
                .and_then(|directory| self.watchers.get(directory))
                .map(|tokens| tokens.iter().map(String::as_str).collect())
                .unwrap_or_default()
        } else {
            frame.identifier().into_iter().collect()
        };

        tokens
            .into_iter()
            .filter_map(|token| {
                self.entries
                    .get(token)
                    .map(|entry| (token.to_owned(), Arc::clone(entry)))
            })
            .collect()
    }
}

/// Dialogs registered on one connection, keyed by identifier.
#[derive(Default)]
pub(crate) struct DialogRegistry {
    table: Mutex<Table>,
}

impl DialogRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a dialog under `identifier`.
    ///
    /// The driver is aborted with the returned error when registration is
    /// refused, so its handle never hangs.
    pub(crate) fn register(
        &self,
        identifier: &str,
        mut driver: Box<dyn Driver>,
    ) -> Result<(), FcpError> {
        let refusal = {
            let mut table = self.table();
            if let Some(error) = &table.closed {
                error.clone()
            } else if table.entries.contains_key(identifier) {
                FcpError::DuplicateIdentifier {
                    identifier: identifier.to_owned(),
                }
            } else {
                table
                    .entries
                    .insert(identifier.to_owned(), Arc::new(Mutex::new(driver)));
                return Ok(());
            }
        };

        driver.abort(&refusal);
        Err(refusal)
    }

    /// Removes a dialog without resolving it. Returns whether it was present.
    pub(crate) fn deregister(&self, identifier: &str) -> bool {
        let mut table = self.table();
        table.forget_watches(identifier);
        table.entries.remove(identifier).is_some()
    }

    /// Removes one dialog and resolves it with `error`.
    pub(crate) fn abort(&self, identifier: &str, error: &FcpError) -> bool {
        let entry = {
            let mut table = self.table();
            table.forget_watches(identifier);
            table.entries.remove(identifier)
        };
        let Some(entry) = entry else {
            return false;
        };
        entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort(error);
        true
    }

    pub(crate) fn contains(&self, identifier: &str) -> bool {
        self.table().entries.contains_key(identifier)
    }

    pub(crate) fn len(&self) -> usize {
        self.table().entries.len()
    }

    /// Delivers `frame` to every dialog it is addressed to.
    pub(crate) fn dispatch(&self, frame: Frame, sink: &dyn FrameSink) {
        let mut targets = self.table().targets(&frame);
        let Some(last) = targets.pop() else {
            debug!(
                target: DISPATCH_TARGET,
                message = %frame.name(),
                identifier = ?frame.identifier(),
                directory = ?frame.field(DIRECTORY_FIELD),
                "dropping frame no dialog is waiting for"
            );
            return;
        };

        let mut pending = Delivery::default();
        for (identifier, entry) in targets {
            pending.absorb(self.deliver(&identifier, &entry, frame.clone()));
        }
        let (identifier, entry) = last;
        pending.absorb(self.deliver(&identifier, &entry, frame));

        pending.run_callbacks();
        for frame in pending.outgoing {
            if let Err(error) = sink.send_frame(&frame) {
                debug!(
                    target: DISPATCH_TARGET,
                    message = %frame.name(),
                    error = %error,
                    "dialog reply not sent"
                );
                break;
            }
        }
    }

    fn deliver(&self, identifier: &str, entry: &Entry, frame: Frame) -> Delivery {
        let delivery = entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deliver(frame);
        self.settle(identifier, entry, delivery)
    }

    /// Applies the table changes of a delivery; returns what is left to run
    /// once the locks are gone.
    fn settle(&self, identifier: &str, entry: &Entry, delivery: Delivery) -> Delivery {
        let Delivery {
            callbacks,
            outgoing,
            watch,
            unwatch,
            finished,
        } = delivery;
        let leftover = Delivery {
            callbacks,
            outgoing,
            ..Delivery::default()
        };

        let mut table = self.table();
        let still_registered = table
            .entries
            .get(identifier)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if !still_registered {
            return Delivery::default();
        }

        if finished {
            table.entries.remove(identifier);
            table.forget_watches(identifier);
            return leftover;
        }

        for directory in unwatch {
            if let Some(tokens) = table.watchers.get_mut(&directory) {
                tokens.retain(|token| token != identifier);
                if tokens.is_empty() {
                    table.watchers.remove(&directory);
                }
            }
        }
        for directory in watch {
            let tokens = table.watchers.entry(directory).or_default();
            if !tokens.iter().any(|token| token == identifier) {
                tokens.push(identifier.to_owned());
            }
        }
        leftover
    }

    /// Aborts every dialog with `error` and refuses later registrations.
    ///
    /// Returns how many dialogs were aborted.
    pub(crate) fn fail_all(&self, error: &FcpError) -> usize {
        let drained: Vec<Entry> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(error.clone());
            }
            table.watchers.clear();
            table.entries.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &drained {
            entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .abort(error);
        }
        drained.len()
    }
}
