//! Open-ended dialogs that push updates to listeners until cancelled.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::dialog::Completion;
use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::{
    IDENTIFIER_COLLISION, PROTOCOL_ERROR, SUBSCRIBED_USK, SUBSCRIBED_USK_UPDATE, URI_FIELD,
};
use crate::registry::{Delivery, Driver};
use crate::requests::unsubscribe_usk;

const SUBSCRIPTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::subscription");

/// Callback receiving every update frame of a subscription.
pub type UpdateListener = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Message shapes of one kind of subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Message type that activates the subscription.
    pub ack: String,
    /// Message type delivered to listeners.
    pub update: String,
    /// Frame that ends the subscription on the node.
    pub unsubscribe: Frame,
}

impl SubscriptionSpec {
    /// Describes a subscription acknowledged by `ack` that pushes `update`.
    #[must_use]
    pub fn new(ack: impl Into<String>, update: impl Into<String>, unsubscribe: Frame) -> Self {
        Self {
            ack: ack.into(),
            update: update.into(),
            unsubscribe,
        }
    }

    /// USK edition updates for the subscription registered as `identifier`.
    #[must_use]
    pub fn usk(identifier: &str) -> Self {
        Self::new(SUBSCRIBED_USK, SUBSCRIBED_USK_UPDATE, unsubscribe_usk(identifier))
    }
}

/// New edition announced by `SubscribedUSKUpdate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UskUpdate {
    /// Key of the new edition.
    pub uri: String,
    /// Edition number.
    pub edition: u64,
}

impl UskUpdate {
    /// Reads an update frame; `None` when `URI` or `Edition` is missing.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        Some(Self {
            uri: frame.field(URI_FIELD)?.to_owned(),
            edition: frame.field("Edition")?.trim().parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Active,
    Closed,
}

struct Shared {
    identifier: String,
    unsubscribe: Frame,
    listeners: Mutex<Vec<UpdateListener>>,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> Vec<UpdateListener> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close(&self) -> bool {
        let mut state = self.state();
        let was_open = *state != State::Closed;
        *state = State::Closed;
        was_open
    }
}

/// An active subscription. Clones share listeners and state.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
    connection: Weak<Connection>,
}

impl Subscription {
    /// Identifier the subscription is registered under.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// Adds a listener for updates delivered from now on.
    pub fn add_listener(&self, listener: impl Fn(&Frame) + Send + Sync + 'static) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Adds a listener for parsed USK edition updates.
    pub fn on_usk_update(&self, listener: impl Fn(&UskUpdate) + Send + Sync + 'static) {
        self.add_listener(move |frame| {
            if let Some(update) = UskUpdate::from_frame(frame) {
                listener(&update);
            }
        });
    }

    /// False once cancelled or after the connection failed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.shared.state() == State::Active
    }

    /// Ends the subscription.
    ///
    /// The unsubscribe frame is written and the identifier removed from the
    /// registry; updates still in flight are dropped. Cancelling twice, or
    /// after the connection died, succeeds without sending anything.
    ///
    /// # Errors
    ///
    /// Returns the write error if the unsubscribe frame could not be sent.
    /// The subscription is closed locally either way.
    pub fn cancel(&self) -> Result<(), FcpError> {
        if *self.shared.state() == State::Closed {
            return Ok(());
        }
        let Some(connection) = self.connection.upgrade() else {
            self.shared.close();
            return Ok(());
        };

        let sent = connection.send(&self.shared.unsubscribe);
        connection.registry().deregister(&self.shared.identifier);
        self.shared.close();
        match &sent {
            Ok(()) => info!(
                target: SUBSCRIPTION_TARGET,
                identifier = %self.shared.identifier,
                connection = connection.id(),
                "subscription cancelled"
            ),
            Err(error) => warn!(
                target: SUBSCRIPTION_TARGET,
                identifier = %self.shared.identifier,
                error = %error,
                "subscription closed locally; unsubscribe not sent"
            ),
        }
        sent
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("identifier", &self.shared.identifier)
            .field("state", &*self.shared.state())
            .finish_non_exhaustive()
    }
}

/// Registry entry of a subscription.
pub(crate) struct SubscriptionDriver {
    shared: Arc<Shared>,
    connection: Weak<Connection>,
    ack: String,
    update: String,
    activation: Completion<Subscription>,
}

impl SubscriptionDriver {
    pub(crate) fn new(
        identifier: &str,
        spec: SubscriptionSpec,
        connection: Weak<Connection>,
        activation: Completion<Subscription>,
    ) -> Self {
        let SubscriptionSpec {
            ack,
            update,
            unsubscribe,
        } = spec;
        Self {
            shared: Arc::new(Shared {
                identifier: identifier.to_owned(),
                unsubscribe,
                listeners: Mutex::new(Vec::new()),
                state: Mutex::new(State::Pending),
            }),
            connection,
            ack,
            update,
            activation,
        }
    }

    fn handle(&self) -> Subscription {
        Subscription {
            shared: Arc::clone(&self.shared),
            connection: self.connection.clone(),
        }
    }

    fn activate(&mut self) {
        *self.shared.state() = State::Active;
        debug!(
            target: SUBSCRIPTION_TARGET,
            identifier = %self.shared.identifier,
            "subscription active"
        );
        let subscription = self.handle();
        self.activation.resolve(Ok(subscription));
    }

    /// Queues the update for the listeners registered right now.
    fn publish(&self, frame: Frame) -> Delivery {
        let listeners = self.shared.listeners();
        let mut delivery = Delivery::default();
        if !listeners.is_empty() {
            delivery.callbacks.push(Box::new(move || {
                for listener in &listeners {
                    listener(&frame);
                }
            }));
        }
        delivery
    }

    fn refuse(&mut self, frame: &Frame, state: State) -> Delivery {
        self.shared.close();
        let error = FcpError::protocol_failure(frame);
        if state == State::Pending {
            self.activation.resolve(Err(error));
        } else {
            warn!(
                target: SUBSCRIPTION_TARGET,
                identifier = %self.shared.identifier,
                error = %error,
                "node ended the subscription"
            );
        }
        Delivery::finished()
    }
}

impl Driver for SubscriptionDriver {
    fn deliver(&mut self, frame: Frame) -> Delivery {
        let state = *self.shared.state();
        match state {
            State::Closed => Delivery::finished(),
            State::Pending if frame.is(&self.ack) => {
                self.activate();
                Delivery::default()
            }
            State::Active if frame.is(&self.update) => self.publish(frame),
            _ if frame.is(PROTOCOL_ERROR) || frame.is(IDENTIFIER_COLLISION) => {
                self.refuse(&frame, state)
            }
            _ => {
                debug!(
                    target: SUBSCRIPTION_TARGET,
                    identifier = %self.shared.identifier,
                    message = %frame.name(),
                    "ignoring frame"
                );
                Delivery::default()
            }
        }
    }

    fn abort(&mut self, error: &FcpError) {
        if self.shared.close() {
            debug!(
                target: SUBSCRIPTION_TARGET,
                identifier = %self.shared.identifier,
                error = %error,
                "subscription closed with its connection"
            );
        }
        self.activation.resolve(Err(error.clone()));
    }
}
