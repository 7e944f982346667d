//! Dialog engine for the Freenet Client Protocol 2.0.
//!
//! One socket to the node carries many concurrent exchanges, each tagged
//! with an `Identifier`. The engine owns that socket: it greets the node,
//! frames and parses messages, routes every incoming frame to the dialog it
//! belongs to, and resolves a [`DialogHandle`] per request. Fetches follow
//! permanent redirects and inserts run the disk-access handshake without the
//! caller noticing; subscriptions stay open and fan updates out to
//! listeners until cancelled.
//!
//! [`FcpClient`] is the entry point. It connects lazily from a
//! [`fcp_config::Config`], reuses one connection for every command and
//! reconnects after a failure. Lower-level users can drive a [`Connection`]
//! directly with their own [`Fold`].

mod client;
mod codec;
mod connection;
mod dialog;
mod errors;
mod executor;
mod frame;
mod identifier;
pub mod message;
mod registry;
pub mod requests;
mod subscription;
pub mod telemetry;
mod transport;

pub use client::FcpClient;
pub use codec::{DATA, END_MESSAGE, FrameReader, encode};
pub use connection::{Connection, NodeGreeting};
pub use dialog::{
    DEFAULT_MIME_TYPE, DdaState, DialogHandle, Effect, FetchedData, Fold, GetFold, Notice,
    NoticeListener, NoticeListeners, Outcome, PutFold, RequestProgress, TerminalFold,
};
pub use errors::FcpError;
pub use frame::Frame;
pub use identifier::{IdentifierGenerator, SequentialIdentifiers};
pub use requests::{GetRequest, Priority, PutRequest, PutSource};
pub use subscription::{Subscription, SubscriptionSpec, UpdateListener, UskUpdate};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
