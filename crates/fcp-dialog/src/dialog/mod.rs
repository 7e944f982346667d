//! Per-request state machines.
//!
//! A dialog is every frame exchanged under one `Identifier`, from the request
//! to its terminal reply. Each dialog is driven by a [`Fold`] that consumes
//! frames in arrival order and answers with an [`Outcome`]:
//!
//! - [`TerminalFold`]: request/reply commands such as `GenerateSSK`
//! - [`GetFold`]: fetches, following permanent redirects in place
//! - [`PutFold`]: inserts, running the disk-access handshake on demand
//!
//! Callers observe the result through a [`DialogHandle`] and intermediate
//! events through [`NoticeListeners`].

mod driver;
mod fold;
mod get;
mod handle;
mod put;
mod terminal;

pub(crate) const DIALOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dialog");

pub(crate) use driver::DialogDriver;
pub use fold::{Effect, Fold, Notice, NoticeListener, NoticeListeners, Outcome, RequestProgress};
pub use get::{DEFAULT_MIME_TYPE, FetchedData, GetFold};
pub(crate) use handle::{Completion, completion_pair};
pub use handle::DialogHandle;
pub use put::{DdaState, PutFold};
pub use terminal::TerminalFold;
