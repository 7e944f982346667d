//! Outcomes, effects and notices shared by every dialog.

use std::fmt;
use std::sync::Arc;

use crate::errors::FcpError;
use crate::frame::Frame;

/// Side effects a dialog reports while it continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A fetch was permanently redirected to this key.
    Redirect(String),
    /// Progress counters of a running request.
    Progress(RequestProgress),
    /// The final key of an insert is known.
    KeyGenerated(String),
}

/// Block counters from a `SimpleProgress` frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestProgress {
    /// Total blocks.
    pub total: u64,
    /// Blocks required for success.
    pub required: u64,
    /// Blocks that failed.
    pub failed: u64,
    /// Blocks that failed fatally.
    pub fatally_failed: u64,
    /// Milliseconds since the epoch of the last progress, if reported.
    pub last_progress: Option<u64>,
    /// Blocks that succeeded.
    pub succeeded: u64,
    /// Whether `total` is final.
    pub finalized_total: bool,
    /// Minimum blocks a fetch needs.
    pub min_success_fetch_blocks: u64,
}

impl RequestProgress {
    /// Reads the counters; missing or unparsable values count as zero.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        let count = |name: &str| {
            frame
                .field(name)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(0)
        };
        Self {
            total: count("Total"),
            required: count("Required"),
            failed: count("Failed"),
            fatally_failed: count("FatallyFailed"),
            last_progress: frame
                .field("LastProgress")
                .and_then(|value| value.trim().parse().ok()),
            succeeded: count("Succeeded"),
            finalized_total: frame.flag("FinalizedTotal").unwrap_or(false),
            min_success_fetch_blocks: count("MinSuccessFetchBlocks"),
        }
    }
}

/// Work a fold asks the engine to carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Deliver a notice to the dialog's listeners.
    Notify(Notice),
    /// Send a frame to the node.
    Send(Frame),
    /// Route disk-access frames for this directory to the dialog.
    WatchDirectory(String),
    /// Stop routing disk-access frames for this directory to the dialog.
    UnwatchDirectory(String),
}

/// Result of folding one frame into a dialog.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Stay registered after applying the effects.
    Continue(Vec<Effect>),
    /// Resolve the handle with a value and deregister.
    Complete(T),
    /// Resolve the handle with an error and deregister.
    Fail(FcpError),
}

impl<T> Outcome<T> {
    /// Continue without effects.
    #[must_use]
    pub const fn proceed() -> Self {
        Self::Continue(Vec::new())
    }

    /// Continue after a single effect.
    #[must_use]
    pub fn effect(effect: Effect) -> Self {
        Self::Continue(vec![effect])
    }
}

/// State machine driving one dialog.
///
/// The reader thread is the only caller, one frame at a time, in the order
/// the node sent them.
pub trait Fold: Send + 'static {
    /// Value the dialog completes with.
    type Output: Send + 'static;

    /// Folds the next frame addressed to this dialog.
    fn fold(&mut self, frame: Frame) -> Outcome<Self::Output>;
}

/// Callback receiving a dialog's notices.
pub type NoticeListener = Arc<dyn Fn(&Notice) + Send + Sync>;

/// Listeners attached to a dialog when it is opened.
#[derive(Clone, Default)]
pub struct NoticeListeners {
    listeners: Vec<NoticeListener>,
    wants_progress: bool,
}

impl NoticeListeners {
    /// No listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for every notice.
    #[must_use]
    pub fn with(mut self, listener: impl Fn(&Notice) + Send + Sync + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Adds a listener for redirect targets.
    #[must_use]
    pub fn on_redirect(self, listener: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.with(move |notice| {
            if let Notice::Redirect(uri) = notice {
                listener(uri);
            }
        })
    }

    /// Adds a listener for progress counters.
    #[must_use]
    pub fn on_progress(mut self, listener: impl Fn(&RequestProgress) + Send + Sync + 'static) -> Self {
        self.wants_progress = true;
        self.with(move |notice| {
            if let Notice::Progress(progress) = notice {
                listener(progress);
            }
        })
    }

    /// Adds a listener for generated keys.
    #[must_use]
    pub fn on_key_generated(self, listener: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.with(move |notice| {
            if let Notice::KeyGenerated(uri) = notice {
                listener(uri);
            }
        })
    }

    /// True when a progress listener is attached.
    #[must_use]
    pub const fn wants_progress(&self) -> bool {
        self.wants_progress
    }

    /// True when no listener is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn notify(&self, notice: &Notice) {
        for listener in &self.listeners {
            listener(notice);
        }
    }
}

impl fmt::Debug for NoticeListeners {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NoticeListeners")
            .field("listeners", &self.listeners.len())
            .field("wants_progress", &self.wants_progress)
            .finish()
    }
}
