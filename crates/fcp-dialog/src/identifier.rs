//! Correlation token generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of fresh correlation tokens.
///
/// Any `Fn() -> String` closure is a generator, which lets tests pin
/// identifiers to known values.
pub trait IdentifierGenerator: Send + Sync {
    /// Returns the next token.
    fn next_identifier(&self) -> String;
}

impl<F> IdentifierGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn next_identifier(&self) -> String {
        self()
    }
}

/// Default generator yielding `<prefix>-<n>` from its own counter.
#[derive(Debug)]
pub struct SequentialIdentifiers {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdentifiers {
    /// Creates a generator whose tokens start with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdentifierGenerator for SequentialIdentifiers {
    fn next_identifier(&self) -> String {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence}", self.prefix)
    }
}
