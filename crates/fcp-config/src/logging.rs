//! Output format of the engine's log lines.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How log events are rendered on stderr.
///
/// Accepted spellings are `json` and `compact`, in any letter case.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with fields flattened to the top level.
    #[default]
    Json,
    /// Terse single-line text.
    Compact,
}

impl LogFormat {
    /// True for machine-readable output.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Returned when a log format name is not recognised.
pub type LogFormatParseError = strum::ParseError;
