//! In-memory form of an FCP message.

use std::fmt;

use crate::message::{CODE_FIELD, DATA_LENGTH_FIELD, IDENTIFIER_FIELD};

/// One FCP message: a type name, ordered fields, and an optional payload.
///
/// Field order is preserved as received. Lookups return the first field with
/// a given name; metadata keys such as `Metadata.ContentType` are opaque
/// paths and are never split or merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    name: String,
    fields: Vec<(String, String)>,
    payload: Option<Vec<u8>>,
}

impl Frame {
    /// Creates a frame with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            payload: None,
        }
    }

    /// Sets a field, consuming and returning the frame.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Attaches a payload, consuming and returning the frame.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Message type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the frame has the given message type.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// First value of the named field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Replaces the first field with this name, or appends it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Appends a field even if one with the same name exists.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Raw payload following a `Data` terminator.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
    }

    /// Takes the payload out of the frame.
    #[must_use]
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }

    /// Correlation token, if the frame carries one.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.field(IDENTIFIER_FIELD)
    }

    /// Numeric `Code` field.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        self.field(CODE_FIELD).and_then(|code| code.trim().parse().ok())
    }

    /// Declared payload length.
    #[must_use]
    pub fn data_length(&self) -> Option<u64> {
        self.field(DATA_LENGTH_FIELD)
            .and_then(|length| length.trim().parse().ok())
    }

    /// Parses a boolean field written as `true` or `false`.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.field(name)?.trim() {
            value if value.eq_ignore_ascii_case("true") => Some(true),
            value if value.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identifier() {
            Some(identifier) => write!(formatter, "{} [{identifier}]", self.name),
            None => formatter.write_str(&self.name),
        }
    }
}
