//! Line framing for FCP messages.
//!
//! Every message is a type line, any number of `Key=Value` lines, and a
//! terminator:
//! ```text
//! MessageType\n
//! Key=Value\n
//! EndMessage\n
//! ```
//! A `Data` terminator instead of `EndMessage` announces a payload of exactly
//! `DataLength` raw bytes immediately after the terminator line.

use std::io::{self, BufRead, Read};

use crate::errors::FcpError;
use crate::frame::Frame;
use crate::message::DATA_LENGTH_FIELD;

/// Terminator of a frame without payload.
pub const END_MESSAGE: &str = "EndMessage";
/// Terminator of a frame followed by a payload.
pub const DATA: &str = "Data";

/// Serialises a frame to wire bytes.
///
/// A frame with a payload is written with a `DataLength` matching the payload
/// and the `Data` terminator; a stale `DataLength` field is replaced.
///
/// # Errors
///
/// Returns [`FcpError::InvalidField`] when a name or value would break line
/// framing.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FcpError> {
    check_name(frame.name())?;
    let mut out = Vec::with_capacity(64 + frame.payload().map_or(0, <[u8]>::len));
    push_line(&mut out, frame.name());

    for (name, value) in frame.fields() {
        if frame.payload().is_some() && name == DATA_LENGTH_FIELD {
            continue;
        }
        check_name(name)?;
        if name.contains('=') {
            return Err(FcpError::InvalidField {
                field: name.to_owned(),
                reason: "field names must not contain '='",
            });
        }
        if value.contains(['\n', '\r']) {
            return Err(FcpError::InvalidField {
                field: name.to_owned(),
                reason: "field values must not contain line breaks",
            });
        }
        push_line(&mut out, &format!("{name}={value}"));
    }

    match frame.payload() {
        Some(payload) => {
            push_line(&mut out, &format!("{DATA_LENGTH_FIELD}={}", payload.len()));
            push_line(&mut out, DATA);
            out.extend_from_slice(payload);
        }
        None => push_line(&mut out, END_MESSAGE),
    }
    Ok(out)
}

fn check_name(name: &str) -> Result<(), FcpError> {
    if name.is_empty() {
        return Err(FcpError::InvalidField {
            field: String::new(),
            reason: "names must not be empty",
        });
    }
    if name.contains(['\n', '\r']) {
        return Err(FcpError::InvalidField {
            field: name.to_owned(),
            reason: "names must not contain line breaks",
        });
    }
    Ok(())
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
}

/// Decodes frames from a buffered byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered reader.
    #[must_use]
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Reads the next frame (blocks until complete).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`FcpError::MalformedFrame`] for input that is not a frame and
    /// [`FcpError::Io`] when reading fails or the stream ends inside a frame.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, FcpError> {
        let name = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.is_empty() => {}
                Some(line) => break line,
            }
        };
        if name.contains('=') {
            return Err(FcpError::malformed(format!(
                "expected a message type, found field line '{name}'"
            )));
        }

        let mut frame = Frame::new(name);
        loop {
            let Some(line) = self.read_line()? else {
                return Err(eof_inside(&frame));
            };
            if line.is_empty() {
                continue;
            }
            if line == END_MESSAGE {
                return Ok(Some(frame));
            }
            if line == DATA {
                let payload = self.read_payload(&frame)?;
                frame.set_payload(payload);
                return Ok(Some(frame));
            }
            match line.split_once('=') {
                Some((key, value)) => frame.push(key, value),
                None => {
                    return Err(FcpError::malformed(format!(
                        "line '{line}' in {} is neither a field nor a terminator",
                        frame.name()
                    )));
                }
            }
        }
    }

    fn read_payload(&mut self, frame: &Frame) -> Result<Vec<u8>, FcpError> {
        let length = frame.data_length().ok_or_else(|| {
            FcpError::malformed(format!(
                "{} ends with {DATA} but has no numeric {DATA_LENGTH_FIELD}",
                frame.name()
            ))
        })?;
        let mut payload = Vec::new();
        (&mut self.reader).take(length).read_to_end(&mut payload)?;
        if u64::try_from(payload.len()).map_or(true, |read| read < length) {
            return Err(eof_inside(frame));
        }
        Ok(payload)
    }

    fn read_line(&mut self) -> Result<Option<String>, FcpError> {
        self.buffer.clear();
        let read = self.reader.read_until(b'\n', &mut self.buffer)?;
        if read == 0 {
            return Ok(None);
        }
        while matches!(self.buffer.last(), Some(b'\n' | b'\r')) {
            self.buffer.pop();
        }
        String::from_utf8(self.buffer.clone())
            .map(Some)
            .map_err(|_| FcpError::malformed("line is not valid UTF-8"))
    }

    /// Unwraps the underlying reader.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn eof_inside(frame: &Frame) -> FcpError {
    FcpError::from(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("connection closed inside {}", frame.name()),
    ))
}
