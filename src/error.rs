//! Error types for the yamime crate.
//!
//! Decoding bad email is all about telling apart defects that can be worked
//! around from defects that make the result meaningless. [`Defect`] is the
//! unit of both kinds; [`Defects`] accumulates them and decides which one a
//! caller gets to see.

use std::fmt;
use std::io;
use thiserror::Error;

/// Recoverable defects are capped so pathological input cannot grow the
/// record without bound. The first recorded defect is the one surfaced.
const MAX_DEFECTS: usize = 4;

/// A single decoding or parsing defect.
///
/// Messages match the decoder's diagnostics byte for byte; tests and callers
/// rely on them being stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Defect {
    /// An `=` escape whose hex digits are not `[0-9A-Fa-f]`.
    #[error("quotedprintable: invalid hex byte 0x{0:02x}")]
    InvalidHexByte(u8),

    /// A control or non-ASCII byte in the body that should have been escaped.
    #[error("quotedprintable: invalid unescaped byte 0x{0:02x} in body")]
    InvalidUnescapedByte(u8),

    /// A soft line break followed by something other than `\n` or `\r\n`.
    #[error("quotedprintable: invalid bytes after =: {0:?}")]
    InvalidBytesAfterEqual(String),

    /// The stream ended in the middle of an `=XY` escape.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// A source line exceeded the line buffer without a terminator.
    #[error("quotedprintable: line too long")]
    LineTooLong,

    #[error("mime: no media type")]
    NoMediaType,

    #[error("mime: expected slash after first token")]
    NoSlash,

    #[error("mime: expected token after slash")]
    NoTokenAfterSlash,

    #[error("mime: unexpected content after media subtype")]
    UnexpectedContent,

    #[error("mime: invalid media parameter")]
    InvalidMediaParameter,

    #[error("mime: duplicate parameter name")]
    DuplicateParameterName,

    /// A `%` in an RFC 2231 value not followed by two hex digits.
    #[error("mime: bogus characters after %: {0:?}")]
    BogusPercent(String),

    /// An unrecoverable error reported by the upstream byte source.
    #[error("{0}")]
    Upstream(String),
}

impl Defect {
    /// Converts the defect into an `std::io::Error` for surfacing through
    /// the stream read traits.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self {
            Defect::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            Defect::Upstream(_) => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, self)
    }
}

/// An ordered record of recoverable defects plus at most one fatal error.
///
/// Recoverable defects accumulate (bounded to [`MAX_DEFECTS`]) and never
/// upgrade to fatal; a fatal error, once set, persists. Which slot a caller
/// sees is decided by the [`strict`](Defects::strict) and
/// [`lenient`](Defects::lenient) selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defects {
    recoverable: Vec<Defect>,
    fatal: Option<Defect>,
}

impl Defects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a recoverable defect. Processing may continue afterwards.
    /// Ignored once the record is full.
    pub fn add(&mut self, defect: Defect) {
        if self.recoverable.len() < MAX_DEFECTS {
            self.recoverable.push(defect);
        }
    }

    /// Records an unrecoverable error, replacing any previous fatal entry.
    /// After this there should not be any more processing.
    pub fn add_fatal(&mut self, defect: Defect) {
        self.fatal = Some(defect);
    }

    /// The fatal error if present, else the first recoverable defect.
    pub fn strict(&self) -> Option<&Defect> {
        self.fatal.as_ref().or_else(|| self.recoverable.first())
    }

    /// Only the fatal error; recoverable defects are ignored.
    pub fn lenient(&self) -> Option<&Defect> {
        self.fatal.as_ref()
    }

    pub fn fatal(&self) -> Option<&Defect> {
        self.fatal.as_ref()
    }

    pub fn recoverable(&self) -> &[Defect] {
        &self.recoverable
    }

    pub fn is_empty(&self) -> bool {
        self.recoverable.is_empty() && self.fatal.is_none()
    }
}

impl fmt::Display for Defects {
    /// Renders the fatal error alone when one is set, else the recoverable
    /// defects joined with `|`, else the stable sentinel `<nil>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fatal) = &self.fatal {
            return write!(f, "{fatal}");
        }
        if self.recoverable.is_empty() {
            return f.write_str("<nil>");
        }
        for (i, defect) in self.recoverable.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{defect}")?;
        }
        Ok(())
    }
}

/// The error produced by [`parse_media_type`](crate::parse_media_type).
///
/// Carries the full defect record of the parse. When
/// [`is_ignorable`](MediaTypeError::is_ignorable) returns `true` the parse
/// also produced a usable media type and parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{defects}")]
pub struct MediaTypeError {
    defects: Defects,
}

impl MediaTypeError {
    pub(crate) fn new(defects: Defects) -> Self {
        Self { defects }
    }

    /// `true` when every recorded defect was worked around and the parsed
    /// value may be used.
    pub fn is_ignorable(&self) -> bool {
        self.defects.fatal().is_none()
    }

    pub fn defects(&self) -> &Defects {
        &self.defects
    }
}
