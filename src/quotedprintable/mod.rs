//! Streaming quoted-printable decoding (RFC 2045).
//!
//! [`Reader`] decodes quoted-printable data leniently, the way broken mail
//! in the wild demands. [`Utf8Reader`] layers on top of a decoded stream
//! and repairs UTF-8 sequences that a sender split with a line break
//! mid-codepoint. [`new_utf8_reader`] composes the two.

mod reader;
mod utf8;

pub use reader::Reader;
pub use utf8::{new_utf8_reader, Utf8Reader};
