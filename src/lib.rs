//! Lenient MIME decoding for real-world mail, with async-first design.
//!
//! This crate decodes the malformed MIME data actual mail clients produce:
//! - Streaming quoted-printable decoding (RFC 2045) that works around bad
//!   encodings instead of aborting, in strict and lenient flavors
//! - Repair of UTF-8 sequences torn apart by a line break inserted
//!   mid-codepoint, layered over the decoder
//! - Media type parsing and formatting (RFC 2045, RFC 2183) with RFC 2231
//!   parameter continuations, classifying errors as ignorable or fatal
//!
//! All I/O operations are async-first using tokio.

pub mod error;
pub mod grammar;
pub mod media_type;
pub mod quotedprintable;

// Re-export commonly used types
pub use error::{Defect, Defects, MediaTypeError};
pub use media_type::{format_media_type, is_ignorable, parse_media_type};
pub use quotedprintable::{new_utf8_reader, Reader, Utf8Reader};
