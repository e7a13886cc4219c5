//! Quoted-printable reader.
//!
//! Implements RFC 2045 quoted-printable decoding with async I/O, tuned for
//! the malformed encodings real mail clients produce.

use crate::error::{Defect, Defects};
use pin_project::pin_project;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};

/// Longest source line held at once; longer lines decode through the
/// straddle buffer.
const MAX_LINE_LEN: usize = 4096;

/// Capacity of the straddle buffer: `=` plus two hex digits.
const MAX_STRADDLE: usize = 3;

/// How the current line left the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineCond {
    /// Terminated by `\n`.
    Complete,
    /// The line buffer filled before a `\n` arrived.
    BufferFull,
    /// The source ended (or failed) mid-line.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Lenient,
}

/// A quoted-printable decoder.
///
/// Implements `AsyncRead` to decode quoted-printable data on the fly.
/// Deviations from RFC 2045, matching what broken encoders produce:
///
/// 1. `=\n` is accepted as a soft line break in addition to `=\r\n`.
/// 2. A bare `\r` or `\n` in the body passes through.
/// 3. Lowercase hex digits are accepted.
/// 4. A defective escape is emitted literally instead of aborting.
///
/// Both constructors decode byte for byte identically; they differ only in
/// which recorded defects `read` surfaces. [`Reader::new`] reports only
/// unrecoverable source errors, [`Reader::strict`] also reports the first
/// recoverable defect. Either way all already-decoded bytes are delivered
/// before any error.
#[pin_project]
pub struct Reader<R> {
    #[pin]
    inner: BufReader<R>,
    mode: Mode,
    defects: Defects,
    /// Processed line bytes still to be emitted.
    line: Vec<u8>,
    line_pos: usize,
    /// Raw line bytes still being acquired from the source.
    pending: Vec<u8>,
    cond: LineCond,
    /// Straddle buffer: an escape split across two line reads lives in
    /// `prev[last_start..last_end]` until the next line completes it.
    prev: [u8; MAX_STRADDLE],
    last_start: usize,
    last_end: usize,
    eof: bool,
    fatal: Option<io::Error>,
}

impl<R: AsyncRead> Reader<R> {
    /// Creates a lenient quoted-printable reader decoding from `inner`.
    ///
    /// Recoverable defects are recorded but not surfaced; only an
    /// unrecoverable source error fails a read.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio::io::AsyncReadExt;
    /// use yamime::quotedprintable::Reader;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let data = b"Hello=20World";
    /// let mut reader = Reader::new(&data[..]);
    /// let mut output = String::new();
    /// reader.read_to_string(&mut output).await?;
    /// assert_eq!(output, "Hello World");
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(inner: R) -> Self {
        Self::with_mode(inner, Mode::Lenient)
    }

    /// Creates a strict quoted-printable reader decoding from `inner`.
    ///
    /// The first recoverable defect is surfaced as an error once the line
    /// that produced it has been fully emitted.
    pub fn strict(inner: R) -> Self {
        Self::with_mode(inner, Mode::Strict)
    }

    fn with_mode(inner: R, mode: Mode) -> Self {
        Self {
            inner: BufReader::new(inner),
            mode,
            defects: Defects::new(),
            line: Vec::new(),
            line_pos: 0,
            pending: Vec::new(),
            cond: LineCond::Complete,
            prev: [0; MAX_STRADDLE],
            last_start: 0,
            last_end: 0,
            eof: false,
            fatal: None,
        }
    }

    /// The defects recorded so far, for inspection after a lenient decode.
    pub fn defects(&self) -> &Defects {
        &self.defects
    }
}

enum HexError {
    /// Fewer than two bytes follow the `=`.
    TooShort,
    /// A byte that is not a hex digit.
    Invalid(u8),
}

/// The value of a hex digit, or the offending byte back.
fn from_hex(b: u8) -> Result<u8, u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        // Accept badly encoded bytes.
        b'a'..=b'f' => Ok(b - b'a' + 10),
        _ => Err(b),
    }
}

fn read_hex_byte(v: &[u8]) -> Result<u8, HexError> {
    if v.len() < 2 {
        return Err(HexError::TooShort);
    }
    let hb = from_hex(v[0]).map_err(HexError::Invalid)?;
    let lb = from_hex(v[1]).map_err(HexError::Invalid)?;
    Ok((hb << 4) | lb)
}

/// Prepares an acquired line for the decode loop.
///
/// Trailing whitespace is not significant, so the whole line is
/// right-trimmed of `\t`, `\r`, `\n` and space. A trimmed line ending in
/// `=` is a soft break: the `=` is elided and the stripped bytes must have
/// been exactly a line terminator. Otherwise the terminator the trim
/// removed is restored.
fn process_line(raw: Vec<u8>, cond: LineCond, defects: &mut Defects) -> Vec<u8> {
    if cond == LineCond::BufferFull {
        // No terminator arrived; decode the bytes as-is and let the
        // straddle buffer carry any escape over the seam.
        return raw;
    }

    let has_lf = raw.ends_with(b"\n");
    let has_crlf = raw.ends_with(b"\r\n");
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }

    let mut line = raw;
    if end > 0 && line[end - 1] == b'=' {
        let stripped = &line[end..];
        if !(stripped.starts_with(b"\n") || stripped.starts_with(b"\r\n")) {
            // The last `=` before EOF is also dropped here: it reads as a
            // soft break with nothing after it.
            let stripped = String::from_utf8_lossy(stripped).into_owned();
            defects.add(Defect::InvalidBytesAfterEqual(stripped));
        }
        line.truncate(end - 1);
    } else {
        line.truncate(end);
        if has_lf {
            if has_crlf {
                line.extend_from_slice(b"\r\n");
            } else {
                line.push(b'\n');
            }
        }
    }
    line
}

impl<R: AsyncRead> AsyncRead for Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        let out = buf.initialize_unfilled();
        if out.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let mut written = 0usize;

        while written < out.len() {
            if *this.line_pos >= this.line.len() {
                // The current line is spent. Surface whatever the selector
                // reports before touching the source again.
                let surfaced = match this.mode {
                    Mode::Strict => this.defects.strict(),
                    Mode::Lenient => this.defects.lenient(),
                }
                .cloned();
                if surfaced.is_some() || *this.eof {
                    // Eject straddle bytes first; they were already
                    // accepted from the source.
                    while *this.last_start < *this.last_end && written < out.len() {
                        out[written] = this.prev[*this.last_start];
                        *this.last_start += 1;
                        written += 1;
                    }
                    if *this.last_start < *this.last_end || written > 0 {
                        break;
                    }
                    match surfaced {
                        Some(defect) => {
                            let err =
                                this.fatal.take().unwrap_or_else(|| defect.into_io());
                            return Poll::Ready(Err(err));
                        }
                        None => break,
                    }
                }

                // Acquire the next raw line, up to and including `\n`,
                // bounded by MAX_LINE_LEN.
                loop {
                    let mut consumed = 0usize;
                    let mut outcome = None;
                    match this.inner.as_mut().poll_fill_buf(cx) {
                        Poll::Pending => {
                            if written > 0 {
                                buf.advance(written);
                                return Poll::Ready(Ok(()));
                            }
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(e)) => {
                            this.defects.add_fatal(Defect::Upstream(e.to_string()));
                            *this.fatal = Some(e);
                            outcome = Some(LineCond::Eof);
                        }
                        Poll::Ready(Ok(chunk)) => {
                            if chunk.is_empty() {
                                *this.eof = true;
                                outcome = Some(LineCond::Eof);
                            } else {
                                let room = MAX_LINE_LEN - this.pending.len();
                                match chunk.iter().position(|&b| b == b'\n') {
                                    Some(pos) if pos < room => {
                                        this.pending.extend_from_slice(&chunk[..=pos]);
                                        consumed = pos + 1;
                                        outcome = Some(LineCond::Complete);
                                    }
                                    _ => {
                                        let take = chunk.len().min(room);
                                        this.pending.extend_from_slice(&chunk[..take]);
                                        consumed = take;
                                        if this.pending.len() == MAX_LINE_LEN {
                                            this.defects.add(Defect::LineTooLong);
                                            outcome = Some(LineCond::BufferFull);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    if consumed > 0 {
                        this.inner.as_mut().consume(consumed);
                    }
                    if let Some(cond) = outcome {
                        *this.cond = cond;
                        break;
                    }
                }

                if this.pending.is_empty() {
                    // EOF or failure with nothing buffered; resolved above
                    // on the next pass.
                    this.line.clear();
                    *this.line_pos = 0;
                    continue;
                }
                *this.line = process_line(mem::take(this.pending), *this.cond, this.defects);
                *this.line_pos = 0;
                continue;
            }

            // Resume an escape stashed across a line seam.
            let last_len = *this.last_end - *this.last_start;
            if last_len > 0 {
                let b = this.prev[*this.last_start];
                if b == b'=' {
                    if last_len == 1 {
                        let rem = &this.line[*this.line_pos..];
                        if rem.starts_with(b"\n") {
                            // Deferred soft break.
                            *this.line_pos += 1;
                            *this.last_start = 0;
                            *this.last_end = 0;
                            continue;
                        }
                        if rem.starts_with(b"\r\n") {
                            *this.line_pos += 2;
                            *this.last_start = 0;
                            *this.last_end = 0;
                            continue;
                        }
                        if rem.len() < 2 {
                            // One byte arrived; extend the straddle and
                            // wait for the rest.
                            this.prev[1] = rem[0];
                            *this.line_pos += 1;
                            *this.last_start = 0;
                            *this.last_end = 2;
                            continue;
                        }
                    }
                    // Fill out the three-byte escape from the new line and
                    // decode it.
                    for i in last_len..MAX_STRADDLE {
                        this.prev[i] = this.line[*this.line_pos];
                        *this.line_pos += 1;
                    }
                    *this.last_start = 0;
                    *this.last_end = MAX_STRADDLE;
                    let decoded = from_hex(this.prev[1])
                        .and_then(|hb| from_hex(this.prev[2]).map(|lb| (hb << 4) | lb));
                    match decoded {
                        Ok(decoded) => {
                            out[written] = decoded;
                            written += 1;
                            *this.last_start = 0;
                            *this.last_end = 0;
                        }
                        Err(bad) => {
                            this.defects.add(Defect::InvalidHexByte(bad));
                            out[written] = b'=';
                            written += 1;
                            // Leave the offending bytes to be re-scanned.
                            *this.last_start = 1;
                        }
                    }
                    continue;
                }
                out[written] = b;
                written += 1;
                *this.last_start += 1;
                continue;
            }

            let b = this.line[*this.line_pos];
            if b == b'=' {
                match read_hex_byte(&this.line[*this.line_pos + 1..]) {
                    Ok(decoded) => {
                        out[written] = decoded;
                        written += 1;
                        *this.line_pos += 3;
                    }
                    Err(HexError::TooShort) if *this.cond == LineCond::BufferFull => {
                        // The escape spans the seam between two line reads;
                        // stash it and finish on the next line.
                        let rem = this.line.len() - *this.line_pos;
                        this.prev[..rem].copy_from_slice(&this.line[*this.line_pos..]);
                        *this.last_start = 0;
                        *this.last_end = rem;
                        *this.line_pos = this.line.len();
                    }
                    Err(HexError::TooShort) => {
                        this.defects.add(Defect::UnexpectedEof);
                        out[written] = b'=';
                        written += 1;
                        *this.line_pos += 1;
                    }
                    Err(HexError::Invalid(bad)) => {
                        this.defects.add(Defect::InvalidHexByte(bad));
                        // Emit the literal `=` so bad mail still decodes.
                        out[written] = b'=';
                        written += 1;
                        *this.line_pos += 1;
                    }
                }
            } else {
                if b == b'\t' || b == b'\r' || b == b'\n' {
                    // Bare CR and LF in the body are let through.
                } else if b < b' ' || b > b'~' {
                    this.defects.add(Defect::InvalidUnescapedByte(b));
                }
                out[written] = b;
                written += 1;
                *this.line_pos += 1;
            }
        }

        buf.advance(written);
        Poll::Ready(Ok(()))
    }
}
