//! UTF-8 rejoiner for decoded streams.
//!
//! Some encoders insert a soft line break in the middle of a multi-byte
//! UTF-8 sequence; after quoted-printable decoding the codepoint is left
//! torn around a bare `\n` or `\r\n`. This wrapper excises exactly that
//! line break and passes every other byte through untouched.

use super::Reader;
use pin_project::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Longest UTF-8 sequence the assembler will hold: a lead byte plus up to
/// five continuation bytes.
const ASSEMBLY_LEN: usize = 6;

/// A UTF-8 lead byte never starts a sequence longer than this many bytes.
const UTF8_MAX: usize = 4;

/// Upstream scratch size.
const SCRATCH_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Passing bytes through.
    Normal,
    /// Saw a lead byte, collecting continuation bytes.
    Start,
    /// A `\r` interrupted the sequence.
    SawCr,
    /// A `\n` (or `\r\n`) interrupted the sequence; the next byte decides.
    SawLf,
    /// A continuation byte displaced the line break, still collecting.
    InCont,
    /// Emitting the assembled bytes unchanged.
    Release,
    /// Emitting, then restarting a fresh candidate from `last`.
    ReleaseRestart,
}

/// The rejoiner proper, kept separate from the pinned upstream so the
/// byte-shuffling can borrow freely.
#[derive(Debug)]
struct Machine {
    state: State,
    /// Index of the first end-of-line byte within `own`.
    pos: usize,
    /// Producer and consumer counters for `own`.
    pco: usize,
    cco: usize,
    own: [u8; ASSEMBLY_LEN],
    /// Producer and consumer counters for `buf`.
    pcb: usize,
    ccb: usize,
    buf: [u8; SCRATCH_LEN],
    /// Lead byte deferred across a release-restart.
    last: u8,
    eof: bool,
    err: Option<io::Error>,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: State::Normal,
            pos: 0,
            pco: 0,
            cco: 0,
            own: [0; ASSEMBLY_LEN],
            pcb: 0,
            ccb: 0,
            buf: [0; SCRATCH_LEN],
            last: 0,
            eof: false,
            err: None,
        }
    }

    /// Runs the state machine over `buf[start..end]`, emitting into `out`.
    ///
    /// Returns `false` when `out` filled up first; the unconsumed scratch
    /// range is then recorded in `pcb`/`ccb` and the next call resumes it.
    fn cycle(&mut self, out: &mut [u8], start: usize, end: usize, count: &mut usize) -> bool {
        let max = out.len();

        // Finish an interrupted release before consuming new bytes.
        if matches!(self.state, State::Release | State::ReleaseRestart) {
            let restart = self.state == State::ReleaseRestart;
            if !self.release(out, count, restart) || (*count >= max && start < end) {
                self.pcb = end;
                self.ccb = start;
                return false;
            }
        }

        for i in start..end {
            let b = self.buf[i];
            match self.state {
                State::Normal => {
                    if b & 0xc0 == 0xc0 {
                        self.state = State::Start;
                        self.own[0] = b;
                        self.pco = 1;
                    } else {
                        out[*count] = b;
                        *count += 1;
                        if *count >= max {
                            self.pcb = end;
                            self.ccb = i + 1;
                            return false;
                        }
                    }
                }
                State::Start => {
                    let top = b & 0xc0;
                    if top == 0xc0 {
                        self.last = b;
                        self.state = State::ReleaseRestart;
                    } else {
                        let current = self.pco;
                        self.own[current] = b;
                        self.pco += 1;
                        if b == 0x0d {
                            self.pos = current;
                            self.state = State::SawCr;
                        } else if b == 0x0a {
                            self.pos = current;
                            self.state = State::SawLf;
                        } else if top != 0x80 || self.pco >= UTF8_MAX {
                            self.state = State::Release;
                        }
                    }
                }
                State::SawCr => {
                    if b & 0xc0 == 0xc0 {
                        self.last = b;
                        self.state = State::ReleaseRestart;
                    } else {
                        self.own[self.pco] = b;
                        self.pco += 1;
                        self.state = if b == 0x0a { State::SawLf } else { State::Release };
                    }
                }
                State::SawLf => {
                    let top = b & 0xc0;
                    if top == 0xc0 {
                        self.last = b;
                        self.state = State::ReleaseRestart;
                    } else if top == 0x80 {
                        // The continuation byte displaces the line break.
                        self.own[self.pos] = b;
                        self.pco = self.pos + 1;
                        self.state = State::InCont;
                    } else {
                        self.own[self.pco] = b;
                        self.pco += 1;
                        self.state = State::Release;
                    }
                }
                State::InCont => {
                    let top = b & 0xc0;
                    if top == 0xc0 {
                        self.last = b;
                        self.state = State::ReleaseRestart;
                    } else {
                        self.own[self.pco] = b;
                        self.pco += 1;
                        if top != 0x80 || self.pco == ASSEMBLY_LEN {
                            self.state = State::Release;
                        }
                    }
                }
                // Release states are resolved before the loop and right
                // after each transition below; a byte is never examined in
                // them.
                State::Release | State::ReleaseRestart => {}
            }
            if matches!(self.state, State::Release | State::ReleaseRestart) {
                let restart = self.state == State::ReleaseRestart;
                if !self.release(out, count, restart) || *count >= max {
                    self.pcb = end;
                    self.ccb = i + 1;
                    return false;
                }
            }
        }
        true
    }

    /// Emits the assembled bytes, then resets for pass-through or for a
    /// fresh candidate starting at the deferred lead byte.
    fn release(&mut self, out: &mut [u8], count: &mut usize, restart: bool) -> bool {
        while self.cco < self.pco {
            if *count >= out.len() {
                return false;
            }
            out[*count] = self.own[self.cco];
            self.cco += 1;
            *count += 1;
        }
        self.cco = 0;
        if restart {
            self.own[0] = self.last;
            self.pco = 1;
            self.state = State::Start;
        } else {
            self.pco = 0;
            self.state = State::Normal;
        }
        true
    }

    /// Drains every held byte ahead of surfacing end-of-stream or an
    /// upstream error. Unlike `release` this empties the assembler from
    /// any state: truncating an in-flight candidate would lose data.
    fn flush(&mut self, out: &mut [u8], count: &mut usize) -> bool {
        loop {
            while self.cco < self.pco {
                if *count >= out.len() {
                    return false;
                }
                out[*count] = self.own[self.cco];
                self.cco += 1;
                *count += 1;
            }
            if self.state == State::ReleaseRestart {
                self.own[0] = self.last;
                self.pco = 1;
                self.cco = 0;
                self.state = State::Start;
                continue;
            }
            self.cco = 0;
            self.pco = 0;
            self.state = State::Normal;
            return true;
        }
    }
}

/// A stream wrapper that rejoins UTF-8 sequences torn by a line break.
///
/// Output is byte-identical to the input except that a multi-byte UTF-8
/// sequence interrupted by exactly one `\n` or `\r\n` has the interruption
/// removed. Anything else, including doubled breaks like `\n\n`, passes
/// through unchanged. Lookahead is bounded by the six-byte assembler.
#[pin_project]
pub struct Utf8Reader<R> {
    #[pin]
    inner: R,
    machine: Machine,
}

impl<R: AsyncRead> Utf8Reader<R> {
    /// Wraps an already-decoded byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            machine: Machine::new(),
        }
    }
}

/// Returns a reader decoding quoted-printable data from `r` leniently and
/// rejoining UTF-8 sequences torn by soft line breaks.
///
/// # Examples
///
/// ```no_run
/// use tokio::io::AsyncReadExt;
/// use yamime::quotedprintable::new_utf8_reader;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let data = b"Bra fr=C3\r\n=A5ga";
/// let mut reader = new_utf8_reader(&data[..]);
/// let mut output = String::new();
/// reader.read_to_string(&mut output).await?;
/// assert_eq!(output, "Bra fråga");
/// # Ok(())
/// # }
/// ```
pub fn new_utf8_reader<R: AsyncRead>(r: R) -> Utf8Reader<Reader<R>> {
    Utf8Reader::new(Reader::new(r))
}

impl<R: AsyncRead> AsyncRead for Utf8Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        let m: &mut Machine = this.machine;
        let out = buf.initialize_unfilled();
        if out.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let mut count = 0usize;

        // Scratch bytes left over from a call whose destination filled up.
        if m.pcb > m.ccb {
            let (start, end) = (m.ccb, m.pcb);
            if !m.cycle(out, start, end, &mut count) {
                buf.advance(count);
                return Poll::Ready(Ok(()));
            }
            m.pcb = 0;
            m.ccb = 0;
        }

        // Assembled bytes already decided for release are drained before
        // upstream is touched; a pending upstream must not stall a read
        // that can make progress from the assembler alone.
        if matches!(m.state, State::Release | State::ReleaseRestart) {
            let restart = m.state == State::ReleaseRestart;
            if !m.release(out, &mut count, restart) || count >= out.len() {
                buf.advance(count);
                return Poll::Ready(Ok(()));
            }
        }

        loop {
            if m.eof || m.err.is_some() {
                if !m.flush(out, &mut count) || count > 0 {
                    break;
                }
                match m.err.take() {
                    Some(e) => {
                        m.eof = true;
                        return Poll::Ready(Err(e));
                    }
                    None => break,
                }
            }

            // Ask upstream only for what the caller can still absorb on
            // top of the bytes already held in the assembler.
            let held = m.pco - m.cco;
            let want = (out.len() - count).saturating_sub(held).clamp(1, SCRATCH_LEN);
            let mut rb = ReadBuf::new(&mut m.buf[..want]);
            match this.inner.as_mut().poll_read(cx, &mut rb) {
                Poll::Pending => {
                    if count > 0 {
                        break;
                    }
                    return Poll::Pending;
                }
                Poll::Ready(Err(e)) => {
                    m.err = Some(e);
                }
                Poll::Ready(Ok(())) => {
                    let n = rb.filled().len();
                    if n == 0 {
                        m.eof = true;
                        continue;
                    }
                    if !m.cycle(out, 0, n, &mut count) {
                        break;
                    }
                    m.pcb = 0;
                    m.ccb = 0;
                    if count > 0 {
                        break;
                    }
                }
            }
        }

        buf.advance(count);
        Poll::Ready(Ok(()))
    }
}
