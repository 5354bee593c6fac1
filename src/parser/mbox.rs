//! Streaming MBOX frame splitter.
//!
//! Reads the archive line by line from any [`BufRead`] and yields one
//! [`RawFrame`] per message. Never holds more than the current frame in
//! memory. Tolerant of mixed line endings, a UTF-8 BOM, junk before the
//! first separator and a truncated last message.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, SortError};
use crate::model::frame::{trim_line_end, RawFrame};

/// Default size of the read buffer (1 MB for fast sequential reads).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 1024;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Lazy iterator of [`RawFrame`]s over an MBOX byte stream.
///
/// A frame starts at a line beginning with `From ` that follows a blank line
/// (or opens the stream) and carries a sender token and a timestamp. Lines
/// escaped as `>From ` never start a frame. Every byte after the first
/// separator belongs to exactly one frame; bytes before it are skipped and
/// counted in [`FrameSplitter::skipped_bytes`].
pub struct FrameSplitter<R> {
    reader: R,
    /// Bytes consumed from the stream so far.
    offset: u64,
    line_buf: Vec<u8>,
    /// Frame under construction: start offset and bytes.
    pending: Option<(u64, Vec<u8>)>,
    prev_line_was_blank: bool,
    sequence: u64,
    skipped: u64,
    finished: bool,
}

/// Open an archive on disk and wrap it in a splitter.
pub fn open(path: impl AsRef<Path>, buffer_size: usize) -> Result<FrameSplitter<BufReader<File>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SortError::FileNotFound(path.to_path_buf())
        } else {
            SortError::io(path, e)
        }
    })?;
    Ok(FrameSplitter::new(BufReader::with_capacity(
        buffer_size.max(4096),
        file,
    )))
}

impl<'a> FrameSplitter<Cursor<&'a [u8]>> {
    /// Split an in-memory archive.
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: BufRead> FrameSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            line_buf: Vec::with_capacity(4096),
            pending: None,
            prev_line_was_blank: true,
            sequence: 0,
            skipped: 0,
            finished: false,
        }
    }

    /// Bytes discarded before the first separator line.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Total bytes read from the stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Number of frames yielded so far.
    pub fn frames_yielded(&self) -> u64 {
        self.sequence
    }

    /// The stream-level format problem, if the archive did not open with a
    /// separator line. Only meaningful once the iterator is exhausted.
    pub fn format_error(&self) -> Option<SortError> {
        if self.skipped == 0 {
            return None;
        }
        let reason = if self.sequence == 0 {
            format!("no frame marker found in {} bytes", self.skipped)
        } else {
            format!(
                "archive does not start with a frame marker; skipped {} bytes",
                self.skipped
            )
        };
        Some(SortError::Format { offset: 0, reason })
    }

    /// Read one line (including its terminator) into `line_buf`.
    /// Returns `false` at end of stream.
    fn read_line(&mut self) -> std::io::Result<bool> {
        self.line_buf.clear();
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(!self.line_buf.is_empty());
            }
            match memchr_newline(buf) {
                Some(pos) => {
                    self.line_buf.extend_from_slice(&buf[..=pos]);
                    self.reader.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let len = buf.len();
                    self.line_buf.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn finish_frame(&mut self, start: u64, bytes: Vec<u8>) -> RawFrame {
        let frame = RawFrame {
            offset: start,
            sequence: self.sequence,
            bytes,
        };
        self.sequence += 1;
        frame
    }
}

impl<R: BufRead + Seek> FrameSplitter<R> {
    /// Seek the stream back to its start and reset all splitter state, so
    /// the same archive can be iterated again.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.line_buf.clear();
        self.pending = None;
        self.prev_line_was_blank = true;
        self.sequence = 0;
        self.skipped = 0;
        self.finished = false;
        Ok(())
    }
}

impl<R: BufRead> Iterator for FrameSplitter<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    if self.skipped > 0 && self.sequence == 0 && self.pending.is_none() {
                        warn!(bytes = self.skipped, "No frame marker found in stream");
                    }
                    return self
                        .pending
                        .take()
                        .map(|(start, bytes)| Ok(self.finish_frame(start, bytes)));
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(SortError::from(e)));
                }
            }

            let line_start = self.offset;
            let line_len = self.line_buf.len() as u64;
            self.offset += line_len;

            let at_stream_start = line_start == 0;
            let is_marker = is_frame_marker(&self.line_buf, at_stream_start);
            let was_blank = self.prev_line_was_blank;
            self.prev_line_was_blank = is_blank_line(&self.line_buf);

            if is_marker && was_blank {
                if self.pending.is_none() && self.sequence == 0 && line_start > 0 {
                    warn!(
                        offset = line_start,
                        skipped = self.skipped,
                        "Archive does not start with a 'From ' line; skipped to first marker"
                    );
                }
                let line = std::mem::take(&mut self.line_buf);
                let previous = self.pending.replace((line_start, line));
                if let Some((start, bytes)) = previous {
                    return Some(Ok(self.finish_frame(start, bytes)));
                }
                continue;
            }

            if is_marker {
                debug!(
                    offset = line_start,
                    "'From ' line without preceding blank line kept as body text"
                );
            }

            match self.pending.as_mut() {
                Some((_, bytes)) => bytes.extend_from_slice(&self.line_buf),
                None => self.skipped += line_len,
            }
        }
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an MBOX separator: `From `, a sender token, and
/// an asctime-like timestamp (an `H:MM` time and a four-digit year).
///
/// A UTF-8 BOM is tolerated on the very first line of the stream.
pub fn is_frame_marker(line: &[u8], at_stream_start: bool) -> bool {
    let line = match line.strip_prefix(BOM) {
        Some(rest) if at_stream_start => rest,
        _ => line,
    };
    let Some(rest) = line.strip_prefix(b"From ") else {
        return false;
    };
    let rest = String::from_utf8_lossy(trim_line_end(rest));
    let mut tokens = rest.split_whitespace();
    if tokens.next().is_none() {
        return false;
    }

    let mut has_time = false;
    let mut has_year = false;
    for token in tokens {
        has_time |= is_time_token(token);
        has_year |= token.len() == 4 && token.bytes().all(|b| b.is_ascii_digit());
    }
    has_time && has_year
}

/// `H:MM`, `HH:MM` or `HH:MM:SS`.
fn is_time_token(token: &str) -> bool {
    let parts: Vec<&str> = token.split(':').collect();
    (2..=3).contains(&parts.len())
        && parts[0].len() <= 2
        && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        && parts[1..].iter().all(|p| p.len() == 2)
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
