//! Raw, undecoded message frames as cut out of the archive.

/// One candidate message as delimited in the MBOX stream.
///
/// `bytes` holds the whole span: the `From ` separator line, headers, body
/// and the trailing blank line that precedes the next separator. Frames
/// partition the stream, so concatenating them reproduces the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Byte offset of the separator line inside the archive.
    pub offset: u64,
    /// Position of this frame among all frames of the archive (0, 1, 2, …).
    pub sequence: u64,
    /// The raw bytes of the frame.
    pub bytes: Vec<u8>,
}

impl RawFrame {
    /// Length of the frame in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` if the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The `From ` separator line, without its line terminator.
    pub fn separator_line(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(self.bytes.len());
        trim_line_end(&self.bytes[..end])
    }

    /// Everything after the separator line (headers and body).
    pub fn message_bytes(&self) -> &[u8] {
        match self.bytes.iter().position(|&b| b == b'\n') {
            Some(pos) => &self.bytes[pos + 1..],
            None => &[],
        }
    }
}

/// Strip a trailing `\r` (and `\n`) from a line.
pub(crate) fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
