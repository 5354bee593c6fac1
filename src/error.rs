//! Centralized error types for mboxsort.

use std::path::PathBuf;
use thiserror::Error;

/// All run-level errors produced by the mboxsort library.
///
/// Per-message failures are [`DecodeError`]s; they never abort a run and are
/// reported through the pipeline diagnostics instead.
#[derive(Error, Debug)]
pub enum SortError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("MBOX file not found: {0}")]
    FileNotFound(PathBuf),

    /// The stream does not start with a valid `From ` marker.
    #[error("Format error at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// A single message could not be decoded.
    #[error("Decode error at offset {}: {}", .0.offset, .0)]
    Decode(#[from] DecodeError),

    /// The classification rule set is invalid. Raised before any parsing.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Convenience alias for `Result<T, SortError>`.
pub type Result<T> = std::result::Result<T, SortError>;

impl SortError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a [`SortError::Configuration`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (streams handed in by the caller).
impl From<std::io::Error> for SortError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<stream>"),
            source,
        }
    }
}

/// Category of a per-message decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    /// The header block is empty or contains a line that is not a header.
    MalformedHeader,
    /// A multipart body has no usable boundary, or nests too deeply.
    MalformedBoundary,
    /// `Content-Transfer-Encoding` names an encoding we cannot decode.
    UnknownTransferEncoding,
    /// An encoded payload ends in the middle of a unit.
    TruncatedPayload,
    /// An encoded payload contains bytes outside its alphabet.
    InvalidPayload,
    /// The frame exceeds the configured maximum message size.
    Oversized,
}

impl DecodeErrorKind {
    /// Stable snake_case name, used in diagnostics output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedHeader => "malformed_header",
            Self::MalformedBoundary => "malformed_boundary",
            Self::UnknownTransferEncoding => "unknown_transfer_encoding",
            Self::TruncatedPayload => "truncated_payload",
            Self::InvalidPayload => "invalid_payload",
            Self::Oversized => "oversized",
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message frame that could not be turned into a [`crate::model::message::Message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct DecodeError {
    /// Byte offset of the frame in the archive.
    pub offset: u64,
    pub kind: DecodeErrorKind,
    pub reason: String,
}

impl DecodeError {
    pub fn new(offset: u64, kind: DecodeErrorKind, reason: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::new(42, DecodeErrorKind::TruncatedPayload, "base64 ends early");
        assert_eq!(err.to_string(), "truncated_payload: base64 ends early");
        let wrapped = SortError::from(err);
        assert_eq!(
            wrapped.to_string(),
            "Decode error at offset 42: truncated_payload: base64 ends early"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = SortError::config("unknown sort criterion 'size'");
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown sort criterion 'size'"
        );
    }
}
