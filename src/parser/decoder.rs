//! Turns raw frames into decoded [`Message`]s.

use tracing::debug;

use crate::error::{DecodeError, DecodeErrorKind};
use crate::model::address::EmailAddress;
use crate::model::frame::RawFrame;
use crate::model::message::{DecodeNote, Message};
use crate::parser::header::{
    decode_encoded_words, decode_header_bytes, extract_message_id, extract_message_ids,
    parse_date, parse_header_block,
};
use crate::parser::mime::{decode_entity, split_header_body};

/// Default upper bound for a single frame (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Anything that can decode a frame. Implementations must be pure: the same
/// frame always yields an equal result.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &RawFrame) -> Result<Message, DecodeError>;
}

/// The standard RFC 5322 / MIME decoder.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    max_message_size: u64,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames larger than `bytes`. Zero disables the limit.
    pub fn max_message_size(mut self, bytes: u64) -> Self {
        self.max_message_size = bytes;
        self
    }
}

impl FrameDecoder for MessageDecoder {
    fn decode(&self, frame: &RawFrame) -> Result<Message, DecodeError> {
        let size = frame.len() as u64;
        if self.max_message_size > 0 && size > self.max_message_size {
            return Err(DecodeError::new(
                frame.offset,
                DecodeErrorKind::Oversized,
                format!(
                    "frame is {size} bytes, limit is {}",
                    self.max_message_size
                ),
            ));
        }

        let (raw_headers, raw_body) = split_header_body(frame.message_bytes());
        let message = decode_message(raw_headers, raw_body, frame.offset)?;
        Ok(Message {
            sequence: frame.sequence,
            size,
            ..message
        })
    }
}

/// Decode one message from its header block and body.
///
/// `offset` is only used to tag errors and the resulting record. The
/// returned message has `sequence` 0 and `size` equal to the input length;
/// [`MessageDecoder`] fills in the frame values.
pub fn decode_message(
    raw_headers: &[u8],
    raw_body: &[u8],
    offset: u64,
) -> Result<Message, DecodeError> {
    let headers = parse_header_block(&decode_header_bytes(raw_headers), offset)?;

    let subject = headers
        .get("subject")
        .map(decode_encoded_words)
        .unwrap_or_default();

    let from = headers
        .get("from")
        .map(|v| EmailAddress::parse(&decode_encoded_words(v)))
        .filter(|a| !a.address.is_empty());
    let to = headers
        .get_all("to")
        .flat_map(|v| EmailAddress::parse_list(&decode_encoded_words(v)))
        .collect();

    // From, then Return-Path, then Sender. `Return-Path: <>` is a null sender.
    let sender = from.clone().or_else(|| {
        ["return-path", "sender"].iter().find_map(|name| {
            headers
                .get(name)
                .map(|v| EmailAddress::parse(&decode_encoded_words(v)))
                .filter(|a| !a.address.is_empty())
        })
    });

    let date = headers.get("date").and_then(parse_date);

    let message_id = headers.get("message-id").and_then(extract_message_id);
    let in_reply_to = headers.get("in-reply-to").and_then(extract_message_id);
    let references = headers
        .get("references")
        .map(extract_message_ids)
        .unwrap_or_default();

    let mut notes = Vec::new();
    if date.is_none() {
        debug!(offset, "Message has no usable Date header");
        notes.push(DecodeNote::Undated);
    }
    let root = decode_entity(&headers, raw_body, offset, 0, &mut notes)?;

    Ok(Message {
        source_offset: offset,
        sequence: 0,
        size: (raw_headers.len() + raw_body.len()) as u64,
        headers,
        subject,
        from,
        to,
        sender,
        date,
        message_id,
        in_reply_to,
        references,
        body_parts: vec![root],
        notes,
    })
}
