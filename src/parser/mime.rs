//! MIME body decoding: content types, transfer encodings, multipart trees,
//! and charset conversion of text parts.

use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::{alphabet, Engine as _};
use tracing::debug;

use crate::error::{DecodeError, DecodeErrorKind};
use crate::model::message::{BodyPart, DecodeNote, Headers, PartBody};
use crate::parser::header::{self, decode_encoded_words, hex_pair};

/// Standard alphabet with canonical padding, but tolerant of non-zero bits
/// after the last full byte, which many mail clients emit.
const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Maximum nesting depth of multipart containers.
pub const MAX_DEPTH: usize = 10;

/// A parsed `Content-Type` (or `Content-Disposition`) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased `type/subtype` (or disposition type).
    pub value: String,
    /// Parameters with lowercased names, values unquoted.
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse `type/subtype; name=value; name="quoted; value"`.
    pub fn parse(raw: &str) -> Self {
        let mut pieces = split_outside_quotes(raw, ';').into_iter();
        let value = pieces.next().unwrap_or_default().trim().to_lowercase();
        let params = pieces
            .filter_map(|piece| {
                let (name, value) = piece.split_once('=')?;
                Some((name.trim().to_lowercase(), unquote(value.trim())))
            })
            .collect();
        Self { value, params }
    }

    /// The `text/plain` default used when a part has no `Content-Type`.
    pub fn text_plain() -> Self {
        Self {
            value: "text/plain".to_string(),
            params: Vec::new(),
        }
    }

    /// Parameter value by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.value.starts_with("multipart/")
    }

    pub fn is_text(&self) -> bool {
        self.value.starts_with("text/")
    }
}

/// Split on `sep`, ignoring separators inside double quotes.
fn split_outside_quotes(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                escaped = true;
                current.push(ch);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c == sep && !in_quotes => out.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    out.push(current);
    out
}

/// Strip surrounding quotes and resolve `\"` escapes.
fn unquote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => s.to_string(),
    }
}

/// Split a part (or a whole message) at the first blank line.
///
/// Returns `(header_bytes, body_bytes)`. A part that starts with a blank
/// line has no headers; a part without any blank line is all headers.
pub fn split_header_body(data: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < data.len() {
        let end = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(data.len(), |i| pos + i + 1);
        let line = &data[pos..end];
        if line == b"\n" || line == b"\r\n" {
            return (&data[..pos], &data[end..]);
        }
        pos = end;
    }
    (data, &[])
}

/// Decode one MIME entity given its parsed headers and raw body bytes.
///
/// Multipart containers are split on their boundary and decoded
/// recursively; leaves are transfer-decoded and, for `text/*`, converted to
/// UTF-8. Non-fatal observations are appended to `notes`.
pub fn decode_entity(
    headers: &Headers,
    body: &[u8],
    offset: u64,
    depth: usize,
    notes: &mut Vec<DecodeNote>,
) -> Result<BodyPart, DecodeError> {
    let content_type = headers
        .get("content-type")
        .map(ContentType::parse)
        .filter(|ct| ct.value.contains('/'))
        .unwrap_or_else(ContentType::text_plain);

    let transfer_encoding = headers
        .get("content-transfer-encoding")
        .map(|v| {
            v.split(|c: char| c.is_whitespace() || c == '(' || c == ';')
                .next()
                .unwrap_or_default()
                .to_lowercase()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "7bit".to_string());

    let disposition = headers.get("content-disposition").map(ContentType::parse);
    let is_attachment = disposition
        .as_ref()
        .is_some_and(|d| d.value == "attachment");
    let filename = disposition
        .as_ref()
        .and_then(|d| d.param("filename"))
        .or_else(|| content_type.param("name"))
        .map(decode_encoded_words);

    let body = if content_type.is_multipart() {
        if !matches!(transfer_encoding.as_str(), "7bit" | "8bit" | "binary") {
            debug!(
                offset,
                encoding = %transfer_encoding,
                "Ignoring transfer encoding on multipart container"
            );
        }
        PartBody::Multipart(decode_multipart(&content_type, body, offset, depth, notes)?)
    } else {
        let payload = decode_transfer_encoding(&transfer_encoding, body, offset)?;
        if content_type.is_text() {
            PartBody::Text(decode_text(content_type.param("charset"), &payload, notes))
        } else {
            PartBody::Binary(payload)
        }
    };

    let charset = match body {
        PartBody::Text(_) => content_type.param("charset").map(|c| c.to_lowercase()),
        _ => None,
    };

    Ok(BodyPart {
        content_type: content_type.value,
        charset,
        transfer_encoding,
        filename,
        is_attachment,
        body,
    })
}

fn decode_multipart(
    content_type: &ContentType,
    body: &[u8],
    offset: u64,
    depth: usize,
    notes: &mut Vec<DecodeNote>,
) -> Result<Vec<BodyPart>, DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::new(
            offset,
            DecodeErrorKind::MalformedBoundary,
            format!("multipart nesting deeper than {MAX_DEPTH} levels"),
        ));
    }
    let boundary = content_type
        .param("boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            DecodeError::new(
                offset,
                DecodeErrorKind::MalformedBoundary,
                format!("{} without boundary parameter", content_type.value),
            )
        })?;

    let (sections, closed) = split_multipart(body, boundary).ok_or_else(|| {
        DecodeError::new(
            offset,
            DecodeErrorKind::MalformedBoundary,
            format!("boundary {boundary:?} never appears in body"),
        )
    })?;
    if !closed {
        debug!(offset, boundary, "Multipart body has no closing delimiter");
        notes.push(DecodeNote::MissingClosingBoundary {
            boundary: boundary.to_string(),
        });
    }

    sections
        .into_iter()
        .map(|section| {
            let (raw_headers, raw_body) = split_header_body(section);
            let headers = if raw_headers.iter().all(u8::is_ascii_whitespace) {
                Headers::default()
            } else {
                header::parse_header_block(&header::decode_header_bytes(raw_headers), offset)?
            };
            decode_entity(&headers, raw_body, offset, depth + 1, notes)
        })
        .collect()
}

/// Split a multipart body into its sections.
///
/// Returns `None` if no opening delimiter line exists, otherwise the
/// sections and whether the closing delimiter was seen. The line break that
/// precedes a delimiter belongs to the delimiter, not to the section.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Option<(Vec<&'a [u8]>, bool)> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut sections = Vec::new();
    let mut section_start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = trim_trailing_space(&body[pos..end]);

        let is_close = line == close.as_bytes();
        if is_close || line == delimiter.as_bytes() {
            if let Some(start) = section_start {
                sections.push(strip_final_line_break(&body[start..pos]));
            }
            if is_close {
                return Some((sections, true));
            }
            section_start = Some(end);
        }
        pos = end;
    }

    let start = section_start?;
    sections.push(&body[start.min(body.len())..]);
    Some((sections, false))
}

fn trim_trailing_space(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

fn strip_final_line_break(data: &[u8]) -> &[u8] {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.strip_suffix(b"\r").unwrap_or(data)
}

/// Undo a `Content-Transfer-Encoding`.
pub fn decode_transfer_encoding(
    encoding: &str,
    raw: &[u8],
    offset: u64,
) -> Result<Vec<u8>, DecodeError> {
    match encoding {
        "7bit" | "8bit" | "binary" => Ok(raw.to_vec()),
        "base64" => decode_base64(raw, offset),
        "quoted-printable" => Ok(decode_quoted_printable(raw)),
        other => Err(DecodeError::new(
            offset,
            DecodeErrorKind::UnknownTransferEncoding,
            format!("unsupported transfer encoding {other:?}"),
        )),
    }
}

/// Strict base64: whitespace is ignored, anything else must be valid.
///
/// A padded quantum ends a segment, so bodies made of separately encoded
/// chunks (`SGk=IQ==`) decode to their concatenation.
fn decode_base64(raw: &[u8], offset: u64) -> Result<Vec<u8>, DecodeError> {
    let cleaned: Vec<u8> = raw
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .copied()
        .collect();

    if cleaned.len() % 4 != 0 {
        return Err(DecodeError::new(
            offset,
            DecodeErrorKind::TruncatedPayload,
            format!(
                "base64 payload of {} symbols is not a multiple of 4",
                cleaned.len()
            ),
        ));
    }

    let mut out = Vec::with_capacity(cleaned.len() / 4 * 3);
    let mut start = 0;
    for (i, quantum) in cleaned.chunks(4).enumerate() {
        let end = (i + 1) * 4;
        if quantum.contains(&b'=') || end == cleaned.len() {
            MIME_BASE64
                .decode_vec(&cleaned[start..end], &mut out)
                .map_err(|e| {
                    let kind = match e {
                        base64::DecodeError::InvalidLength(_) => DecodeErrorKind::TruncatedPayload,
                        _ => DecodeErrorKind::InvalidPayload,
                    };
                    DecodeError::new(offset, kind, format!("base64: {e}"))
                })?;
            start = end;
        }
    }
    Ok(out)
}

/// Quoted-printable (RFC 2045 §6.7). Soft line breaks are removed,
/// `=XX` becomes a byte, malformed escapes are kept literally.
fn decode_quoted_printable(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'=' {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        // Soft line break: "=" followed by optional whitespace and a newline.
        let mut j = i + 1;
        while j < raw.len() && (raw[j] == b' ' || raw[j] == b'\t') {
            j += 1;
        }
        if raw.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }
        if raw.get(j) == Some(&b'\r') && raw.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if j == raw.len() {
            break;
        }

        match (raw.get(i + 1), raw.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hex_pair(hi, lo).is_some() => {
                out.extend(hex_pair(hi, lo));
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

/// Convert a text payload to UTF-8 using its declared charset.
///
/// Without a charset, or with one `encoding_rs` does not know, the payload
/// is read as UTF-8 if valid and as Windows-1252 otherwise, and a
/// [`DecodeNote::CharsetFallback`] is recorded.
fn decode_text(charset: Option<&str>, payload: &[u8], notes: &mut Vec<DecodeNote>) -> String {
    match charset {
        Some(label) => {
            let (text, fallback) = header::decode_charset(label, payload);
            if fallback {
                notes.push(DecodeNote::CharsetFallback {
                    declared: Some(label.to_lowercase()),
                });
            }
            text
        }
        None => {
            notes.push(DecodeNote::CharsetFallback { declared: None });
            header::decode_header_bytes(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::Header;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        Headers(
            pairs
                .iter()
                .map(|(n, v)| Header {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Multipart/Mixed; boundary=\"a;b\"; charset=UTF-8");
        assert_eq!(ct.value, "multipart/mixed");
        assert_eq!(ct.param("BOUNDARY"), Some("a;b"));
        assert_eq!(ct.param("charset"), Some("UTF-8"));
        assert!(ct.is_multipart());
    }

    #[test]
    fn test_split_header_body() {
        let (h, b) = split_header_body(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        assert_eq!(h, b"A: 1\r\nB: 2\r\n");
        assert_eq!(b, b"body\r\n");
        let (h, b) = split_header_body(b"\nbody only\n");
        assert!(h.is_empty());
        assert_eq!(b, b"body only\n");
        let (h, b) = split_header_body(b"A: 1\n");
        assert_eq!(h, b"A: 1\n");
        assert!(b.is_empty());
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64(b"SGVs bG8g\nV29y bGQ=", 0).unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_base64_chunks_and_trailing_bits() {
        assert_eq!(decode_base64(b"SGk=\nIQ==\n", 0).unwrap(), b"Hi!");
        assert_eq!(decode_base64(b"SGl=", 0).unwrap(), b"Hi");
        assert_eq!(decode_base64(b"", 0).unwrap(), b"");
    }

    #[test]
    fn test_decode_base64_truncated_and_invalid() {
        let err = decode_base64(b"SGVsbG8gV29ybG", 9).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TruncatedPayload);
        assert_eq!(err.offset, 9);
        let err = decode_base64(b"!!!!not-base64!!", 0).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidPayload);
    }

    #[test]
    fn test_decode_quoted_printable() {
        assert_eq!(decode_quoted_printable(b"Hello=20World=21"), b"Hello World!");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"soft=  \r\nbreak"), b"softbreak");
        assert_eq!(decode_quoted_printable(b"caf=C3=A9"), "café".as_bytes());
        assert_eq!(decode_quoted_printable(b"50=ZZ off"), b"50=ZZ off");
    }

    #[test]
    fn test_unknown_transfer_encoding() {
        let err = decode_transfer_encoding("x-uuencode", b"abc", 3).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownTransferEncoding);
    }

    #[test]
    fn test_decode_entity_text_with_charset() {
        let h = headers(&[
            ("Content-Type", "text/plain; charset=iso-8859-1"),
            ("Content-Transfer-Encoding", "quoted-printable"),
        ]);
        let mut notes = Vec::new();
        let part = decode_entity(&h, b"caf=E9\n", 0, 0, &mut notes).unwrap();
        assert_eq!(part.body, PartBody::Text("café\n".to_string()));
        assert_eq!(part.charset.as_deref(), Some("iso-8859-1"));
        assert_eq!(part.transfer_encoding, "quoted-printable");
        assert!(notes.is_empty());
    }

    #[test]
    fn test_decode_entity_missing_charset_is_flagged() {
        let mut notes = Vec::new();
        let part = decode_entity(&Headers::default(), b"plain body\n", 0, 0, &mut notes).unwrap();
        assert_eq!(part.content_type, "text/plain");
        assert_eq!(part.body, PartBody::Text("plain body\n".to_string()));
        assert_eq!(notes, vec![DecodeNote::CharsetFallback { declared: None }]);
    }

    #[test]
    fn test_decode_nested_multipart() {
        let h = headers(&[("Content-Type", "multipart/mixed; boundary=\"outer\"")]);
        let body = b"preamble\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
hello\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>hello</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/octet-stream; name=\"data.bin\"\r\n\
Content-Disposition: attachment\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAEC\r\n\
--outer--\r\n\
epilogue\r\n";
        let mut notes = Vec::new();
        let part = decode_entity(&h, body, 0, 0, &mut notes).unwrap();
        let PartBody::Multipart(children) = &part.body else {
            panic!("expected multipart");
        };
        assert_eq!(children.len(), 2);
        let PartBody::Multipart(alt) = &children[0].body else {
            panic!("expected nested multipart");
        };
        assert_eq!(alt[0].body, PartBody::Text("hello".to_string()));
        assert_eq!(alt[1].content_type, "text/html");
        assert_eq!(children[1].body, PartBody::Binary(vec![0, 1, 2]));
        assert_eq!(children[1].filename.as_deref(), Some("data.bin"));
        assert!(children[1].is_attachment);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_multipart_without_boundary_param() {
        let h = headers(&[("Content-Type", "multipart/mixed")]);
        let err = decode_entity(&h, b"--x\n\nhi\n--x--\n", 5, 0, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::MalformedBoundary);
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn test_multipart_boundary_never_used() {
        let h = headers(&[("Content-Type", "multipart/mixed; boundary=zzz")]);
        let err = decode_entity(&h, b"no delimiters here\n", 0, 0, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::MalformedBoundary);
    }

    #[test]
    fn test_multipart_missing_close_is_noted() {
        let h = headers(&[("Content-Type", "multipart/mixed; boundary=b")]);
        let mut notes = Vec::new();
        let body = b"--b\nContent-Type: text/plain; charset=us-ascii\n\ntail\n";
        let part = decode_entity(&h, body, 0, 0, &mut notes).unwrap();
        let PartBody::Multipart(children) = part.body else {
            panic!("expected multipart");
        };
        assert_eq!(children.len(), 1);
        assert_eq!(
            notes,
            vec![DecodeNote::MissingClosingBoundary {
                boundary: "b".to_string()
            }]
        );
    }

    #[test]
    fn test_multipart_too_deep() {
        let h = headers(&[("Content-Type", "multipart/mixed; boundary=b")]);
        let err =
            decode_entity(&h, b"--b\n\nx\n--b--\n", 0, MAX_DEPTH, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::MalformedBoundary);
    }

    #[test]
    fn test_base64_error_inside_part_propagates() {
        let h = headers(&[("Content-Type", "multipart/mixed; boundary=b")]);
        let body = b"--b\nContent-Transfer-Encoding: base64\n\n@@@@\n--b--\n";
        let err = decode_entity(&h, body, 11, 0, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidPayload);
        assert_eq!(err.offset, 11);
    }
}
