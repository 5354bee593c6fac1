//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), ids, and dates.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::error::{DecodeError, DecodeErrorKind};
use crate::model::message::{Header, Headers};

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parse a header block into an ordered [`Headers`] list.
///
/// Continuation lines (leading space or tab) are unfolded into the previous
/// field. Names keep their original spelling. The block is rejected when it
/// is empty, starts with a continuation line, or contains a line that is not
/// `name: value`.
pub fn parse_header_block(text: &str, offset: u64) -> Result<Headers, DecodeError> {
    let mut fields: Vec<Header> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some(last) = fields.last_mut() else {
                return Err(malformed(offset, "continuation line before any header"));
            };
            if !last.value.is_empty() {
                last.value.push(' ');
            }
            last.value.push_str(line.trim());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(malformed(
                offset,
                format!("line {} is not a header field", lineno + 1),
            ));
        };
        let name = name.trim_end();
        if !is_field_name(name) {
            return Err(malformed(
                offset,
                format!("invalid header name {name:?} on line {}", lineno + 1),
            ));
        }
        fields.push(Header {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
    }

    if fields.is_empty() {
        return Err(malformed(offset, "empty header block"));
    }
    Ok(Headers(fields))
}

fn malformed(offset: u64, reason: impl Into<String>) -> DecodeError {
    DecodeError::new(offset, DecodeErrorKind::MalformedHeader, reason)
}

/// RFC 5322 field name: printable ASCII except `:` and space.
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Tokens that fail to decode are kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two adjacent encoded words is dropped (RFC 2047 §6.2).
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`; returns the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];
    if encoded_text.contains(char::is_whitespace) {
        return None;
    }
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => STANDARD
            .decode(encoded_text)
            .or_else(|_| STANDARD_NO_PAD.decode(encoded_text.trim_end_matches('=')))
            .ok()?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some((decode_charset(charset, &bytes).0, consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Combine two ASCII hex digits into a byte.
pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let digit = |c: u8| (c as char).to_digit(16);
    Some((digit(hi)? * 16 + digit(lo)?) as u8)
}

/// Decode bytes using a named charset.
///
/// Returns the text and `true` when the charset label was not recognised and
/// the UTF-8 / Windows-1252 fallback was used instead.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> (String, bool) {
    let label = charset.trim().trim_matches('"');
    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            (decoded.into_owned(), false)
        }
        None => {
            warn!(charset = label, "Unknown charset, using fallback decoding");
            (decode_header_bytes(bytes), true)
        }
    }
}

/// Extract a single message id, without angle brackets.
///
/// `" <abc@example.org> (comment)"` → `"abc@example.org"`. Bare ids are
/// accepted as long as they are a single token.
pub fn extract_message_id(s: &str) -> Option<String> {
    if let Some(first) = extract_message_ids(s).into_iter().next() {
        return Some(first);
    }
    let trimmed = s.trim();
    (!trimmed.is_empty() && !trimmed.contains(char::is_whitespace)).then(|| trimmed.to_string())
}

/// Extract all `<…>` ids from a string (for the `References` header).
pub fn extract_message_ids(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut remaining = s;
    while let Some(start) = remaining.find('<') {
        let Some(len) = remaining[start..].find('>') else {
            break;
        };
        let id = remaining[start + 1..start + len].trim();
        if !id.is_empty() {
            result.push(id.to_string());
        }
        remaining = &remaining[start + len + 1..];
    }
    result
}

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, IMAP-style `16-JUL-2025` dates, named
/// timezones and trailing comments such as `(PST)`.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = strip_comment(date_str.trim());
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [
        no_dow.clone(),
        normalize_imap_date(&no_dow),
        replace_named_tz(&no_dow),
        replace_named_tz(&normalize_imap_date(&no_dow)),
    ];

    for candidate in &candidates {
        for fmt in DATE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` have a go at the value.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    let fake_msg = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Drop a trailing `(…)` comment: `"… -0800 (PST)"` → `"… -0800"`.
fn strip_comment(s: &str) -> &str {
    match s.rfind('(') {
        Some(pos) if s.ends_with(')') => s[..pos].trim_end(),
        _ => s,
    }
}

/// Normalize IMAP-style dates: `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    if !s.contains('-') {
        return s.to_string();
    }
    // Matched windows start and end with an ASCII `-`, so `pos` and
    // `pos + 5` always fall on char boundaries of `s`.
    let bytes = s.as_bytes();
    for month in MONTHS {
        let pattern = format!("-{month}-");
        let found = bytes
            .windows(pattern.len())
            .position(|w| w.eq_ignore_ascii_case(pattern.as_bytes()));
        if let Some(pos) = found {
            let mut result = s.to_string();
            result.replace_range(pos..pos + pattern.len(), &format!(" {month} "));
            return result;
        }
    }
    s.to_string()
}

/// Strip a leading day-of-week prefix (e.g. `"Thu, "` or `"Thu "`).
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 14] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{head}{offset}");
            }
        }
    }
    s.to_string()
}
