//! The decoded message record handed to the classifier.

use chrono::{DateTime, Utc};

use super::address::EmailAddress;

/// A single header field, with the name spelled as in the message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Header {
    pub name: String,
    /// Unfolded raw value (encoded-words are left as they appear).
    pub value: String,
}

/// Ordered header list. Lookup is case-insensitive; duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct Headers(pub Vec<Header>);

impl Headers {
    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every value for `name`, in message order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }
}

/// Decoded content of a body part.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum PartBody {
    /// A `text/*` part converted to UTF-8 through its charset.
    Text(String),
    /// Any other leaf part, as decoded bytes.
    #[serde(serialize_with = "serialize_len")]
    Binary(Vec<u8>),
    /// A `multipart/*` container with its sub-parts in order.
    Multipart(Vec<BodyPart>),
}

fn serialize_len<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(bytes.len() as u64)
}

/// One MIME part of a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BodyPart {
    /// Lowercased `type/subtype`, `text/plain` when absent.
    pub content_type: String,
    /// Charset used to decode a text part (lowercased label), if any.
    pub charset: Option<String>,
    /// Lowercased `Content-Transfer-Encoding`, `7bit` when absent.
    pub transfer_encoding: String,
    /// Filename from `Content-Disposition` or the `name` parameter.
    pub filename: Option<String>,
    /// `true` if `Content-Disposition` says `attachment`.
    pub is_attachment: bool,
    pub body: PartBody,
}

impl BodyPart {
    /// `true` for `multipart/*` containers.
    pub fn is_multipart(&self) -> bool {
        matches!(self.body, PartBody::Multipart(_))
    }
}

/// Non-fatal observations made while decoding.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum DecodeNote {
    /// `Date` header missing or unparsable.
    Undated,
    /// A text part had no charset or an unknown one and was decoded with
    /// the fallback.
    CharsetFallback { declared: Option<String> },
    /// A multipart body ended without its closing delimiter.
    MissingClosingBoundary { boundary: String },
}

/// A fully decoded email message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    /// Byte offset of the frame inside the archive.
    pub source_offset: u64,
    /// Frame position inside the archive (0, 1, 2, …).
    pub sequence: u64,
    /// Size of the raw frame in bytes.
    pub size: u64,

    pub headers: Headers,

    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,
    /// First `From:` address.
    pub from: Option<EmailAddress>,
    /// `To:` recipients.
    pub to: Vec<EmailAddress>,
    /// Envelope sender, taken from `From`, then `Return-Path`, then `Sender`.
    pub sender: Option<EmailAddress>,
    /// Parsed `Date:` header; `None` when missing or unparsable.
    pub date: Option<DateTime<Utc>>,

    /// `Message-ID` without angle brackets, if present.
    pub message_id: Option<String>,
    /// `In-Reply-To` id without angle brackets, if present.
    pub in_reply_to: Option<String>,
    /// Ids from `References`, oldest first, without angle brackets.
    pub references: Vec<String>,

    /// Top-level body parts. A single-part message has exactly one part;
    /// a multipart message has one container part holding the tree.
    pub body_parts: Vec<BodyPart>,

    pub notes: Vec<DecodeNote>,
}

impl Message {
    /// Iterate leaf parts depth-first, in order.
    pub fn leaf_parts(&self) -> Vec<&BodyPart> {
        fn walk<'a>(parts: &'a [BodyPart], out: &mut Vec<&'a BodyPart>) {
            for part in parts {
                match &part.body {
                    PartBody::Multipart(children) => walk(children, out),
                    _ => out.push(part),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body_parts, &mut out);
        out
    }

    /// The first `text/plain` leaf, falling back to any text leaf.
    pub fn text(&self) -> Option<&str> {
        let leaves = self.leaf_parts();
        let pick = |want_plain: bool| {
            leaves.iter().find_map(|p| match &p.body {
                PartBody::Text(t) if !want_plain || p.content_type == "text/plain" => {
                    Some(t.as_str())
                }
                _ => None,
            })
        };
        pick(true).or_else(|| pick(false))
    }

    /// Number of leaf parts flagged as attachments.
    pub fn attachment_count(&self) -> usize {
        self.leaf_parts().iter().filter(|p| p.is_attachment).count()
    }

    /// `true` when no usable `Date` header was found.
    pub fn is_undated(&self) -> bool {
        self.date.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(ct: &str, body: PartBody) -> BodyPart {
        BodyPart {
            content_type: ct.to_string(),
            charset: None,
            transfer_encoding: "7bit".to_string(),
            filename: None,
            is_attachment: false,
            body,
        }
    }

    #[test]
    fn test_headers_case_insensitive_and_duplicates() {
        let headers = Headers(vec![
            Header {
                name: "Received".into(),
                value: "from a".into(),
            },
            Header {
                name: "SUBJECT".into(),
                value: "hi".into(),
            },
            Header {
                name: "received".into(),
                value: "from b".into(),
            },
        ]);
        assert_eq!(headers.get("subject"), Some("hi"));
        assert_eq!(
            headers.get_all("Received").collect::<Vec<_>>(),
            vec!["from a", "from b"]
        );
        assert_eq!(headers.get("cc"), None);
    }

    #[test]
    fn test_leaf_parts_and_text() {
        let html = leaf("text/html", PartBody::Text("<p>hi</p>".into()));
        let plain = leaf("text/plain", PartBody::Text("hi".into()));
        let mut pdf = leaf("application/pdf", PartBody::Binary(vec![1, 2, 3]));
        pdf.is_attachment = true;
        let alt = leaf("multipart/alternative", PartBody::Multipart(vec![html, plain]));
        let root = leaf("multipart/mixed", PartBody::Multipart(vec![alt, pdf]));

        let msg = Message {
            source_offset: 0,
            sequence: 0,
            size: 0,
            headers: Headers::default(),
            subject: String::new(),
            from: None,
            to: Vec::new(),
            sender: None,
            date: None,
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            body_parts: vec![root],
            notes: Vec::new(),
        };
        let leaves = msg.leaf_parts();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].content_type, "text/html");
        assert_eq!(msg.text(), Some("hi"));
        assert_eq!(msg.attachment_count(), 1);
        assert!(msg.is_undated());
    }
}
