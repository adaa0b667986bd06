//! MIME message structure and handling.

use crate::address::{Mailbox, parse_mailbox_list, parse_message_ids};
use crate::charset::{decode_text, decode_utf8_or_latin};
use crate::content_type::{ContentDisposition, ContentType, DispositionKind};
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Nested multiparts deeper than this are kept as opaque leaves.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME message part.
///
/// A multipart part carries its children in `parts` and an empty `body`; a
/// leaf part carries its still-encoded body.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw bytes, transfer encoding not yet removed).
    pub body: Vec<u8>,
    /// Child parts of a multipart.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    fn parse(raw: &[u8], depth: usize) -> Self {
        let (header_bytes, body) = split_headers_body(raw);
        let headers = Headers::parse(&decode_utf8_or_latin(header_bytes));
        let content_type = content_type_of(&headers);

        if depth < MAX_DEPTH
            && content_type.is_multipart()
            && let Some(boundary) = content_type.boundary()
        {
            let parts: Vec<Self> = split_multipart(body, boundary)
                .into_iter()
                .map(|part| Self::parse(part, depth + 1))
                .collect();
            if !parts.is_empty() {
                return Self {
                    headers,
                    body: Vec::new(),
                    parts,
                };
            }
        }

        Self::new(headers, body.to_vec())
    }

    /// Gets the content type, defaulting to `text/plain` when the header is
    /// missing or unparseable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        content_type_of(&self.headers)
    }

    /// Returns true if the part was split into child parts.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Gets the parsed `Content-Disposition` header.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Returns true if the part is explicitly marked as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.disposition()
            .is_some_and(|d| d.kind == DispositionKind::Attachment)
    }

    /// Returns true if the part is explicitly marked inline.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.disposition()
            .is_some_and(|d| d.kind == DispositionKind::Inline)
    }

    /// Filename from `Content-Disposition`, falling back to the content type
    /// `name` parameter.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition()
            .and_then(|d| d.filename().map(str::to_string))
            .or_else(|| self.content_type().name().map(str::to_string))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// `Content-ID` without angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        self.headers
            .get("content-id")
            .and_then(|id| parse_message_ids(id).into_iter().next())
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// A body that claims base64 but does not decode is returned raw.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                decode_base64(&self.body).unwrap_or_else(|_| self.body.clone())
            }
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Gets the decoded body as text, honouring the charset parameter.
    #[must_use]
    pub fn body_text(&self) -> String {
        decode_text(&self.decode_body(), self.content_type().charset())
    }
}

/// MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Top-level entity; its headers are the message headers.
    pub root: Part,
}

impl Message {
    /// Parses a raw RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or has no header line at all.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Empty);
        }

        let root = Part::parse(raw, 0);
        if root.headers.is_empty() {
            return Err(Error::NoHeaders);
        }

        Ok(Self { root })
    }

    /// Message headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Decoded `Subject`, unfolded.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers().get_decoded("subject")
    }

    /// First mailbox of the `From` header.
    #[must_use]
    pub fn from(&self) -> Option<Mailbox> {
        self.mailboxes("from").into_iter().next()
    }

    /// Mailboxes of the `To` header.
    #[must_use]
    pub fn to(&self) -> Vec<Mailbox> {
        self.mailboxes("to")
    }

    /// Mailboxes of the `Cc` header.
    #[must_use]
    pub fn cc(&self) -> Vec<Mailbox> {
        self.mailboxes("cc")
    }

    /// `Message-ID` without angle brackets.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.headers()
            .get("message-id")
            .and_then(|id| parse_message_ids(id).into_iter().next())
    }

    /// Ids listed in `In-Reply-To`.
    #[must_use]
    pub fn in_reply_to(&self) -> Vec<String> {
        self.id_list("in-reply-to")
    }

    /// Ids listed in `References`.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.id_list("references")
    }

    fn mailboxes(&self, name: &str) -> Vec<Mailbox> {
        self.headers()
            .get_all(name)
            .into_iter()
            .flat_map(parse_mailbox_list)
            .collect()
    }

    fn id_list(&self, name: &str) -> Vec<String> {
        self.headers()
            .get_all(name)
            .into_iter()
            .flat_map(parse_message_ids)
            .collect()
    }
}

fn content_type_of(headers: &Headers) -> ContentType {
    headers
        .get("content-type")
        .and_then(|ct| ContentType::parse(ct).ok())
        .unwrap_or_else(ContentType::text_plain)
}

/// Split an entity into header block and body at the first blank line.
fn split_headers_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|idx| (idx, 4));
    let lf = find(raw, b"\n\n").map(|idx| (idx, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((idx, len)) => (&raw[..idx], &raw[idx + len..]),
        None => (raw, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split a multipart body into its parts using the boundary.
///
/// The preamble and epilogue are dropped. A missing close delimiter keeps
/// the last part.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive(|&b| b == b'\n') {
        let trimmed = line.trim_ascii_end();
        if let Some(rest) = trimmed.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if rest.is_empty() || closing {
                if let Some(begin) = start.take() {
                    parts.push(strip_trailing_newline(&body[begin..offset]));
                }
                if closing {
                    return parts;
                }
                start = Some(offset + line.len());
            }
        }
        offset += line.len();
    }

    if let Some(begin) = start {
        parts.push(&body[begin..]);
    }
    parts
}

fn strip_trailing_newline(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MULTIPART: &str = concat!(
        "From: \"John Smith\" <jsmith@example.net>\r\n",
        "To: tracker@example.net\r\n",
        "Subject: =?utf-8?Q?Caf=C3=A9?= order\r\n",
        "Message-ID: <abc@example.net>\r\n",
        "References: <r1@example.net> <r2@example.net>\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "This is the preamble.\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=inner\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=iso-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "Caf=E9 au lait\r\n",
        "--inner\r\n",
        "Content-Type: text/html\r\n",
        "\r\n",
        "<p>Caf&eacute;</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/octet-stream; name=\"data.bin\"\r\n",
        "Content-Disposition: attachment\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "AAEC\r\n",
        "--outer--\r\n",
        "Epilogue\r\n"
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_message_single_part() {
        let raw = b"From: sender@example.com\nSubject: Test\n\nHello, World!";
        let message = Message::parse(raw).unwrap();

        assert_eq!(message.from().unwrap().address, "sender@example.com");
        assert_eq!(message.subject().as_deref(), Some("Test"));
        assert!(!message.root.is_multipart());
        assert_eq!(message.root.body_text(), "Hello, World!");
    }

    #[test]
    fn test_message_multipart_tree() {
        let message = Message::parse(MULTIPART.as_bytes()).unwrap();

        assert_eq!(message.subject().as_deref(), Some("Café order"));
        assert_eq!(message.message_id().as_deref(), Some("abc@example.net"));
        assert_eq!(message.references(), vec!["r1@example.net", "r2@example.net"]);
        assert_eq!(message.from().unwrap().name.as_deref(), Some("John Smith"));

        assert_eq!(message.root.parts.len(), 2);
        let alternative = &message.root.parts[0];
        assert_eq!(alternative.parts.len(), 2);
        assert_eq!(alternative.parts[0].body_text(), "Café au lait");
        assert!(alternative.parts[1].content_type().is("text", "html"));

        let attachment = &message.root.parts[1];
        assert!(attachment.is_attachment());
        assert_eq!(attachment.filename().as_deref(), Some("data.bin"));
        assert_eq!(attachment.decode_body(), vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_close_delimiter_keeps_last_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b\n",
            "\n",
            "--b\n",
            "\n",
            "first\n",
            "--b\n",
            "\n",
            "second\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.root.parts.len(), 2);
        assert_eq!(message.root.parts[1].body_text(), "second\n");
    }

    #[test]
    fn test_multipart_without_boundary_is_leaf() {
        let raw = b"Content-Type: multipart/mixed\n\nbody";
        let message = Message::parse(raw).unwrap();
        assert!(!message.root.is_multipart());
        assert_eq!(message.root.body, b"body");
    }

    #[test]
    fn test_invalid_base64_returns_raw() {
        let mut headers = Headers::new();
        headers.add("Content-Transfer-Encoding", "base64");
        let part = Part::new(headers, b"@@@".to_vec());
        assert_eq!(part.decode_body(), b"@@@");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(Message::parse(b""), Err(Error::Empty)));
        assert!(matches!(Message::parse(b"  \r\n"), Err(Error::Empty)));
        assert!(matches!(
            Message::parse(b"no headers here\nat all"),
            Err(Error::NoHeaders)
        ));
    }
}
