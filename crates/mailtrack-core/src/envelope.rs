//! Decoded inbound message.

use mailtrack_mime::{Headers, Mailbox};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Origin of the envelope body text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// Taken from `text/plain` parts.
    #[default]
    Plain,
    /// Taken from a `text/html` part; needs conversion before use.
    Html,
}

/// A decoded attachment.
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentBlob {
    /// File name.
    pub filename: String,
    /// MIME type (`type/subtype`).
    pub mime_type: String,
    /// Size in bytes.
    pub byte_length: u64,
    /// Decoded content.
    pub content: Vec<u8>,
    /// Lowercase hex SHA-256 of `content`.
    pub digest: String,
    /// `Content-ID` without angle brackets, for parts referenced by HTML.
    pub content_id: Option<String>,
    /// Part was marked for inline display.
    pub inline: bool,
}

impl AttachmentBlob {
    /// Creates a blob, computing its length and digest.
    #[must_use]
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        let digest = format!("{:x}", Sha256::digest(&content));
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            byte_length: content.len() as u64,
            content,
            digest,
            content_id: None,
            inline: false,
        }
    }

    /// Sets the content id.
    #[must_use]
    pub fn with_content_id(mut self, content_id: Option<String>) -> Self {
        self.content_id = content_id;
        self
    }

    /// Sets the inline flag.
    #[must_use]
    pub const fn with_inline(mut self, inline: bool) -> Self {
        self.inline = inline;
        self
    }
}

impl std::fmt::Debug for AttachmentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentBlob")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("byte_length", &self.byte_length)
            .field("digest", &self.digest)
            .field("content_id", &self.content_id)
            .field("inline", &self.inline)
            .finish_non_exhaustive()
    }
}

/// Structure-normalized inbound email.
///
/// Built once by [`crate::decode`] and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Sender mailbox.
    pub from: Option<Mailbox>,
    /// `To` recipients.
    pub to: Vec<Mailbox>,
    /// `Cc` recipients.
    pub cc: Vec<Mailbox>,
    /// Decoded, unfolded subject.
    pub subject: String,
    /// `Message-ID` without angle brackets.
    pub message_id: Option<String>,
    /// `In-Reply-To` ids.
    pub in_reply_to: Vec<String>,
    /// `References` ids.
    pub references: Vec<String>,
    /// Body text, plain or HTML depending on `body_format`.
    pub body_text: String,
    /// Origin of `body_text`.
    pub body_format: BodyFormat,
    /// Attachments in message order.
    pub attachments: Vec<AttachmentBlob>,
    /// All top-level headers.
    pub headers: Headers,
}

impl Envelope {
    /// First value of a top-level header, RFC 2047 decoded and trimmed.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get_decoded(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Sender address, if any.
    #[must_use]
    pub fn sender_address(&self) -> Option<&str> {
        self.from.as_ref().map(|mailbox| mailbox.address.as_str())
    }

    /// `In-Reply-To` ids followed by `References` ids.
    pub fn reference_ids(&self) -> impl Iterator<Item = &str> {
        self.in_reply_to
            .iter()
            .chain(&self.references)
            .map(String::as_str)
    }

    /// Total decoded size of all attachments.
    #[must_use]
    pub fn attachments_size(&self) -> u64 {
        self.attachments.iter().map(|a| a.byte_length).sum()
    }
}
