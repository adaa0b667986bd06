//! Raw message to [`Envelope`] decoding.

use crate::envelope::{AttachmentBlob, BodyFormat, Envelope};
use crate::error::Result;
use mailtrack_mime::{Message, Part};
use tracing::debug;

/// Decodes a raw RFC 5322 message into an [`Envelope`].
///
/// Recoverable problems (bad transfer encodings, unknown charsets, broken
/// boundaries) never fail decoding.
///
/// # Errors
///
/// Returns [`crate::IngestError::MalformedMessage`] if the input is empty or
/// contains no header line.
pub fn decode(raw: &[u8]) -> Result<Envelope> {
    let message = Message::parse(raw)?;

    let mut collector = Collector::default();
    collector.walk(&message.root, true);

    let (body_text, body_format) = if !collector.plain.is_empty() {
        (collector.plain.join("\n"), BodyFormat::Plain)
    } else if !collector.html.is_empty() {
        (collector.html.join("\n"), BodyFormat::Html)
    } else {
        (String::new(), BodyFormat::Plain)
    };

    let envelope = Envelope {
        from: message.from(),
        to: message.to(),
        cc: message.cc(),
        subject: message.subject().unwrap_or_default().trim().to_string(),
        message_id: message.message_id(),
        in_reply_to: message.in_reply_to(),
        references: message.references(),
        body_text,
        body_format,
        attachments: collector.attachments,
        headers: message.root.headers,
    };

    debug!(
        subject = %envelope.subject,
        format = ?envelope.body_format,
        attachments = envelope.attachments.len(),
        attachment_bytes = envelope.attachments_size(),
        "Decoded message"
    );
    Ok(envelope)
}

#[derive(Default)]
struct Collector {
    plain: Vec<String>,
    html: Vec<String>,
    attachments: Vec<AttachmentBlob>,
}

impl Collector {
    /// Visits a part. With `body` false only attachments are collected, which
    /// keeps inline images of an unused HTML alternative.
    fn walk(&mut self, part: &Part, body: bool) {
        if part.is_multipart() {
            if part.content_type().is("multipart", "alternative") {
                let chosen = choose_alternative(&part.parts);
                for (index, child) in part.parts.iter().enumerate() {
                    self.walk(child, body && Some(index) == chosen);
                }
            } else {
                for child in &part.parts {
                    self.walk(child, body);
                }
            }
            return;
        }

        let content_type = part.content_type();
        let is_text_body = !part.is_attachment()
            && (content_type.is("text", "plain") || content_type.is("text", "html"));

        if is_text_body {
            if body {
                let text = part.body_text();
                if content_type.is("text", "plain") {
                    self.plain.push(text);
                } else {
                    self.html.push(text);
                }
            }
            return;
        }

        if content_type.is_multipart() {
            // Multipart without a usable boundary: keep whatever text it has.
            if body {
                self.plain.push(part.body_text());
            }
            return;
        }

        self.attachments.push(self.blob(part));
    }

    fn blob(&self, part: &Part) -> AttachmentBlob {
        let content_type = part.content_type();
        let filename = part.filename().unwrap_or_else(|| {
            format!(
                "attachment-{}.{}",
                self.attachments.len() + 1,
                extension_for(&content_type.sub_type)
            )
        });
        let content_id = part.content_id();
        let inline = part.is_inline() || (part.disposition().is_none() && content_id.is_some());

        AttachmentBlob::new(filename, content_type.mime_type(), part.decode_body())
            .with_content_id(content_id)
            .with_inline(inline)
    }
}

/// Index of the preferred alternative: plain text, else HTML (possibly
/// wrapped in `multipart/related`), else the first one.
fn choose_alternative(parts: &[Part]) -> Option<usize> {
    let is = |part: &Part, main: &str, sub: &str| {
        !part.is_multipart() && part.content_type().is(main, sub)
    };

    parts
        .iter()
        .position(|p| is(p, "text", "plain"))
        .or_else(|| {
            parts
                .iter()
                .position(|p| is(p, "text", "html") || p.is_multipart())
        })
        .or_else(|| (!parts.is_empty()).then_some(0))
}

fn extension_for(sub_type: &str) -> &str {
    match sub_type {
        "jpeg" | "pjpeg" => "jpg",
        "plain" => "txt",
        "rfc822" => "eml",
        "octet-stream" | "" => "bin",
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        other => other,
    }
}
