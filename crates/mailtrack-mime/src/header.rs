//! MIME header handling.

use crate::encoding::decode_rfc2047;
use std::collections::HashMap;

/// Collection of email headers.
///
/// Names are case-insensitive; values keep their raw (still encoded) form and
/// their order of appearance per name.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        self.headers.entry(name).or_default().push(value);
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all raw values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Gets the first value for a header with RFC 2047 encoded words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Returns true if no header was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Parses the header block at the start of `text`.
    ///
    /// The block ends at the first empty line. Folded lines are unfolded
    /// before splitting on the first colon:
    /// ```text
    /// Content-Type: text/plain;
    ///   charset=utf-8
    /// ```
    ///
    /// Lines that are neither a field nor a continuation (an mbox `From `
    /// separator, stray garbage) are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        for field in unfold(text) {
            let Some((name, value)) = field.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                continue;
            }
            headers.add(name, value.trim());
        }
        headers
    }
}

/// Joins continuation lines onto the field they belong to.
fn unfold(text: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for line in text.lines().take_while(|line| !line.is_empty()) {
        match fields.last_mut() {
            Some(field) if line.starts_with([' ', '\t']) => {
                field.push(' ');
                field.push_str(line.trim());
            }
            // A leading continuation has nothing to attach to.
            None if line.starts_with([' ', '\t']) => {}
            _ => fields.push(line.to_string()),
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_get_all_keeps_order() {
        let mut headers = Headers::new();
        headers.add("Received", "first");
        headers.add("received", "second");
        assert_eq!(headers.get_all("RECEIVED"), vec!["first", "second"]);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Body: not a header\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(headers.get("Body"), None);
    }

    #[test]
    fn test_headers_parse_skips_mbox_separator() {
        let text = "From jsmith@example.net  Sun Dec 05 10:00:00 2010\nSubject: Hi\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("Subject"), Some("Hi"));
        assert_eq!(headers.get_all("from").len(), 0);
    }

    #[test]
    fn test_headers_get_decoded() {
        let mut headers = Headers::new();
        headers.add("Subject", "=?utf-8?B?SMOpbGxv?= world");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo world"));
    }

    #[test]
    fn test_headers_garbage_is_empty() {
        assert!(Headers::parse("just some text\nwithout any header").is_empty());
    }
}
