//! MIME content type and content disposition handling.

use crate::charset::decode_text;
use crate::encoding::{decode_quoted_printable, decode_rfc2047};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// Creates a text/plain content type, the RFC 2045 default.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// Returns the `type/subtype` pair.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns true if this is `main/sub`.
    #[must_use]
    pub fn is(&self, main: &str, sub: &str) -> bool {
        self.main_type == main && self.sub_type == sub
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the legacy `name` parameter if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2=value2`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = s.split_once(';').unwrap_or((s, ""));

        let (main_type, sub_type) = type_str
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;

        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = parse_parameters(params);
        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)
    }
}

/// Disposition kind from the `Content-Disposition` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    /// Displayed inline with the body.
    Inline,
    /// Meant to be saved as a file.
    Attachment,
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition kind.
    pub kind: DispositionKind,
    /// Parameters (filename, size, ...).
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parses a disposition header. Unknown kinds are treated as attachments,
    /// as RFC 2183 requires.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, params) = s.split_once(';').unwrap_or((s, ""));
        let kind = if kind.trim().eq_ignore_ascii_case("inline") {
            DispositionKind::Inline
        } else {
            DispositionKind::Attachment
        };
        Self {
            kind,
            parameters: parse_parameters(params),
        }
    }

    /// Returns the `filename` parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

/// Parses `; key=value` parameter lists.
///
/// Handles quoted values containing `;`, RFC 2231 extended values
/// (`filename*=utf-8''na%C3%AFve.txt`), RFC 2231 continuations
/// (`name*0=`, `name*1=`) and RFC 2047 words that some clients put into
/// quoted filenames.
fn parse_parameters(params: &str) -> HashMap<String, String> {
    let mut parameters = HashMap::new();
    let mut continuations: Vec<(String, usize, String)> = Vec::new();

    for param in split_parameters(params) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if let Some(base) = key.strip_suffix('*') {
            let (base, index) = split_section(base);
            continuations.push((base.to_string(), index, decode_extended(value)));
        } else {
            let value = unquote(value);
            let (base, index) = split_section(&key);
            if index > 0 || key.contains('*') {
                continuations.push((base.to_string(), index, value));
            } else if key == "name" || key == "filename" {
                parameters.insert(key, decode_rfc2047(&value));
            } else {
                parameters.insert(key, value);
            }
        }
    }

    // Extended and continued values win over a plain value of the same name.
    continuations.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut joined: HashMap<String, String> = HashMap::new();
    for (name, _, value) in continuations {
        joined.entry(name).or_default().push_str(&value);
    }
    parameters.extend(joined);

    parameters
}

/// Splits `name*N` into `("name", N)`.
fn split_section(key: &str) -> (&str, usize) {
    key.split_once('*')
        .and_then(|(base, n)| n.parse().ok().map(|n| (base, n)))
        .unwrap_or((key, 0))
}

/// Splits on `;` outside of double quotes.
fn split_parameters(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map_or_else(|| value.to_string(), |v| v.replace("\\\"", "\""))
}

/// Decodes an RFC 2231 extended value: `charset'lang'percent-encoded`.
fn decode_extended(value: &str) -> String {
    let value = unquote(value);
    let (charset, encoded) = match value.splitn(3, '\'').collect::<Vec<_>>()[..] {
        [charset, _lang, encoded] => (Some(charset), encoded),
        _ => (None, value.as_str()),
    };
    let bytes = decode_quoted_printable(encoded.replace('%', "=").as_bytes());
    decode_text(&bytes, charset)
}
