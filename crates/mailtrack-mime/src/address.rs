//! Address-list and message-id list parsing (RFC 5322, leniently).

use crate::encoding::decode_rfc2047;
use std::fmt;

/// A single mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, RFC 2047 decoded and unquoted.
    pub name: Option<String>,
    /// Address (`local@domain`), as written.
    pub address: String,
}

impl Mailbox {
    /// Creates a mailbox without display name.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Part of the address before `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map_or(self.address.as_str(), |(local, _)| local)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Parses an address-list header value (`From`, `To`, `Cc`).
///
/// Entries without an address (empty groups, garbage) are skipped.
#[must_use]
pub fn parse_mailbox_list(value: &str) -> Vec<Mailbox> {
    split_outside_quotes(value, ',')
        .into_iter()
        .filter_map(parse_mailbox)
        .collect()
}

fn parse_mailbox(entry: &str) -> Option<Mailbox> {
    let mut entry = entry.trim().trim_end_matches(';').trim();

    // Group syntax: `Team: a@example.com` keeps only the member part.
    if let Some(idx) = find_outside_quotes(entry, ':')
        && !entry[..idx].contains(['<', '@'])
    {
        entry = entry[idx + 1..].trim();
    }

    let (name, address) = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = strip_comments(&entry[..open]);
            (name, entry[open + 1..close].trim().to_string())
        }
        _ => {
            let address = strip_comments(entry);
            let comment = entry
                .find('(')
                .zip(entry.rfind(')'))
                .filter(|(open, close)| open < close)
                .map(|(open, close)| entry[open + 1..close].to_string());
            (comment.unwrap_or_default(), address)
        }
    };

    if address.is_empty() || !address.contains('@') {
        return None;
    }

    let name = decode_rfc2047(unquote(name.trim()).trim());
    Some(Mailbox {
        name: (!name.is_empty()).then_some(name),
        address,
    })
}

/// Parses a message-id list (`Message-ID`, `In-Reply-To`, `References`).
///
/// Angle brackets are removed. Values without brackets are split on
/// whitespace.
#[must_use]
pub fn parse_message_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let id = rest[open + 1..open + close].trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
        rest = &rest[open + close + 1..];
    }

    if ids.is_empty() {
        ids = value
            .split_whitespace()
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string())
            .filter(|id| !id.is_empty())
            .collect();
    }

    ids
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }

    out.trim().to_string()
}

fn unquote(text: &str) -> String {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .map_or_else(|| text.to_string(), |t| t.replace("\\\"", "\""))
}

fn find_outside_quotes(text: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    text.char_indices().find_map(|(i, c)| {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        (c == needle && !in_quotes).then_some(i)
    })
}

fn split_outside_quotes(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            c if c == separator && !in_quotes && !in_angle => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
