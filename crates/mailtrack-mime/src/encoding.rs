//! MIME decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header decoding. Every
//! decoder here is lenient: real mail clients produce sloppy encodings, and a
//! best-effort result is more useful to ingestion than an error.

use crate::charset::decode_text;
use crate::error::Result;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Base64 engine that accepts missing padding and non-zero trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable bytes (RFC 2045).
///
/// Soft line breaks are removed. Malformed escape sequences are kept
/// literally instead of failing.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        match data.get(i + 1..) {
            // Soft line break
            Some([b'\r', b'\n', ..]) => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some([hi, lo, ..]) => match (hex_value(*hi), hex_value(*lo)) {
                (Some(hi), Some(lo)) => {
                    result.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    result.push(b'=');
                    i += 1;
                }
            },
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Format: `=?charset?encoding?encoded-text?=`
///
/// Whitespace between two adjacent encoded words is dropped, as the RFC
/// requires. Words that cannot be decoded are left untouched.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_encoded_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = decode_encoded_word(candidate) {
            if !(after_encoded_word && before.trim().is_empty()) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_encoded_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_encoded_word = false;
        }
    }

    out.push_str(rest);
    out
}

/// Decodes one encoded word at the start of `word`.
///
/// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(word: &str) -> Option<(String, usize)> {
    let inner = word.strip_prefix("=?")?;
    let (charset, inner) = inner.split_once('?')?;
    let (encoding, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let payload = &inner[..end];

    if charset.is_empty() || payload.contains(char::is_whitespace) {
        return None;
    }
    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload.as_bytes()).ok()?,
        "Q" | "q" => decode_quoted_printable(payload.replace('_', " ").as_bytes()),
        _ => return None,
    };

    Some((decode_text(&bytes, Some(charset)), consumed))
}
