//! Charset decoding into UTF-8 text.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Decodes `bytes` labelled with `charset` into a `String`.
///
/// Unknown or missing labels fall back to UTF-8, and bytes that are not
/// valid UTF-8 fall back to windows-1252, which maps every byte. Decoding
/// therefore never fails.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    match encoding {
        Some(encoding) if encoding != UTF_8 => encoding.decode_with_bom_removal(bytes).0.into_owned(),
        _ => decode_utf8_or_latin(bytes),
    }
}

/// Decodes bytes as UTF-8, or as windows-1252 when they are not valid UTF-8.
#[must_use]
pub fn decode_utf8_or_latin(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
    }
}
