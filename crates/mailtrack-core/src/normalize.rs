//! Body cleanup: HTML stripping, quoted-block removal, delimiter truncation.

use crate::envelope::{BodyFormat, Envelope};

/// Cleans a plain-text body.
///
/// Line endings become `\n`, a leading quoted block is dropped, and the
/// text is cut at the earliest line matching any delimiter. Delimiters are
/// literal: a line matches when, after its leading `>` and space characters,
/// it starts with the delimiter and only whitespace follows. Blank
/// delimiters are ignored.
#[must_use]
pub fn normalize(body: &str, delimiters: &[String]) -> String {
    let text = body.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text.split('\n').collect();
    let lines = strip_leading_quote(&lines);

    let delimiters: Vec<&str> = delimiters
        .iter()
        .filter(|d| !d.trim().is_empty())
        .map(|d| d.trim_start())
        .collect();

    let end = lines
        .iter()
        .position(|line| {
            let candidate = line.trim_start_matches(['>', ' ']);
            delimiters.iter().any(|d| {
                candidate
                    .strip_prefix(*d)
                    .is_some_and(|rest| rest.trim().is_empty())
            })
        })
        .unwrap_or(lines.len());

    lines[..end].join("\n").trim().to_string()
}

/// Cleans the body of an envelope, stripping HTML bodies first.
#[must_use]
pub fn clean_body(envelope: &Envelope, delimiters: &[String]) -> String {
    match envelope.body_format {
        BodyFormat::Plain => normalize(&envelope.body_text, delimiters),
        BodyFormat::Html => normalize(&html_to_text(&envelope.body_text), delimiters),
    }
}

/// Converts HTML to plain text.
///
/// Tags are stripped and entities decoded. Line breaks and list or table
/// rows end a line, other block elements end a paragraph. Source whitespace
/// collapses the way a browser renders it, and the contents of `head`,
/// `script`, `style` and `title` are dropped.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut skip_until: Option<String> = None;
    let mut rest = html;

    while let Some(c) = rest.chars().next() {
        match c {
            '<' if rest.starts_with("<!--") => {
                rest = match rest.find("-->") {
                    Some(end) => &rest[end + 3..],
                    None => "",
                };
            }
            '<' => {
                let end = rest.find('>').unwrap_or(rest.len());
                let tag = &rest[1..end];
                rest = rest.get(end + 1..).unwrap_or("");

                let closing = tag.starts_with('/');
                let name: String = tag
                    .trim_start_matches('/')
                    .chars()
                    .take_while(char::is_ascii_alphanumeric)
                    .collect::<String>()
                    .to_ascii_lowercase();

                if let Some(hidden) = &skip_until {
                    if closing && *hidden == name {
                        skip_until = None;
                    }
                    continue;
                }
                if !closing && matches!(name.as_str(), "head" | "script" | "style" | "title") {
                    skip_until = Some(name);
                    continue;
                }
                match name.as_str() {
                    "br" | "li" | "tr" => break_line(&mut out, 1),
                    "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote"
                    | "pre" | "ul" | "ol" | "table" | "hr" => break_line(&mut out, 2),
                    "td" | "th" if !closing => push_space(&mut out),
                    _ => {}
                }
            }
            _ if skip_until.is_some() => rest = &rest[c.len_utf8()..],
            '&' => {
                let (decoded, len) = decode_entity(rest);
                match decoded {
                    Some(' ') => push_space(&mut out),
                    Some(ch) => out.push(ch),
                    None => out.push('&'),
                }
                rest = &rest[len..];
            }
            c if c.is_whitespace() => {
                push_space(&mut out);
                rest = &rest[c.len_utf8()..];
            }
            c => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    collapse_blank_lines(&out)
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with([' ', '\n']) {
        out.push(' ');
    }
}

/// Ends the current line so that at least `newlines` line breaks follow the
/// last text.
fn break_line(out: &mut String, newlines: usize) {
    let kept = out.trim_end_matches(' ').len();
    out.truncate(kept);
    if out.is_empty() {
        return;
    }
    let present = out.len() - out.trim_end_matches('\n').len();
    for _ in present..newlines {
        out.push('\n');
    }
}

/// Decodes the entity at the start of `text` (which begins with `&`).
///
/// Returns the character and the number of bytes consumed; an unknown or
/// unterminated entity consumes only the ampersand.
fn decode_entity(text: &str) -> (Option<char>, usize) {
    let Some(end) = text.get(1..).and_then(|t| t.find(';')).filter(|&end| end <= 10) else {
        return (None, 1);
    };
    let entity = &text[1..=end];
    let decoded = match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "mdash" => Some('\u{2014}'),
        "ndash" => Some('\u{2013}'),
        "hellip" => Some('\u{2026}'),
        "ldquo" => Some('\u{201C}'),
        "rdquo" => Some('\u{201D}'),
        "lsquo" => Some('\u{2018}'),
        "rsquo" => Some('\u{2019}'),
        "copy" => Some('\u{00A9}'),
        "reg" => Some('\u{00AE}'),
        "trade" => Some('\u{2122}'),
        _ => entity
            .strip_prefix("#x")
            .or_else(|| entity.strip_prefix("#X"))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .or_else(|| entity.strip_prefix('#')?.parse::<u32>().ok())
            .and_then(char::from_u32),
    };
    match decoded {
        Some(ch) => (Some(ch), end + 2),
        None => (None, 1),
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && out.last().is_none_or(|last| last.is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

/// Drops an optional `... wrote:` line followed by `>` lines at the very top.
fn strip_leading_quote<'a>(lines: &'a [&'a str]) -> &'a [&'a str] {
    let mut i = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());

    if lines.get(i).is_some_and(|line| line.trim_end().ends_with("wrote:")) {
        i += 1;
    }

    let quote_start = i;
    while lines
        .get(i)
        .is_some_and(|line| line.trim_start().starts_with('>'))
    {
        i += 1;
    }

    if i > quote_start { &lines[i..] } else { lines }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn delims(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    const BODY: &str = "Intro\n\nThis paragraph is before delimiters.\n\n\
        BREAK\n\nThis paragraph is between delimiters.\n\n---\n\n\
        This paragraph is after the delimiter so it shouldn't appear.\n";

    #[test]
    fn test_no_delimiters_keeps_everything() {
        let out = normalize(BODY, &[]);
        assert!(out.contains("This paragraph is after the delimiter"));
        assert!(out.contains("---"));
    }

    #[test]
    fn test_single_delimiter() {
        let body = "before\n--- This line starts with a delimiter\n---\nafter";
        let out = normalize(body, &delims(&["---"]));
        assert_eq!(out, "before\n--- This line starts with a delimiter");
    }

    #[test]
    fn test_earliest_in_text_wins_over_config_order() {
        let out = normalize(BODY, &delims(&["---", "BREAK"]));
        assert!(out.contains("This paragraph is before delimiters"));
        assert!(!out.contains("BREAK"));
        assert!(!out.contains("between delimiters"));
    }

    #[test]
    fn test_quoted_delimiter() {
        let body = "An update to the issue by the sender.\n\n\
            > > --- Reply above. Do not remove this line. ---\n\
            > > Looks like the JSON api for projects was missed.";
        let out = normalize(body, &delims(&["--- Reply above. Do not remove this line. ---"]));
        assert_eq!(out, "An update to the issue by the sender.");
    }

    #[test]
    fn test_blank_delimiter_ignored() {
        let body = "one\n\ntwo";
        assert_eq!(normalize(body, &delims(&["", "  "])), "one\n\ntwo");
    }

    #[test]
    fn test_leading_quote_block_removed() {
        let body = "\nOn Mon, Jan 4, John wrote:\n> old text\n> more\n\nNew text\r\n";
        assert_eq!(normalize(body, &[]), "New text");
    }

    #[test]
    fn test_attribution_without_quote_kept() {
        let body = "Somebody wrote:\nnothing quoted";
        assert_eq!(normalize(body, &[]), body);
    }

    #[test]
    fn test_delimiter_is_literal() {
        let body = "Thanks\n--\nstill here\n-- \nJohn";
        assert_eq!(normalize(body, &delims(&["-- "])), "Thanks\n--\nstill here");
        assert_eq!(normalize(body, &delims(&["--"])), "Thanks");
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>T</title><style>p {}</style></head>\
            <body><p>This is an HTML only email.</p><p></p><p></p><p>Second</p></body></html>";
        assert_eq!(html_to_text(html), "This is an HTML only email.\n\nSecond");
    }

    #[test]
    fn test_html_to_text_strips_inline_markup() {
        let html = "<p>Assigned to: john_smith</p>\n<p>This is a <b>html-only</b> email.</p>\n\
            <p>See <a href=\"http://x.org/a\">the page</a> *now*</p>";
        assert_eq!(
            html_to_text(html),
            "Assigned to: john_smith\n\nThis is a html-only email.\n\nSee the page *now*"
        );
    }

    #[test]
    fn test_html_line_breaks_and_whitespace() {
        let html = "<div>Status:\n   Resolved<br>Priority: Urgent</div>\
            <ul><li>one</li><li>two</li></ul><!-- hidden <p>x</p> -->tail";
        assert_eq!(
            html_to_text(html),
            "Status: Resolved\nPriority: Urgent\n\none\ntwo\n\ntail"
        );
    }

    #[test]
    fn test_html_entities() {
        assert_eq!(html_to_text("a &amp; b &lt;c&gt; &#233;&#xE9; &nbsp;x"), "a & b <c> éé x");
        assert_eq!(html_to_text("AT&T &bogus; &"), "AT&T &bogus; &");
    }

    #[test]
    fn test_html_unterminated_tag() {
        assert_eq!(html_to_text("text <b"), "text");
    }

    proptest! {
        #[test]
        fn normalize_output_has_no_delimiter_line(
            lines in proptest::collection::vec("[a-z >-]{0,8}", 0..20)
        ) {
            let body = lines.join("\n");
            let out = normalize(&body, &delims(&["--"]));
            for line in out.lines() {
                let candidate = line.trim_start_matches(|c| c == '>' || c == ' ').trim_end();
                prop_assert_ne!(candidate, "--");
            }
        }

        #[test]
        fn normalize_without_delimiters_is_idempotent(body in "[a-z \n]{0,64}") {
            let once = normalize(&body, &[]);
            prop_assert_eq!(normalize(&once, &[]), once.clone());
        }
    }
}
