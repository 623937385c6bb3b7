//! RFC 5545 line folding/unfolding and text value escaping.

/// Unfold an RFC 5545 content-line stream: a CRLF (or bare LF) followed
/// by a single space or horizontal tab is a continuation and is joined
/// back onto the previous line by dropping the line break and the one
/// whitespace character.
pub fn unfold(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            if matches!(bytes.get(i + 2), Some(b' ') | Some(b'\t')) {
                i += 3;
                continue;
            }
            out.push('\n');
            i += 2;
            continue;
        }
        if b == b'\n' {
            if matches!(bytes.get(i + 1), Some(b' ') | Some(b'\t')) {
                i += 2;
                continue;
            }
            out.push('\n');
            i += 1;
            continue;
        }
        // copy one UTF-8 scalar
        let ch_len = utf8_char_len(b);
        out.push_str(std::str::from_utf8(&bytes[i..i + ch_len]).unwrap_or("\u{FFFD}"));
        i += ch_len;
    }
    out
}

fn utf8_char_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else if first_byte & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

/// Split unfolded text into logical content lines, dropping blank
/// trailing lines produced by a final CRLF.
pub fn split_lines(unfolded: &str) -> Vec<String> {
    unfolded
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Fold a single logical content line to at most 75 octets per output
/// line, continuation lines prefixed by a single space, breaking only
/// on UTF-8 character boundaries. Returns the line with embedded CRLF
/// continuations, WITHOUT a trailing CRLF.
pub fn fold_line(line: &str) -> String {
    const LIMIT: usize = 75;
    let bytes = line.as_bytes();
    if bytes.len() <= LIMIT {
        return line.to_string();
    }

    let mut out = String::with_capacity(bytes.len() + bytes.len() / LIMIT * 3);
    let mut line_start = 0usize;
    let mut budget = LIMIT;
    let mut i = 0usize;
    let mut first_chunk = true;

    while i < bytes.len() {
        let ch_len = utf8_char_len(bytes[i]);
        if i - line_start + ch_len > budget {
            out.push_str(&line[line_start..i]);
            out.push_str("\r\n ");
            line_start = i;
            budget = LIMIT - 1; // continuation line already consumed 1 octet for the leading space
            first_chunk = false;
        }
        i += ch_len;
    }
    let _ = first_chunk;
    out.push_str(&line[line_start..]);
    out
}

/// Decode an iCalendar TEXT value: backslash escapes and the handful of
/// HTML entities some servers embed in DESCRIPTION/SUMMARY values.
pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') | Some('N') => {
                    out.push('\n');
                    chars.next();
                }
                Some(';') => {
                    out.push(';');
                    chars.next();
                }
                Some(',') => {
                    out.push(',');
                    chars.next();
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    decode_html_entities(&out)
}

fn decode_html_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        if let Some(semi) = tail.find(';') {
            let entity = &tail[1..semi];
            let replacement = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with('#') => entity[1..]
                    .trim_start_matches(['x', 'X'])
                    .parse::<u32>()
                    .ok()
                    .or_else(|| u32::from_str_radix(entity[2..].trim_start_matches(['x', 'X']), 16).ok())
                    .and_then(char::from_u32),
                _ => None,
            };
            match replacement {
                Some(c) => {
                    out.push(c);
                    rest = &tail[semi + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            }
        } else {
            out.push('&');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Encode an iCalendar TEXT value with the inverse of [`unescape_text`].
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfold_joins_space_continuation() {
        let raw = "DESCRIPTION:Hello\r\n World\r\n";
        assert_eq!(unfold(raw).trim_end(), "DESCRIPTION:Hello World");
    }

    #[test]
    fn unfold_handles_bare_lf() {
        let raw = "SUMMARY:Foo\n Bar\n";
        assert_eq!(unfold(raw).trim_end(), "SUMMARY:Foo Bar");
    }

    #[test]
    fn fold_breaks_at_75_octets_on_char_boundary() {
        let long = "DESCRIPTION:".to_string() + &"x".repeat(200);
        let folded = fold_line(&long);
        for line in folded.split("\r\n") {
            assert!(line.as_bytes().len() <= 75);
        }
        let rejoined = folded.replace("\r\n ", "");
        assert_eq!(rejoined, long);
    }

    #[test]
    fn escape_unescape_roundtrip() {
        let original = "Line one\nLine; two, with\\slash";
        let escaped = escape_text(original);
        assert_eq!(unescape_text(&escaped), original);
    }

    #[test]
    fn unescape_decodes_html_entities() {
        assert_eq!(unescape_text("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(unescape_text("&#65;&#x42;"), "AB");
    }
}
