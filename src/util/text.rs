use std::borrow::Cow;

/// Ellipsis appended when a summary is cut short
const ELLIPSIS: &str = "...";

/// Truncates a string to at most `max_chars` characters.
///
/// When truncation is needed the result ends with `"..."` and still fits
/// inside `max_chars`. Bounds narrower than the ellipsis keep as many
/// characters as fit without one.
///
/// Returns `Cow::Borrowed` when the input already fits.
///
/// # Examples
///
/// ```
/// use feedwatch::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("Test", 2), "Te");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    let mut indices = s.char_indices();
    // Byte offset of the first char past the bound, if any
    let Some((overflow, _)) = indices.nth(max_chars) else {
        return Cow::Borrowed(s);
    };

    let ellipsis_len = ELLIPSIS.chars().count();
    if max_chars <= ellipsis_len {
        return Cow::Owned(s[..overflow].to_string());
    }

    let keep = max_chars - ellipsis_len;
    let cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(overflow);
    let head = s[..cut].trim_end();
    Cow::Owned(format!("{head}{ELLIPSIS}"))
}

/// Converts an HTML fragment into a single line of plain text.
///
/// Tags, comments and `<script>`/`<style>` bodies are dropped, the common
/// named and numeric entities are decoded, control characters are removed
/// and whitespace runs collapse to one space.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        let tail = &rest[open..];

        if let Some(body) = tail.strip_prefix("<!--") {
            rest = match body.find("-->") {
                Some(end) => &body[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(close) = tail.find('>') else {
            // Unterminated tag: the remainder is markup, not text
            rest = "";
            break;
        };
        let tag = tail[1..close].trim_start_matches('/');
        let name: String = tag
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        rest = &tail[close + 1..];

        if (name == "script" || name == "style") && !tail[1..].starts_with('/') {
            let end_tag = format!("</{name}");
            rest = match find_ascii_case_insensitive(rest, &end_tag) {
                Some(end) => match rest[end..].find('>') {
                    Some(gt) => &rest[end + gt + 1..],
                    None => "",
                },
                None => "",
            };
        }

        // Block-level tags separate words
        text.push(' ');
    }
    text.push_str(rest);

    let decoded = decode_entities(&text);
    let clean = strip_control_chars(&decoded);
    collapse_whitespace(&clean)
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "copy" => '\u{00A9}',
        _ => return None,
    };
    Some(c)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips control characters and ANSI escape sequences from feed text.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().copied().any(is_stripped_byte) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            match bytes.get(i + 1) {
                Some(b'[') => {
                    // CSI: parameter bytes up to and including the final byte
                    i += 2;
                    while i < len {
                        let c = bytes[i];
                        i += 1;
                        if (0x40..=0x7e).contains(&c) {
                            break;
                        }
                    }
                }
                Some(b']') => {
                    // OSC: until BEL or ST
                    i += 2;
                    while i < len {
                        if bytes[i] == 0x07 {
                            i += 1;
                            break;
                        }
                        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        } else if is_stripped_byte(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped_byte(bytes[i]) {
                i += 1;
            }
            // Only ASCII bytes end a run, so the slice is on char boundaries.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_stripped_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}
