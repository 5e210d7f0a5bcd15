//! STOMP 1.1+ header escaping.
//!
//! Three octets are significant inside a header line and get escaped:
//! - backslash (0x5c) ↔ `\\`
//! - line feed (0x0a) ↔ `\n`
//! - colon (0x3a) ↔ `\c`
//!
//! Escaping never applies to the command line, the body, protocol 1.0
//! frames, or CONNECT/STOMP frames.

/// Escape a header key or value for the wire.
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            _ => out.push(ch),
        }
    }
    out
}

/// Undo [`encode`]. Best effort: an unknown escape sequence or a trailing
/// lone backslash is kept as-is.
pub fn decode(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
