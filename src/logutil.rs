//! Log sanitizing for text read from player and account files.
//!
//! Record lines, player names and notes come from disk and may contain
//! control characters or be arbitrarily long; everything logged from them
//! goes through [`escape_log`] so each log entry stays on one line.

use std::fmt::Write;

/// Default cap on characters kept from one logged value.
pub const MAX_PREVIEW: usize = 200;

/// Escape for single-line logging, truncating at [`MAX_PREVIEW`] characters.
pub fn escape_log(s: &str) -> String {
    escape_log_limit(s, MAX_PREVIEW)
}

/// Escape `\n`, `\r`, `\t`, backslash and other control characters (as
/// `\xNN`), truncating after `max` characters with an ellipsis.
pub fn escape_log_limit(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_block_text() {
        let esc = escape_log("A tall figure.\r\nWith a\that.");
        assert_eq!(esc, "A tall figure.\\r\\nWith a\\that.");
    }

    #[test]
    fn truncates_long_values() {
        let esc = escape_log_limit("abcdef", 3);
        assert_eq!(esc, "abc…");
        assert_eq!(escape_log("\u{1}"), "\\x01");
    }
}
