//! Editor-side text and the column units the protocol speaks.
//!
//! LSP columns count UTF-16 code units; everything behind the protocol
//! boundary counts chars.

use ropey::Rope;

use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent};

/// Zero-based line `line` of `text` without its terminator, or `""` past
/// the end.
pub fn nth_line(text: &str, line: u32) -> &str {
    text.lines().nth(line as usize).unwrap_or("")
}

/// Chars covered by the first `units` UTF-16 code units of `line`, clamped
/// to the line. A count that splits a surrogate pair includes that char.
pub fn utf16_to_chars(line: &str, units: u32) -> u32 {
    let mut seen = 0;
    let mut chars = 0;
    for c in line.chars() {
        if seen >= units {
            break;
        }
        seen += c.len_utf16() as u32;
        chars += 1;
    }
    chars
}

/// UTF-16 code units taken by the first `chars` chars of `line`.
pub fn chars_to_utf16(line: &str, chars: u32) -> u32 {
    line.chars()
        .take(chars as usize)
        .map(|c| c.len_utf16() as u32)
        .sum()
}

/// Converts an LSP position to a char offset in the Rope, clamped to the text.
fn position_to_char_offset(position: &Position, text: &Rope) -> usize {
    let line = (position.line as usize).min(text.len_lines().saturating_sub(1));
    let line_start = text.line_to_char(line);
    let line_len = text.line(line).len_chars();
    let start_units = text.char_to_utf16_cu(line_start);
    let line_units = text.char_to_utf16_cu(line_start + line_len) - start_units;
    text.utf16_cu_to_char(start_units + (position.character as usize).min(line_units))
}

/// Editor-side text of one open document.
#[derive(Debug, Clone)]
pub struct OpenDocument {
    pub text: Rope,
    pub version: i32,
}

impl OpenDocument {
    pub fn new(text: &str, version: i32) -> Self {
        Self {
            text: Rope::from_str(text),
            version,
        }
    }

    /// Applies content changes in order and returns the new full text.
    /// Versions not newer than the current one are refused.
    pub fn apply(
        &mut self,
        changes: &[TextDocumentContentChangeEvent],
        version: i32,
    ) -> Result<String, String> {
        if version <= self.version {
            return Err(format!("Version {} not newer than {}", version, self.version));
        }
        for change in changes {
            if let Some(range) = change.range {
                let start = position_to_char_offset(&range.start, &self.text);
                let end = position_to_char_offset(&range.end, &self.text).max(start);
                self.text.remove(start..end);
                self.text.insert(start, &change.text);
            } else {
                self.text = Rope::from_str(&change.text);
            }
        }
        self.version = version;
        Ok(self.text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    fn change(range: Option<((u32, u32), (u32, u32))>, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: range.map(|(a, b)| Range::new(Position::new(a.0, a.1), Position::new(b.0, b.1))),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_apply_full_change() {
        let mut doc = OpenDocument::new("initial text", 0);
        let result = doc.apply(&[change(None, "new text")], 1);
        assert_eq!(result.unwrap(), "new text");
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_apply_incremental_changes_in_order() {
        let mut doc = OpenDocument::new("-module(a).\nf() -> ok.\n", 1);
        let changes = [
            change(Some(((1, 7), (1, 9))), "error"),
            change(Some(((0, 8), (0, 9))), "b"),
        ];
        assert_eq!(doc.apply(&changes, 2).unwrap(), "-module(b).\nf() -> error.\n");
    }

    #[test]
    fn test_apply_counts_characters_not_bytes() {
        let mut doc = OpenDocument::new("f() -> \"é\".\n", 1);
        let result = doc.apply(&[change(Some(((0, 10), (0, 10))), ", ok")], 2);
        assert_eq!(result.unwrap(), "f() -> \"é\", ok.\n");
    }

    #[test]
    fn test_apply_counts_utf16_units_past_astral_chars() {
        // The emoji is one char but two UTF-16 units.
        let mut doc = OpenDocument::new("f() -> \"😀\".\n", 1);
        let result = doc.apply(&[change(Some(((0, 11), (0, 11))), ", ok")], 2);
        assert_eq!(result.unwrap(), "f() -> \"😀\", ok.\n");
    }

    #[test]
    fn test_column_unit_conversion() {
        let line = "a😀b";
        assert_eq!(utf16_to_chars(line, 0), 0);
        assert_eq!(utf16_to_chars(line, 1), 1);
        assert_eq!(utf16_to_chars(line, 3), 2);
        assert_eq!(utf16_to_chars(line, 4), 3);
        assert_eq!(utf16_to_chars(line, 99), 3);
        assert_eq!(chars_to_utf16(line, 2), 3);
        assert_eq!(chars_to_utf16(line, 3), 4);
        assert_eq!(nth_line("x\r\ny", 1), "y");
        assert_eq!(nth_line("x", 4), "");
    }

    #[test]
    fn test_apply_outdated_version() {
        let mut doc = OpenDocument::new("initial text", 3);
        assert!(doc.apply(&[change(None, "new text")], 3).is_err());
        assert_eq!(doc.text.to_string(), "initial text");
        assert_eq!(doc.version, 3);
    }
}
