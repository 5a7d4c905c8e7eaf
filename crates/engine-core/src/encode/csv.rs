/// The on-wire CSV dialect. Delimiter and quote are configurable; the
/// null-vs-empty rule is fixed: an unquoted empty field IS NULL, a quoted
/// empty field (`""`) is the empty string.
#[derive(Debug, Clone, Copy)]
pub struct CsvDialect {
    pub delimiter: char,
    pub quote: char,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
        }
    }
}

impl CsvDialect {
    /// Appends one field to `out`. `None` is SQL NULL and emits nothing
    /// (unquoted empty); any present value is rendered, 0x00 stripped, and
    /// quoted when its bytes could otherwise be mangled or reinterpreted.
    pub fn write_field(&self, out: &mut String, value: Option<&str>) {
        let Some(raw) = value else {
            return;
        };

        let cleaned: String;
        let text = if raw.contains('\0') {
            // 0x00 is invalid in the target's text protocol.
            cleaned = raw.chars().filter(|&c| c != '\0').collect();
            &cleaned
        } else {
            raw
        };

        if self.needs_quoting(text) {
            out.push(self.quote);
            for ch in text.chars() {
                if ch == self.quote {
                    out.push(self.quote);
                }
                out.push(ch);
            }
            out.push(self.quote);
        } else {
            out.push_str(text);
        }
    }

    /// Empty strings must be quoted so they stay distinct from NULL;
    /// leading/trailing whitespace (including whitespace-only values) is
    /// quoted so the parser cannot trim it; non-printable-ASCII bytes are
    /// quoted so they travel opaquely.
    fn needs_quoting(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        let first = text.chars().next().unwrap_or('\0');
        let last = text.chars().next_back().unwrap_or('\0');
        if first.is_whitespace() || last.is_whitespace() {
            return true;
        }
        text.chars().any(|c| {
            c == self.delimiter
                || c == self.quote
                || c == '\r'
                || c == '\n'
                || !matches!(c, '\x20'..='\x7e')
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: Option<&str>) -> String {
        let mut out = String::new();
        CsvDialect::default().write_field(&mut out, value);
        out
    }

    #[test]
    fn null_is_unquoted_empty() {
        assert_eq!(field(None), "");
    }

    #[test]
    fn empty_string_is_quoted_empty() {
        assert_eq!(field(Some("")), "\"\"");
    }

    #[test]
    fn whitespace_only_is_quoted() {
        assert_eq!(field(Some("   ")), "\"   \"");
        assert_eq!(field(Some("\t")), "\"\t\"");
    }

    #[test]
    fn leading_and_trailing_whitespace_is_quoted() {
        assert_eq!(field(Some(" x")), "\" x\"");
        assert_eq!(field(Some("x ")), "\"x \"");
        assert_eq!(field(Some("a b")), "a b");
    }

    #[test]
    fn delimiter_and_newlines_force_quoting() {
        assert_eq!(field(Some("a,b")), "\"a,b\"");
        assert_eq!(field(Some("a\nb")), "\"a\nb\"");
        assert_eq!(field(Some("a\rb")), "\"a\rb\"");
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(field(Some("say \"hi\"")), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn non_printable_ascii_is_quoted() {
        assert_eq!(field(Some("héllo")), "\"héllo\"");
        assert_eq!(field(Some("a\x01b")), "\"a\x01b\"");
    }

    #[test]
    fn null_bytes_are_stripped() {
        assert_eq!(field(Some("a\0b")), "ab");
        // Stripping applies inside quoted fields too.
        assert_eq!(field(Some("a\0,b")), "\"a,b\"");
    }

    #[test]
    fn plain_values_pass_through_unquoted() {
        assert_eq!(field(Some("plain")), "plain");
        assert_eq!(field(Some("1234")), "1234");
    }

    #[test]
    fn custom_delimiter_changes_quoting_trigger() {
        let dialect = CsvDialect {
            delimiter: '|',
            quote: '"',
        };
        let mut out = String::new();
        dialect.write_field(&mut out, Some("a,b"));
        assert_eq!(out, "a,b");
        out.clear();
        dialect.write_field(&mut out, Some("a|b"));
        assert_eq!(out, "\"a|b\"");
    }
}
