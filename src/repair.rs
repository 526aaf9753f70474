// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Lenient JSON parsing for upstream payloads.
//!
//! The TCE API sometimes wraps its JSON in HTML, prefixes it with a BOM, or
//! emits strings containing raw backslashes and control characters. This
//! module extracts the object region of such a body and, only when a strict
//! parse fails, repairs it character by character before trying again.

use serde::Serialize;
use serde_json::Value;

/// Maximum number of characters of repaired text kept in a diagnostic.
pub const DIAGNOSTIC_SNIPPET_CHARS: usize = 1600;

const BOM: char = '\u{FEFF}';

/// A successfully parsed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub value: Value,
    /// True when the strict parse failed and the repaired text was used.
    pub repaired: bool,
}

/// Why a payload could not be parsed even after repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairDiagnostic {
    pub parse_error: String,
    pub snippet: String,
}

/// Parse `text` as JSON, repairing it if the strict parse fails.
pub fn parse_lenient(text: &str) -> Result<ParsedPayload, RepairDiagnostic> {
    let candidate = extract_candidate(text);

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(ParsedPayload {
            value,
            repaired: false,
        });
    }

    let repaired = repair(candidate);

    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => Ok(ParsedPayload {
            value,
            repaired: true,
        }),
        Err(err) => Err(RepairDiagnostic {
            parse_error: err.to_string(),
            snippet: snippet(&repaired, DIAGNOSTIC_SNIPPET_CHARS),
        }),
    }
}

/// Slice from the first `{` to the last `}` of the trimmed text. Falls back
/// to the whole trimmed text when no such ordered pair exists, or when the
/// text is a top-level array.
pub fn extract_candidate(text: &str) -> &str {
    let trimmed = text.trim();

    if trimmed.starts_with('[') {
        return trimmed;
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(first), Some(last)) if last > first => &trimmed[first..=last],
        _ => trimmed,
    }
}

/// Apply every repair transform in order.
pub fn repair(text: &str) -> String {
    let text = strip_bom(text);
    let text = strip_control_chars(text);
    escape_stray_backslashes(&text)
}

pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(BOM).unwrap_or(text)
}

/// Drop C0 control characters other than tab, newline and carriage return.
pub fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|c| !is_stray_control(*c)).collect()
}

fn is_stray_control(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{0008}' | '\u{000B}' | '\u{000C}' | '\u{000E}'..='\u{001F}')
}

/// Double every backslash that does not start a valid JSON escape.
///
/// Valid escapes are copied as a unit, so `\\` followed by anything stays as
/// is. `\u` only counts when four hex digits follow.
pub fn escape_stray_backslashes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u') if is_unicode_escape(&chars[i + 2..]) => {
                out.push_str("\\u");
                i += 2;
            }
            _ => {
                out.push_str("\\\\");
                i += 1;
            }
        }
    }

    out
}

fn is_unicode_escape(rest: &[char]) -> bool {
    rest.len() >= 4 && rest[..4].iter().all(char::is_ascii_hexdigit)
}

/// First `limit` characters of `text`, never splitting a code point.
pub fn snippet(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_is_returned_untouched() {
        let parsed = parse_lenient(r#"{"path":"C:\\temp","n":1}"#).unwrap();
        assert!(!parsed.repaired);
        assert_eq!(parsed.value, json!({"path": "C:\\temp", "n": 1}));
    }

    #[test]
    fn surrounding_noise_is_discarded() {
        let body = "<html><pre>\n{\"data\":[{\"nome\":\"MARIA\"}]}\n</pre></html>";
        let parsed = parse_lenient(body).unwrap();
        assert!(!parsed.repaired);
        assert_eq!(parsed.value, json!({"data": [{"nome": "MARIA"}]}));
    }

    #[test]
    fn raw_backslashes_are_escaped() {
        let body = r#"{"arquivo":"C:\dados\novo\x.txt"}"#;
        let parsed = parse_lenient(body).unwrap();
        assert!(parsed.repaired);
        // `\n` and `\x` differ: the first is a valid escape and survives.
        assert_eq!(parsed.value, json!({"arquivo": "C:\\dados\novo\\x.txt"}));
    }

    #[test]
    fn malformed_unicode_escape_is_escaped() {
        let parsed = parse_lenient(r#"{"nome":"JOS\u00C9 \uZZ"}"#).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value, json!({"nome": "JOSÉ \\uZZ"}));
    }

    #[test]
    fn bom_and_control_characters_are_removed() {
        let body = "\u{FEFF}{\"a\":\"x\u{0001}y\u{001F}\",\"b\":\"tab\\there\"}";
        let parsed = parse_lenient(body).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value, json!({"a": "xy", "b": "tab\there"}));
    }

    #[test]
    fn control_char_filter_keeps_whitespace() {
        assert_eq!(strip_control_chars("a\tb\nc\rd\u{0B}e\u{0C}f\u{00}"), "a\tb\nc\rdef");
    }

    #[test]
    fn escape_keeps_valid_sequences() {
        let valid = r#"\" \\ \/ \b \f \n \r \t \u00e9"#;
        assert_eq!(escape_stray_backslashes(valid), valid);
        assert_eq!(escape_stray_backslashes(r"\\x"), r"\\x");
        assert_eq!(escape_stray_backslashes(r"a\x"), r"a\\x");
        assert_eq!(escape_stray_backslashes("end\\"), "end\\\\");
        assert_eq!(escape_stray_backslashes(r"\u12"), r"\\u12");
    }

    #[test]
    fn empty_input_yields_diagnostic() {
        let diag = parse_lenient("   ").unwrap_err();
        assert!(!diag.parse_error.is_empty());
        assert_eq!(diag.snippet, "");
    }

    #[test]
    fn unbalanced_braces_use_whole_text() {
        assert_eq!(extract_candidate("  } oops {  "), "} oops {");
        assert_eq!(extract_candidate("no braces"), "no braces");
        assert_eq!(extract_candidate(" x{\"a\":1}y "), "{\"a\":1}");
    }

    #[test]
    fn top_level_arrays_are_kept_whole() {
        let parsed = parse_lenient(" [{\"a\":1},{\"b\":2}] ").unwrap();
        assert!(!parsed.repaired);
        assert_eq!(parsed.value, json!([{"a": 1}, {"b": 2}]));

        let parsed = parse_lenient(r#"[{"p":"C:\x"},{"q":2}]"#).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value, json!([{"p": "C:\\x"}, {"q": 2}]));
    }

    #[test]
    fn diagnostic_snippet_is_bounded() {
        let body = format!("{{\"a\": {}", "é".repeat(5000));
        let diag = parse_lenient(&body).unwrap_err();
        assert_eq!(diag.snippet.chars().count(), DIAGNOSTIC_SNIPPET_CHARS);
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        assert_eq!(snippet("ação", 2), "aç");
        assert_eq!(snippet("abc", 10), "abc");
    }
}
