//! Best-effort recovery of JSON values from malformed model output.
//!
//! Models routinely wrap JSON in markdown fences, leave trailing commas,
//! use JavaScript object syntax, or stop mid-object when they hit their
//! token budget. [`parse_with_fix`] runs a fixed ladder of increasingly
//! aggressive repairs and stops at the first one that parses:
//!
//! 1. **Direct**: plain `serde_json` parse
//! 2. **Normalized**: strip fences/prose/comments, drop trailing commas,
//!    quote bare keys, convert single-quoted strings, normalize line endings
//! 3. **Balanced**: close an unterminated string, append missing closers,
//!    fill empty values with `null`
//! 4. **Partial**: regex-scan flat key/value pairs into an object
//!
//! Stage 4 always succeeds (possibly with an empty object), so the function
//! never fails for any input. Valid JSON never gets past stage 1.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)(?:```|$)").unwrap());

static STRING_PAIR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\]+)"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static NUMBER_PAIR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\\]+)"\s*:\s*(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)"#).unwrap()
});

static BOOL_PAIR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\]+)"\s*:\s*(true|false)\b"#).unwrap());

static ARRAY_PAIR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\]+)"\s*:\s*\[([^\[\]]*)\]"#).unwrap());

/// Which repair stage produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStage {
    Direct,
    Normalized,
    Balanced,
    Partial,
}

impl RepairStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Normalized => "normalized",
            Self::Balanced => "balanced",
            Self::Partial => "partial",
        }
    }
}

/// A recovered value plus the stage that recovered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub value: Value,
    pub stage: RepairStage,
}

/// Parse `text` as JSON, repairing it as needed. Never fails.
pub fn parse_with_fix(text: &str) -> Value {
    repair(text).value
}

/// Like [`parse_with_fix`] but also reports which stage succeeded.
pub fn repair(text: &str) -> Repaired {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Repaired {
            value,
            stage: RepairStage::Direct,
        };
    }

    let normalized = normalize(text);
    if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
        tracing::debug!(stage = "normalized", "Repaired structured output");
        return Repaired {
            value,
            stage: RepairStage::Normalized,
        };
    }

    let balanced = balance(&normalized);
    if let Ok(value) = serde_json::from_str::<Value>(&balanced) {
        tracing::debug!(stage = "balanced", "Repaired structured output");
        return Repaired {
            value,
            stage: RepairStage::Balanced,
        };
    }

    tracing::debug!(stage = "partial", "Falling back to partial extraction");
    Repaired {
        value: Value::Object(extract_pairs(&normalized)),
        stage: RepairStage::Partial,
    }
}

// ── Stage 2: normalization ────────────────────────────────────────────

fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let unfenced = match FENCE_REGEX.captures(&unified) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => unified,
    };
    let sliced = slice_structured(&unfenced);
    clean_tokens(sliced)
}

/// Drop prose around the outermost object or array.
///
/// Only applies when the leading prose has no double quotes; otherwise the
/// text is more likely a broken object whose opening brace went missing.
fn slice_structured(text: &str) -> &str {
    let Some(start) = text.find(['{', '[']) else {
        return text;
    };
    if text[..start].contains('"') {
        return text;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..start + i + ch.len_utf8()];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

/// Single string-aware pass: comments, single-quoted strings, bare keys,
/// trailing commas and `\'` escapes.
fn clean_tokens(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '"' => {
                i = copy_double_quoted(&chars, i, &mut out);
                last_significant = Some('"');
            }
            '\'' => {
                i = convert_single_quoted(&chars, i, &mut out);
                last_significant = Some('"');
            }
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(',');
                    last_significant = Some(',');
                }
                i += 1;
            }
            c if is_ident_start(c) && matches!(last_significant, Some('{') | Some(',')) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if chars.get(j) == Some(&':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                last_significant = Some('"');
            }
            _ => {
                out.push(c);
                if !c.is_whitespace() {
                    last_significant = Some(c);
                }
                i += 1;
            }
        }
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

/// Copy a double-quoted string starting at `start`; returns the index after it.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if chars.get(i + 1) == Some(&'\'') => {
                out.push('\'');
                i += 2;
            }
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.get(i + 1) {
                    out.push(*escaped);
                }
                i += 2;
            }
            '"' => {
                out.push('"');
                return i + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    chars.len()
}

/// Rewrite a single-quoted string as a double-quoted one.
fn convert_single_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if chars.get(i + 1) == Some(&'\'') => {
                out.push('\'');
                i += 2;
            }
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.get(i + 1) {
                    out.push(*escaped);
                }
                i += 2;
            }
            '"' => {
                out.push_str("\\\"");
                i += 1;
            }
            '\'' => {
                out.push('"');
                return i + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    chars.len()
}

// ── Stage 3: structural balancing ─────────────────────────────────────

fn balance(text: &str) -> String {
    let mut fixed = close_unterminated_string(text.trim_end());

    let scan = scan_structure(&fixed);

    loop {
        let trimmed_len = fixed.trim_end().len();
        fixed.truncate(trimmed_len);
        if fixed.ends_with(',') {
            fixed.pop();
        } else {
            break;
        }
    }
    if fixed.ends_with(':') {
        fixed.push_str(" null");
    } else if scan.ends_with_dangling_key {
        fixed.push_str(": null");
    }

    for opener in scan.open.iter().rev() {
        fixed.push(if *opener == '{' { '}' } else { ']' });
    }

    fill_missing_values(&fixed)
}

/// Insert `null` where a value is missing: after `:` before a closer or
/// comma, and between consecutive commas or a comma and `]`. String
/// contents are copied untouched.
fn fill_missing_values(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        let missing = match c {
            ',' | '}' => last_significant == Some(':'),
            ']' => matches!(last_significant, Some(':') | Some(',')),
            _ => false,
        } || (c == ',' && last_significant == Some(','));
        if missing {
            out.push_str("null");
        }
        if c == '"' {
            in_string = true;
        }
        out.push(c);
        if !c.is_whitespace() {
            last_significant = Some(c);
        }
    }
    out
}

/// If the text has an odd number of unescaped quotes, close the last
/// string at the next structural delimiter after it, or at the end.
fn close_unterminated_string(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut quote_positions = Vec::new();
    let mut escaped = false;
    for (i, c) in chars.iter().enumerate() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quote_positions.push(i),
            _ => {}
        }
    }
    if quote_positions.len() % 2 == 0 {
        return text.to_string();
    }

    let last_quote = quote_positions[quote_positions.len() - 1];
    let insert_at = chars[last_quote + 1..]
        .iter()
        .position(|c| matches!(c, ',' | '}' | ']'))
        .map(|offset| last_quote + 1 + offset)
        .unwrap_or(chars.len());

    // A trailing lone backslash would escape the closing quote.
    let mut result: String = chars[..insert_at].iter().collect();
    if result.ends_with('\\') && !result.ends_with("\\\\") {
        result.pop();
    }
    result.push('"');
    result.extend(chars[insert_at..].iter());
    result
}

struct StructureScan {
    /// Unclosed `{` / `[` in nesting order.
    open: Vec<char>,
    /// The last token is a string sitting in key position of an object.
    ends_with_dangling_key: bool,
}

fn scan_structure(text: &str) -> StructureScan {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;
    let mut string_is_key_candidate = false;
    let mut last_token_was_key_candidate = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => {
                    in_string = false;
                    last_token_was_key_candidate = string_is_key_candidate;
                    last_significant = Some('"');
                }
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                string_is_key_candidate = open.last() == Some(&'{')
                    && matches!(last_significant, Some('{') | Some(','));
            }
            '{' | '[' => open.push(c),
            '}' => {
                if open.last() == Some(&'{') {
                    open.pop();
                }
            }
            ']' => {
                if open.last() == Some(&'[') {
                    open.pop();
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last_significant = Some(c);
            if c != '"' {
                last_token_was_key_candidate = false;
            }
        }
    }

    StructureScan {
        open,
        ends_with_dangling_key: last_token_was_key_candidate,
    }
}

// ── Stage 4: partial extraction ───────────────────────────────────────

fn extract_pairs(text: &str) -> Map<String, Value> {
    let mut map = Map::new();

    for caps in STRING_PAIR_REGEX.captures_iter(text) {
        let raw = &caps[2];
        let value = serde_json::from_str::<String>(&format!("\"{}\"", raw))
            .unwrap_or_else(|_| raw.to_string());
        map.entry(caps[1].to_string())
            .or_insert(Value::String(value));
    }

    for caps in NUMBER_PAIR_REGEX.captures_iter(text) {
        if let Ok(number) = serde_json::from_str::<Value>(&caps[2]) {
            map.entry(caps[1].to_string()).or_insert(number);
        }
    }

    for caps in BOOL_PAIR_REGEX.captures_iter(text) {
        map.entry(caps[1].to_string())
            .or_insert(Value::Bool(&caps[2] == "true"));
    }

    for caps in ARRAY_PAIR_REGEX.captures_iter(text) {
        let inner = &caps[2];
        let value = serde_json::from_str::<Value>(&format!("[{}]", inner)).unwrap_or_else(|_| {
            Value::Array(
                inner
                    .split(',')
                    .map(|item| item.trim().trim_matches(['"', '\'']).to_string())
                    .filter(|item| !item.is_empty())
                    .map(Value::String)
                    .collect(),
            )
        });
        map.entry(caps[1].to_string()).or_insert(value);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_is_passed_through() {
        let text = r#"{"name": "Shop", "pages": ["Home", "Cart"], "nested": {"n": 1.5, "ok": true}}"#;
        let repaired = repair(text);
        assert_eq!(repaired.stage, RepairStage::Direct);
        assert_eq!(repaired.value, serde_json::from_str::<Value>(text).unwrap());
    }

    #[test]
    fn test_valid_scalars_and_arrays_are_passed_through() {
        for text in ["42", "\"hi\"", "[1, 2, 3]", "null", "true"] {
            assert_eq!(parse_with_fix(text), serde_json::from_str::<Value>(text).unwrap());
        }
    }

    #[test]
    fn test_never_panics_on_degenerate_input() {
        let inputs = [
            "",
            "{",
            "}",
            "[[[",
            "\"",
            "'",
            "\\",
            "{\"a\":",
            "/*",
            "```",
            "\u{0}\u{1}\u{7f}ÿþ{[\"\\",
            "💥{\"é\": 'ü",
            "{,,,}",
            ":::",
        ];
        for input in inputs {
            let _ = parse_with_fix(input);
        }
    }

    #[test]
    fn test_empty_input_yields_empty_object() {
        let repaired = repair("");
        assert_eq!(repaired.stage, RepairStage::Partial);
        assert_eq!(repaired.value, json!({}));
    }

    #[test]
    fn test_lone_open_brace_is_balanced() {
        assert_eq!(parse_with_fix("{"), json!({}));
    }

    #[test]
    fn test_trailing_comma_without_closer() {
        let repaired = repair(r#"{"a":1,"#);
        assert_eq!(repaired.value, json!({"a": 1}));
        assert_eq!(repaired.stage, RepairStage::Balanced);
    }

    #[test]
    fn test_trailing_commas_before_closers_are_removed() {
        let repaired = repair(r#"{"a": [1, 2,], "b": 3,}"#);
        assert_eq!(repaired.stage, RepairStage::Normalized);
        assert_eq!(repaired.value, json!({"a": [1, 2], "b": 3}));
    }

    #[test]
    fn test_comments_are_stripped_but_urls_survive() {
        let text = "{\n  // the site name\n  \"name\": \"Shop\", /* inline */\n  \"url\": \"https://example.com\"\n}";
        let value = parse_with_fix(text);
        assert_eq!(value, json!({"name": "Shop", "url": "https://example.com"}));
    }

    #[test]
    fn test_javascript_object_syntax() {
        let text = "{name: 'Shoe Shop', tagline: 'It\\'s great', count: 2, tags: ['a', 'b']}";
        let repaired = repair(text);
        assert_eq!(repaired.stage, RepairStage::Normalized);
        assert_eq!(
            repaired.value,
            json!({"name": "Shoe Shop", "tagline": "It's great", "count": 2, "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_single_quoted_value_with_double_quote_inside() {
        let value = parse_with_fix(r#"{'quote': 'say "hi"'}"#);
        assert_eq!(value, json!({"quote": "say \"hi\""}));
    }

    #[test]
    fn test_markdown_fence_and_prose_are_stripped() {
        let text = "Here is your blueprint:\n```json\n{\"pages\": [\"Home\"]}\n```\nLet me know!";
        let repaired = repair(text);
        assert_eq!(repaired.stage, RepairStage::Normalized);
        assert_eq!(repaired.value, json!({"pages": ["Home"]}));
    }

    #[test]
    fn test_leading_prose_without_fence() {
        let value = parse_with_fix("Sure! {\"score\": 80} Hope that helps.");
        assert_eq!(value, json!({"score": 80}));
    }

    #[test]
    fn test_crlf_line_endings() {
        let value = parse_with_fix("{\r\n  a: 1,\r\n}");
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_truncated_nested_structure() {
        let value = parse_with_fix(r#"{"components": ["Header", "Footer"], "features": {"cart": true"#);
        assert_eq!(
            value,
            json!({"components": ["Header", "Footer"], "features": {"cart": true}})
        );
    }

    #[test]
    fn test_unterminated_string_is_closed() {
        let repaired = repair(r#"{"name": "Shoe Sh"#);
        assert_eq!(repaired.stage, RepairStage::Balanced);
        assert_eq!(repaired.value, json!({"name": "Shoe Sh"}));
    }

    #[test]
    fn test_unterminated_string_closed_at_next_delimiter() {
        let repaired = repair(r#"{"a": 1, "b": "hello}"#);
        assert_eq!(repaired.stage, RepairStage::Balanced);
        assert_eq!(repaired.value, json!({"a": 1, "b": "hello"}));
    }

    #[test]
    fn test_missing_value_becomes_null() {
        assert_eq!(parse_with_fix(r#"{"a": 1, "b":"#), json!({"a": 1, "b": null}));
        assert_eq!(parse_with_fix(r#"{"a": , "b": 2}"#), json!({"a": null, "b": 2}));
    }

    #[test]
    fn test_missing_values_are_filled_outside_strings_only() {
        let repaired = repair(r#"{"ratio": "3:,5", "csv": "a,,b", "list": [1,,2], "n": 1"#);
        assert_eq!(repaired.stage, RepairStage::Balanced);
        assert_eq!(
            repaired.value,
            json!({"ratio": "3:,5", "csv": "a,,b", "list": [1, null, 2], "n": 1})
        );
    }

    #[test]
    fn test_escaped_quote_does_not_end_string_when_filling() {
        let value = parse_with_fix(r#"{"say": "\"x:,\"", "b": "#);
        assert_eq!(value, json!({"say": "\"x:,\"", "b": null}));
    }

    #[test]
    fn test_dangling_key_becomes_null() {
        assert_eq!(parse_with_fix(r#"{"a": 1, "b""#), json!({"a": 1, "b": null}));
    }

    #[test]
    fn test_partial_extraction_collects_flat_pairs() {
        let text = r#"status >> "name": "Widget" "price": 9.5 "active": true "tags": ["a", "b"] <<"#;
        let repaired = repair(text);
        assert_eq!(repaired.stage, RepairStage::Partial);
        assert_eq!(repaired.value["name"], json!("Widget"));
        assert_eq!(repaired.value["price"], json!(9.5));
        assert_eq!(repaired.value["active"], json!(true));
        assert_eq!(repaired.value["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_partial_extraction_first_occurrence_wins() {
        let text = r#"oops "name": "first" ... "name": "second" ))"#;
        assert_eq!(parse_with_fix(text)["name"], json!("first"));
    }

    #[test]
    fn test_stage_ordering() {
        assert!(RepairStage::Direct < RepairStage::Normalized);
        assert!(RepairStage::Balanced < RepairStage::Partial);
    }
}
