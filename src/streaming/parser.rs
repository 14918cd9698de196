//! Optimistic decoding of JSON argument buffers that are still streaming.
//!
//! Tool arguments arrive as JSON emitted token-by-token by a model. Callers
//! need the best current guess long before the document is syntactically
//! closed, so `parse` never fails on malformed input: it degrades from a
//! strict decode, to a decode of a repaired copy of the buffer, to raw regex
//! extraction of whatever fields are recognizable.

use crate::streaming::fields::ExtractedFields;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Outcome of one optimistic parse of an argument buffer.
///
/// `is_complete` is true only when the buffer itself is valid, complete JSON.
/// A document that decoded only after repair still reports `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// The most complete decode available, if any decode succeeded.
    pub document: Option<Value>,
    /// Whether the raw buffer was already valid JSON.
    pub is_complete: bool,
    /// Best-effort values for every field reachable so far.
    pub fields: ExtractedFields,
}

/// Parse an accumulating argument buffer, extracting whatever is decodable.
///
/// Pure and stateless: each call stands alone, so it can be re-run on every
/// appended fragment. The field map is rebuilt from scratch per call rather
/// than patched incrementally, which keeps backtracked or rewritten values
/// from going stale.
pub fn parse(buffer: &str) -> ParseResult {
    if buffer.trim().is_empty() {
        return ParseResult {
            document: None,
            is_complete: false,
            fields: ExtractedFields::new(),
        };
    }

    if let Ok(document) = serde_json::from_str::<Value>(buffer) {
        let fields = ExtractedFields::flatten(&document);
        return ParseResult {
            document: Some(document),
            is_complete: true,
            fields,
        };
    }

    let repaired = repair(buffer);
    if let Ok(document) = serde_json::from_str::<Value>(&repaired) {
        let fields = ExtractedFields::flatten(&document);
        return ParseResult {
            document: Some(document),
            is_complete: false,
            fields,
        };
    }

    let fields = extract_raw_fields(buffer);
    tracing::debug!(
        recovered = fields.len(),
        "buffer resisted repair; fields recovered by raw extraction only"
    );
    ParseResult {
        document: None,
        is_complete: false,
        fields,
    }
}

/// Close an in-flight buffer into something `serde_json` can decode.
///
/// One scan tracks in-string state (respecting escapes), the stack of open
/// brackets, and the last meaningful character outside a string. Repairs are
/// appended in a fixed order: finish a dangling string (completing a pending
/// escape as `\n` first), finish a partial `true`/`false`/`null` keyword,
/// supply `null` for a value missing after `:`, then close every open
/// bracket in LIFO order.
fn repair(buffer: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;
    let mut last_meaningful: Option<char> = None;

    for c in buffer.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => {
                in_string = !in_string;
                last_meaningful = Some('"');
            }
            _ if in_string => {}
            '{' | '[' => {
                stack.push(c);
                last_meaningful = Some(c);
            }
            '}' => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                }
                last_meaningful = Some(c);
            }
            ']' => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                }
                last_meaningful = Some(c);
            }
            c if !c.is_whitespace() => last_meaningful = Some(c),
            _ => {}
        }
    }

    let mut repaired = buffer.to_string();

    if in_string {
        if escape_next {
            repaired.push('n');
        }
        repaired.push('"');
        last_meaningful = Some('"');
    } else if let Some(suffix) = keyword_completion(&repaired) {
        repaired.push_str(suffix);
        last_meaningful = repaired.chars().next_back();
    }

    if last_meaningful == Some(':') {
        repaired.push_str("null");
    }

    while let Some(open) = stack.pop() {
        repaired.push(if open == '{' { '}' } else { ']' });
    }

    repaired
}

/// If the buffer ends in an unfinished `true`/`false`/`null`, the missing
/// suffix; otherwise `None`.
fn keyword_completion(buffer: &str) -> Option<&'static str> {
    let tail_len = buffer
        .chars()
        .rev()
        .take_while(char::is_ascii_alphabetic)
        .count();
    if tail_len == 0 {
        return None;
    }
    let tail = &buffer[buffer.len() - tail_len..];
    for keyword in ["true", "false", "null"] {
        if keyword.starts_with(tail) && tail.len() < keyword.len() {
            return Some(&keyword[tail.len()..]);
        }
    }
    None
}

static STRING_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)+)"\s*:\s*"((?:[^"\\]|\\.)*)"?"#).expect("valid regex")
});
static NUMBER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)+)"\s*:\s*(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s*(?:[,}\]]|$)"#)
        .expect("valid regex")
});
static BOOL_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)+)"\s*:\s*(true|tru|tr|t|false|fals|fal|fa|f)\s*(?:[,}\]]|$)"#)
        .expect("valid regex")
});
static NULL_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)+)"\s*:\s*(null|nul|nu|n)\s*(?:[,}\]]|$)"#).expect("valid regex")
});

/// Last-resort extraction for buffers that no repair could close.
///
/// Each pattern scans the raw text independently: string fields tolerate a
/// missing closing quote, and boolean/null fields are recognized from any
/// keyword prefix. Keys come out flat (no nesting information survives at
/// this level). A digit run at the buffer tail may still be growing, so a
/// number extracted here can be a prefix of the value the model intended;
/// the repair path handles the common cases before this one runs.
fn extract_raw_fields(buffer: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::new();

    for captures in STRING_FIELD.captures_iter(buffer) {
        let key = unescape_fragment(&captures[1]);
        let value = unescape_fragment(&captures[2]);
        fields.insert(key, Value::String(value));
    }

    for captures in NUMBER_FIELD.captures_iter(buffer) {
        if let Ok(number) = serde_json::from_str::<Value>(&captures[2]) {
            fields.insert(unescape_fragment(&captures[1]), number);
        }
    }

    for captures in BOOL_FIELD.captures_iter(buffer) {
        let value = captures[2].starts_with('t');
        fields.insert(unescape_fragment(&captures[1]), Value::Bool(value));
    }

    for captures in NULL_FIELD.captures_iter(buffer) {
        fields.insert(unescape_fragment(&captures[1]), Value::Null);
    }

    fields
}

/// Decode JSON string escapes in a raw captured fragment.
///
/// A fragment cut off mid-escape keeps its dangling backslash out of the
/// result; if decoding still fails the fragment is returned as captured.
fn unescape_fragment(raw: &str) -> String {
    if let Ok(text) = serde_json::from_str::<String>(&format!("\"{raw}\"")) {
        return text;
    }
    let trimmed = raw.strip_suffix('\\').unwrap_or(raw);
    serde_json::from_str::<String>(&format!("\"{trimmed}\""))
        .unwrap_or_else(|_| raw.to_string())
}
