//! JSON recovery cascade for unreliable model output.
//!
//! Turns a raw model string into a parsed JSON object through increasingly
//! aggressive strategies: direct parse, fence stripping, first-object
//! extraction, syntactic repair, largest-valid-prefix recovery for truncated
//! output, and per-field salvage as the last resort.
//!
//! Every stage is a pure `&str -> Option<_>` function; the cascade composes
//! them first-success-wins. Failure is `None`, never an error. Object
//! boundaries are found with a string-aware bracket scanner rather than a
//! greedy regex, so literal braces inside string values do not confuse it.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub type JsonObject = Map<String, Value>;

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",\s*([}\]])").expect("trailing comma pattern")
});

/// Heuristic truncation check: the model started a JSON object but never
/// closed it.
pub fn looks_truncated(s: &str) -> bool {
    let t = strip_code_fences(s);
    t.starts_with('{') && !t.ends_with('}')
}

/// Remove a single leading/trailing fence marker (with an optional language
/// tag on the opening line) if present.
pub fn strip_code_fences(s: &str) -> &str {
    let mut t = s.trim();
    if let Some(rest) = t.strip_prefix("```") {
        t = match rest.find('\n') {
            Some(i) if is_fence_tag(&rest[..i]) => &rest[i + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

fn is_fence_tag(line: &str) -> bool {
    line.trim_end()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Stages 1-4 of the cascade: fence strip, direct parse, first-object
/// extraction, syntactic repair.
pub fn extract_json(raw: &str) -> Option<JsonObject> {
    let stripped = strip_code_fences(raw);
    let stages: [fn(&str) -> Option<JsonObject>; 3] =
        [parse_direct, parse_first_object, parse_repaired];
    stages.iter().find_map(|stage| stage(stripped))
}

/// Strict parse; only a top-level object counts.
fn parse_direct(s: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// When junk precedes the object, parse the first balanced `{...}` span.
fn parse_first_object(s: &str) -> Option<JsonObject> {
    if s.starts_with('{') {
        // direct parse already had its chance
        return None;
    }
    let (start, end) = first_object_span(s)?;
    parse_direct(&s[start..end])
}

fn parse_repaired(s: &str) -> Option<JsonObject> {
    parse_direct(&repair(s))
}

/// Best-effort cleanup for the common failure shapes in model JSON:
/// leading/trailing junk, trailing commas, smart quotes.
pub fn repair(s: &str) -> String {
    let mut t = strip_code_fences(s).to_string();
    if !t.starts_with('{') {
        if let Some((start, end)) = first_object_span(&t) {
            t = t[start..end].to_string();
        }
    }
    let t = TRAILING_COMMA.replace_all(&t, "$1");
    normalize_quotes(&t)
}

fn normalize_quotes(s: &str) -> String {
    s.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{2019}', "'")
}

/// Stage 5: recover the largest parseable leading object from truncated
/// output. Scans backward over every `}` and attempts repair + parse of the
/// prefix ending there, closing any brackets the truncation left open.
pub fn largest_valid_prefix(raw: &str) -> Option<JsonObject> {
    let mut t = strip_code_fences(raw).to_string();
    if !t.starts_with('{') {
        let (start, end) = first_object_span(&t)?;
        t = t[start..end].to_string();
    }

    // Fast path
    if let Some(obj) = parse_direct(&t) {
        return Some(obj);
    }

    let closers: Vec<usize> = t.rmatch_indices('}').map(|(i, _)| i).collect();
    for i in closers {
        let candidate = repair(&t[..=i]);
        if let Some(obj) = parse_direct(&candidate) {
            return Some(obj);
        }
        if let Some(closed) = close_open_brackets(&candidate) {
            if let Some(obj) = parse_direct(&closed) {
                return Some(obj);
            }
        }
    }

    None
}

/// Stage 6, the terminal path: per-field salvage. Locates each composite
/// field by its quoted key, takes the balanced JSON fragment that follows,
/// repairs it locally, and parses it independently. A truncated response can
/// still yield partial structured data this way instead of total failure.
///
/// Always returns an object; fields that cannot be salvaged are simply
/// absent and later defaulted by reconciliation.
pub fn salvage_fields(raw: &str) -> JsonObject {
    const OBJECT_FIELDS: [&str; 3] = ["autofilled_fields", "citations", "explanations"];
    const ARRAY_FIELDS: [&str; 2] = ["missing_fields", "risk_flags"];

    let text = strip_code_fences(raw);
    let mut out = JsonObject::new();

    for field in OBJECT_FIELDS {
        if let Some(value) = salvage_one(text, field, '{') {
            out.insert(field.to_string(), value);
        }
    }
    for field in ARRAY_FIELDS {
        if let Some(value) = salvage_one(text, field, '[') {
            out.insert(field.to_string(), value);
        }
    }

    out
}

/// Extract one field's value fragment keyed on the literal field name.
fn salvage_one(text: &str, field: &str, open: char) -> Option<Value> {
    let key = Regex::new(&format!(r#""{}"\s*:\s*"#, field)).ok()?;
    let m = key.find(text)?;
    let rest = &text[m.end()..];
    if !rest.starts_with(open) {
        return None;
    }

    let (_, end) = balanced_span(rest, 0);
    let fragment = normalize_quotes(&TRAILING_COMMA.replace_all(&rest[..end], "$1"));

    let parsed = serde_json::from_str::<Value>(&fragment).ok().or_else(|| {
        // truncated fragment: close what the cutoff left open, then the
        // last element's comma may now dangle before the new closer
        let closed = close_open_brackets(&fragment)?;
        let closed = TRAILING_COMMA.replace_all(&closed, "$1");
        serde_json::from_str::<Value>(&closed).ok()
    })?;

    let kind_matches = match open {
        '{' => parsed.is_object(),
        _ => parsed.is_array(),
    };
    kind_matches.then_some(parsed)
}

// ============================================================================
// Bracket scanning
// ============================================================================

/// Byte span of the first balanced `{...}` object in `s`. An unterminated
/// object yields a span running to the end of the text so prefix recovery
/// can still work on it.
fn first_object_span(s: &str) -> Option<(usize, usize)> {
    let start = s.find('{')?;
    Some(balanced_span(s, start))
}

/// Span of the balanced bracket run starting at `open` (which must index a
/// `{` or `[`). Tracks string literals and escapes so braces inside strings
/// are ignored. Runs to the end of the text if the run never closes.
fn balanced_span(s: &str, open: usize) -> (usize, usize) {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (open, open + i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    (open, s.len())
}

/// Close any brackets left open by truncation. Gives up when the text ends
/// inside a string literal or the bracket kinds are mismatched.
fn close_open_brackets(s: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if in_string {
        return None;
    }

    let mut out = s.to_string();
    while let Some(c) = stack.pop() {
        out.push(c);
    }
    Some(out)
}
