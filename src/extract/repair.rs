//! Repairing parser for LLM JSON output.
//!
//! Models wrap payloads in markdown fences, prepend prose, and truncate
//! mid-structure. The ladder here recovers a usable value from each of
//! those failure shapes before the caller falls back to regex scraping.

use serde_json::Value;

/// Strips optional markdown code fences from a response.
#[must_use]
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(after_open) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    after_open
        .trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(after_open)
        .trim()
}

/// Parses the first JSON object out of an LLM response.
///
/// Ladder:
/// 1. Strip code fences and locate the first `{`.
/// 2. Parse from there, tolerating trailing prose.
/// 3. On failure, repair a truncated payload and retry.
#[must_use]
pub fn parse_llm_json(response: &str) -> Option<Value> {
    let stripped = strip_code_fences(response);
    let start = stripped.find('{')?;
    let candidate = &stripped[start..];

    if let Some(value) = parse_leading_value(candidate) {
        return Some(value);
    }

    let repaired = repair_truncated_json(candidate);
    parse_leading_value(&repaired)
}

/// Parses a JSON value at the start of `input`, ignoring trailing text.
fn parse_leading_value(input: &str) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Value>();
    stream.next().and_then(std::result::Result::ok)
}

/// Repairs a truncated JSON payload.
///
/// One forward scan tracks string and escape state and the stack of open
/// containers; afterwards the open string is closed, a dangling `,` or `:`
/// (with its orphaned key) is trimmed, and the container stack is unwound
/// with balancing `]`/`}`.
#[must_use]
pub fn repair_truncated_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        out.push(c);
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
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            },
            _ => {},
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    trim_dangling_tail(&mut out, stack.last() == Some(&'}'));

    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

/// Removes a trailing `,` or `:`; a trimmed `:` inside an object leaves an
/// orphaned key string, which is removed along with its own leading comma.
fn trim_dangling_tail(out: &mut String, in_object: bool) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);

    let last = out.chars().last();
    if last == Some(',') {
        out.pop();
        return;
    }
    if last != Some(':') {
        return;
    }
    out.pop();

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if in_object && out.ends_with('"') {
        if let Some(key_start) = find_string_start(out) {
            out.truncate(key_start);
            let trimmed_len = out.trim_end().len();
            out.truncate(trimmed_len);
            if out.ends_with(',') {
                out.pop();
            }
        }
    }
}

/// Byte offset of the opening quote of a string that ends at `out`'s tail.
fn find_string_start(out: &str) -> Option<usize> {
    let bytes = out.as_bytes();
    if bytes.last() != Some(&b'"') {
        return None;
    }
    let mut i = bytes.len() - 1;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
            return Some(i);
        }
    }
    None
}
