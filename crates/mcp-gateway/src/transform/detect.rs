// JSON-in-text detection
//
// Many upstream tools return structured data serialized into a plain text
// content block, often wrapped in prose ("Result: {...}") or followed by
// trailing notes. This module recognizes those shapes and recovers the
// embedded JSON document. It is not a general fragment-recovery parser:
// partial or invalid JSON yields `None`.

use serde_json::Value;

/// Detect and parse a JSON object or array embedded in a text blob.
///
/// Strategies, first success wins:
/// 1. The trimmed text parses as JSON and the result is an object or array.
/// 2. A balanced-bracket extraction starting at each `{` or `[` (string
///    literals and escapes shield interior brackets) parses as JSON.
///
/// Never panics, regardless of input.
pub fn detect_json_in_text(text: &str) -> Option<Value> {
	let trimmed = text.trim();
	if trimmed.is_empty() {
		return None;
	}

	if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
		if value.is_object() || value.is_array() {
			return Some(value);
		}
	}

	for (start, c) in trimmed.char_indices() {
		if c != '{' && c != '[' {
			continue;
		}
		let candidate = &trimmed[start..];
		if let Some(extracted) = extract_balanced(candidate) {
			if let Ok(value) = serde_json::from_str::<Value>(extracted) {
				if value.is_object() || value.is_array() {
					return Some(value);
				}
			}
		}
	}

	None
}

/// Extract a balanced `{...}` or `[...]` prefix of `text`.
///
/// Tracks string literals and escape sequences so braces inside strings do
/// not count toward nesting depth. Returns the prefix up to and including
/// the matching close bracket, or `None` if the text never balances.
fn extract_balanced(text: &str) -> Option<&str> {
	let mut chars = text.char_indices();
	let (_, open) = chars.next()?;
	let close = match open {
		'{' => '}',
		'[' => ']',
		_ => return None,
	};

	let mut depth = 1usize;
	let mut in_string = false;
	let mut escape_next = false;

	for (i, c) in chars {
		if escape_next {
			escape_next = false;
			continue;
		}
		if in_string {
			match c {
				'\\' => escape_next = true,
				'"' => in_string = false,
				_ => {},
			}
			continue;
		}
		match c {
			'"' => in_string = true,
			c if c == open => depth += 1,
			c if c == close => {
				depth -= 1;
				if depth == 0 {
					return Some(&text[..i + c.len_utf8()]);
				}
			},
			_ => {},
		}
	}

	None
}
