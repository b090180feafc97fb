// Path expressions for output projection
//
// A strict subset of JSONPath, just enough to project MCP tool outputs:
// - `$`          root
// - `.name`      object property access
// - `['name']`   property access for names with special characters
// - `[0]`        array index
// - `[*]`        array wildcard (multi-valued)
// - chains of the above, e.g. `$.entities[*].name`
//
// Anything outside this subset (filters, slices, recursive descent, unions)
// is rejected at parse time so a bad registry fails at load, not mid-call.

use serde_json::Value;
use thiserror::Error;

/// One step of a parsed path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
	/// Object property access
	Key(String),
	/// Array index (non-negative)
	Index(usize),
	/// Array wildcard
	Wildcard,
}

/// A compiled path expression
#[derive(Debug, Clone)]
pub struct PathExpr {
	raw: String,
	segments: Vec<Segment>,
	multi: bool,
}

/// Parse failure for a path expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path expression '{path}' at offset {offset}: {message}")]
pub struct PathParseError {
	pub path: String,
	pub offset: usize,
	pub message: String,
}

impl PathExpr {
	/// Parse a path expression, rejecting unsupported constructs
	pub fn parse(input: &str) -> Result<Self, PathParseError> {
		let err = |offset: usize, message: &str| PathParseError {
			path: input.to_string(),
			offset,
			message: message.to_string(),
		};

		let bytes = input.as_bytes();
		if bytes.first() != Some(&b'$') {
			return Err(err(0, "expected '$' root"));
		}

		let mut segments = Vec::new();
		let mut multi = false;
		let mut pos = 1;

		while pos < bytes.len() {
			match bytes[pos] {
				b'.' => {
					if bytes.get(pos + 1) == Some(&b'.') {
						return Err(err(pos, "recursive descent '..' is not supported"));
					}
					pos += 1;
					let start = pos;
					while pos < bytes.len() && is_name_byte(bytes[pos]) {
						pos += 1;
					}
					if pos == start {
						return Err(err(start, "expected property name after '.'"));
					}
					segments.push(Segment::Key(input[start..pos].to_string()));
				},
				b'[' => {
					pos += 1;
					match bytes.get(pos) {
						Some(b'*') => {
							pos += 1;
							if bytes.get(pos) != Some(&b']') {
								return Err(err(pos, "expected ']' after '*'"));
							}
							pos += 1;
							segments.push(Segment::Wildcard);
							multi = true;
						},
						Some(b'0'..=b'9') => {
							let start = pos;
							while matches!(bytes.get(pos), Some(b'0'..=b'9')) {
								pos += 1;
							}
							if bytes.get(pos) != Some(&b']') {
								return Err(err(pos, "expected ']' after array index"));
							}
							let index = input[start..pos]
								.parse::<usize>()
								.map_err(|_| err(start, "array index out of range"))?;
							pos += 1;
							segments.push(Segment::Index(index));
						},
						Some(q @ (b'\'' | b'"')) => {
							let quote = *q;
							pos += 1;
							let start = pos;
							while pos < bytes.len() && bytes[pos] != quote {
								pos += 1;
							}
							if pos >= bytes.len() {
								return Err(err(start, "unterminated quoted name"));
							}
							let name = input[start..pos].to_string();
							pos += 1;
							if bytes.get(pos) != Some(&b']') {
								return Err(err(pos, "expected ']' after quoted name"));
							}
							pos += 1;
							segments.push(Segment::Key(name));
						},
						_ => {
							return Err(err(
								pos,
								"expected '*', index, or quoted name inside brackets",
							));
						},
					}
				},
				_ => return Err(err(pos, "expected '.' or '[' segment")),
			}
		}

		Ok(Self {
			raw: input.to_string(),
			segments,
			multi,
		})
	}

	/// The original expression text
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Whether the expression contains a wildcard and is therefore
	/// multi-valued
	pub fn is_multi(&self) -> bool {
		self.multi
	}

	/// Evaluate against a JSON value, returning every matched node.
	///
	/// Missing keys and out-of-range indices yield no matches rather than
	/// an error; a wildcard over a non-array yields no matches.
	pub fn eval<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
		let mut nodes = vec![root];

		for segment in &self.segments {
			nodes = match segment {
				Segment::Key(key) => nodes.iter().filter_map(|v| v.get(key.as_str())).collect(),
				Segment::Index(i) => nodes.iter().filter_map(|v| v.get(*i)).collect(),
				Segment::Wildcard => nodes
					.iter()
					.filter_map(|v| v.as_array())
					.flat_map(|a| a.iter())
					.collect(),
			};
			if nodes.is_empty() {
				break;
			}
		}

		nodes
	}

	/// Evaluate to a single owned value.
	///
	/// Wildcard expressions collect their matches into an array; single-valued
	/// expressions return the matched node. `None` when nothing matched.
	pub fn eval_value(&self, root: &Value) -> Option<Value> {
		let nodes = self.eval(root);
		if nodes.is_empty() {
			None
		} else if self.multi {
			Some(Value::Array(nodes.into_iter().cloned().collect()))
		} else {
			Some(nodes[0].clone())
		}
	}
}

impl std::fmt::Display for PathExpr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.raw)
	}
}

fn is_name_byte(b: u8) -> bool {
	b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_root_only() {
		let expr = PathExpr::parse("$").unwrap();
		assert!(expr.segments.is_empty());
		assert!(!expr.is_multi());
	}

	#[test]
	fn test_parse_dotted_chain() {
		let expr = PathExpr::parse("$.foo.bar.baz").unwrap();
		assert_eq!(
			expr.segments,
			vec![
				Segment::Key("foo".into()),
				Segment::Key("bar".into()),
				Segment::Key("baz".into()),
			]
		);
	}

	#[test]
	fn test_parse_index_and_wildcard() {
		let expr = PathExpr::parse("$.items[0].tags[*]").unwrap();
		assert_eq!(
			expr.segments,
			vec![
				Segment::Key("items".into()),
				Segment::Index(0),
				Segment::Key("tags".into()),
				Segment::Wildcard,
			]
		);
		assert!(expr.is_multi());
	}

	#[test]
	fn test_parse_quoted_name() {
		let expr = PathExpr::parse("$['weird name']['a.b']").unwrap();
		assert_eq!(
			expr.segments,
			vec![
				Segment::Key("weird name".into()),
				Segment::Key("a.b".into()),
			]
		);
	}

	#[test]
	fn test_parse_rejects_missing_root() {
		assert!(PathExpr::parse("foo.bar").is_err());
		assert!(PathExpr::parse("").is_err());
	}

	#[test]
	fn test_parse_rejects_recursive_descent() {
		let err = PathExpr::parse("$..name").unwrap_err();
		assert!(err.message.contains("recursive descent"));
	}

	#[test]
	fn test_parse_rejects_filters_and_slices() {
		assert!(PathExpr::parse("$.items[?(@.id > 1)]").is_err());
		assert!(PathExpr::parse("$.items[0:2]").is_err());
		assert!(PathExpr::parse("$.items[-1]").is_err());
	}

	#[test]
	fn test_parse_rejects_trailing_garbage() {
		assert!(PathExpr::parse("$.foo bar").is_err());
		assert!(PathExpr::parse("$.foo[").is_err());
		assert!(PathExpr::parse("$.foo['unterminated").is_err());
	}

	#[test]
	fn test_eval_nested_object() {
		let data = json!({"data": {"current": {"temp_f": 52.3}}});
		let expr = PathExpr::parse("$.data.current.temp_f").unwrap();
		assert_eq!(expr.eval_value(&data), Some(json!(52.3)));
	}

	#[test]
	fn test_eval_array_index() {
		let data = json!({"items": ["a", "b", "c"]});
		let expr = PathExpr::parse("$.items[1]").unwrap();
		assert_eq!(expr.eval_value(&data), Some(json!("b")));
	}

	#[test]
	fn test_eval_wildcard_projects_sequence() {
		let data = json!({
			"entities": [
				{"name": "A", "observations": [1, 2]},
				{"name": "B", "observations": [3]}
			]
		});
		let expr = PathExpr::parse("$.entities[*].name").unwrap();
		assert_eq!(expr.eval_value(&data), Some(json!(["A", "B"])));
	}

	#[test]
	fn test_eval_missing_key_is_empty() {
		let data = json!({"a": 1});
		let expr = PathExpr::parse("$.b.c").unwrap();
		assert!(expr.eval(&data).is_empty());
		assert_eq!(expr.eval_value(&data), None);
	}

	#[test]
	fn test_eval_index_out_of_range_is_empty() {
		let data = json!({"items": [1]});
		let expr = PathExpr::parse("$.items[5]").unwrap();
		assert!(expr.eval(&data).is_empty());
	}

	#[test]
	fn test_eval_wildcard_on_non_array_is_empty() {
		let data = json!({"items": {"not": "an array"}});
		let expr = PathExpr::parse("$.items[*]").unwrap();
		assert!(expr.eval(&data).is_empty());
		assert_eq!(expr.eval_value(&data), None);
	}

	#[test]
	fn test_eval_wildcard_empty_when_missing() {
		let data = json!({});
		let expr = PathExpr::parse("$.entities[*].name").unwrap();
		assert_eq!(expr.eval_value(&data), None);
	}

	#[test]
	fn test_eval_root_returns_whole_value() {
		let data = json!({"a": [1, 2]});
		let expr = PathExpr::parse("$").unwrap();
		assert_eq!(expr.eval_value(&data), Some(data.clone()));
	}
}
