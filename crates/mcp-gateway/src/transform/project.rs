// Output projection
//
// An output schema is ordinary JSON Schema with one extra keyword:
// `source_field`, a path expression evaluated against the value being
// projected. Compilation parses every path up front so a malformed registry
// fails at load time; the compiled plan is then applied per call.
//
// Projection rules:
// - object: each declared property takes its `source_field` match, or the
//   same-named property of the current scope; missing values are omitted
//   (never emitted as null). Recursion continues with the obtained value.
// - array: the matched sequence is projected element-by-element through the
//   `items` schema; a single matched value that is itself an array is
//   iterated. Non-array matches are omitted.
// - primitive: the obtained value passes through without type coercion.

use serde_json::{Map, Value};
use thiserror::Error;

use super::path::{PathExpr, PathParseError};

const SOURCE_FIELD: &str = "source_field";

/// Compiled projection plan for one output schema
#[derive(Debug, Clone)]
pub struct Projection {
	source: Option<PathExpr>,
	kind: ProjectionKind,
}

#[derive(Debug, Clone)]
enum ProjectionKind {
	Object(Vec<(String, Projection)>),
	Array(Option<Box<Projection>>),
	Leaf,
}

/// Compile failure for an output schema
#[derive(Error, Debug)]
pub enum ProjectionError {
	#[error("invalid source_field at {location}")]
	InvalidPath {
		location: String,
		#[source]
		source: PathParseError,
	},
}

impl Projection {
	/// Compile an output schema into a projection plan
	pub fn compile(schema: &Value) -> Result<Self, ProjectionError> {
		Self::compile_at(schema, "$")
	}

	fn compile_at(schema: &Value, location: &str) -> Result<Self, ProjectionError> {
		let Some(obj) = schema.as_object() else {
			return Ok(Self {
				source: None,
				kind: ProjectionKind::Leaf,
			});
		};

		let source = match obj.get(SOURCE_FIELD).and_then(Value::as_str) {
			Some(path) => Some(PathExpr::parse(path).map_err(|e| {
				ProjectionError::InvalidPath {
					location: format!("{location}.{SOURCE_FIELD}"),
					source: e,
				}
			})?),
			None => None,
		};

		let declared_type = obj.get("type").and_then(Value::as_str);
		let kind = match declared_type {
			Some("object") => Self::compile_object(obj, location)?,
			Some("array") => Self::compile_array(obj, location)?,
			Some(_) => ProjectionKind::Leaf,
			// No declared type: infer from structure
			None if obj.contains_key("properties") => Self::compile_object(obj, location)?,
			None if obj.contains_key("items") => Self::compile_array(obj, location)?,
			None => ProjectionKind::Leaf,
		};

		Ok(Self { source, kind })
	}

	fn compile_object(
		obj: &Map<String, Value>,
		location: &str,
	) -> Result<ProjectionKind, ProjectionError> {
		let mut properties = Vec::new();
		if let Some(props) = obj.get("properties").and_then(Value::as_object) {
			for (name, prop_schema) in props {
				let child =
					Self::compile_at(prop_schema, &format!("{location}.properties.{name}"))?;
				properties.push((name.clone(), child));
			}
		}
		Ok(ProjectionKind::Object(properties))
	}

	fn compile_array(
		obj: &Map<String, Value>,
		location: &str,
	) -> Result<ProjectionKind, ProjectionError> {
		let items = match obj.get("items") {
			Some(items_schema) => Some(Box::new(Self::compile_at(
				items_schema,
				&format!("{location}.items"),
			)?)),
			None => None,
		};
		Ok(ProjectionKind::Array(items))
	}

	/// Apply the plan to a source value.
	///
	/// Resolves this node's own `source_field` (if any) against `scope` and
	/// projects the obtained value. `None` means nothing matched.
	pub fn apply(&self, scope: &Value) -> Option<Value> {
		match &self.source {
			Some(path) => {
				let obtained = path.eval_value(scope)?;
				self.descend(&obtained)
			},
			None => self.descend(scope),
		}
	}

	fn descend(&self, value: &Value) -> Option<Value> {
		match &self.kind {
			ProjectionKind::Leaf => Some(value.clone()),
			ProjectionKind::Object(properties) => {
				let mut out = Map::new();
				for (name, child) in properties {
					let obtained = match &child.source {
						Some(path) => path.eval_value(value),
						None => value.get(name.as_str()).cloned(),
					};
					if let Some(obtained) = obtained {
						if let Some(projected) = child.descend(&obtained) {
							out.insert(name.clone(), projected);
						}
					}
				}
				Some(Value::Object(out))
			},
			ProjectionKind::Array(items) => {
				let elements = value.as_array()?;
				let projected = match items {
					Some(plan) => elements.iter().filter_map(|el| plan.apply(el)).collect(),
					None => elements.clone(),
				};
				Some(Value::Array(projected))
			},
		}
	}

	/// Whether the plan declares any object properties at the root.
	///
	/// Used to distinguish "projection produced nothing" from "nothing was
	/// asked for" when reporting empty projections.
	pub fn expects_output(&self) -> bool {
		match &self.kind {
			ProjectionKind::Object(properties) => !properties.is_empty(),
			ProjectionKind::Array(_) => true,
			ProjectionKind::Leaf => self.source.is_some(),
		}
	}
}

/// Deep-copy a schema with every `source_field` key removed.
///
/// The advertised output schema must be standards-compliant JSON Schema; the
/// projection annotations are internal.
pub fn strip_source_fields(schema: &Value) -> Value {
	match schema {
		Value::Object(obj) => Value::Object(
			obj.iter()
				.filter(|(k, _)| k.as_str() != SOURCE_FIELD)
				.map(|(k, v)| (k.clone(), strip_source_fields(v)))
				.collect(),
		),
		Value::Array(arr) => Value::Array(arr.iter().map(strip_source_fields).collect()),
		other => other.clone(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_simple_field_extraction() {
		let schema = json!({
			"type": "object",
			"properties": {
				"temp": {"type": "number", "source_field": "$.temperature"},
				"city": {"type": "string", "source_field": "$.location.city"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({
			"temperature": 72.5,
			"location": {"city": "Seattle", "state": "WA"}
		});
		let result = plan.apply(&source).unwrap();

		assert_eq!(result, json!({"temp": 72.5, "city": "Seattle"}));
	}

	#[test]
	fn test_wildcard_projects_names() {
		let schema = json!({
			"type": "object",
			"properties": {
				"names": {"type": "array", "source_field": "$.entities[*].name"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({
			"entities": [
				{"name": "A", "observations": [1]},
				{"name": "B", "observations": [2, 3]}
			]
		});
		let result = plan.apply(&source).unwrap();

		assert_eq!(result, json!({"names": ["A", "B"]}));
	}

	#[test]
	fn test_array_of_objects_with_nested_projection() {
		let schema = json!({
			"type": "object",
			"properties": {
				"repos": {
					"type": "array",
					"source_field": "$.results[*]",
					"items": {
						"type": "object",
						"properties": {
							"name": {"type": "string", "source_field": "$.full_name"},
							"stars": {"type": "integer", "source_field": "$.stargazers.count"}
						}
					}
				}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({
			"results": [
				{"full_name": "a/b", "stargazers": {"count": 10}, "noise": true},
				{"full_name": "c/d", "stargazers": {"count": 2}}
			]
		});
		let result = plan.apply(&source).unwrap();

		assert_eq!(
			result,
			json!({"repos": [
				{"name": "a/b", "stars": 10},
				{"name": "c/d", "stars": 2}
			]})
		);
	}

	#[test]
	fn test_single_match_that_is_array_is_iterated() {
		let schema = json!({
			"type": "object",
			"properties": {
				"tags": {
					"type": "array",
					"source_field": "$.meta.tags",
					"items": {"type": "string"}
				}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({"meta": {"tags": ["x", "y"]}});
		let result = plan.apply(&source).unwrap();
		assert_eq!(result, json!({"tags": ["x", "y"]}));
	}

	#[test]
	fn test_passthrough_without_source_field() {
		let schema = json!({
			"type": "object",
			"properties": {
				"status": {"type": "string"},
				"count": {"type": "integer"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({"status": "ok", "count": 3, "extra": "dropped"});
		let result = plan.apply(&source).unwrap();
		assert_eq!(result, json!({"status": "ok", "count": 3}));
	}

	#[test]
	fn test_missing_source_omits_property() {
		let schema = json!({
			"type": "object",
			"properties": {
				"present": {"type": "string", "source_field": "$.a"},
				"absent": {"type": "string", "source_field": "$.missing.path"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({"a": "here"});
		let result = plan.apply(&source).unwrap();

		assert_eq!(result, json!({"present": "here"}));
		assert!(result.get("absent").is_none());
	}

	#[test]
	fn test_no_type_coercion_on_mismatch() {
		let schema = json!({
			"type": "object",
			"properties": {
				"count": {"type": "integer", "source_field": "$.count"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		// Declared integer, actual string: passed through unchanged
		let source = json!({"count": "twelve"});
		let result = plan.apply(&source).unwrap();
		assert_eq!(result, json!({"count": "twelve"}));
	}

	#[test]
	fn test_nested_object_recursion() {
		let schema = json!({
			"type": "object",
			"properties": {
				"current": {
					"type": "object",
					"source_field": "$.data.current",
					"properties": {
						"temp": {"type": "number", "source_field": "$.temp_f"}
					}
				}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({"data": {"current": {"temp_f": 52.3, "wind": 10}}});
		let result = plan.apply(&source).unwrap();
		assert_eq!(result, json!({"current": {"temp": 52.3}}));
	}

	#[test]
	fn test_projection_is_idempotent_in_shape() {
		let schema = json!({
			"type": "object",
			"properties": {
				"names": {"type": "array", "source_field": "$.entities[*].name"}
			}
		});
		let plan = Projection::compile(&schema).unwrap();

		let source = json!({"entities": [{"name": "A"}, {"name": "B"}]});
		let once = plan.apply(&source).unwrap();
		let twice = plan.apply(&source).unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn test_compile_rejects_bad_path() {
		let schema = json!({
			"type": "object",
			"properties": {
				"x": {"type": "string", "source_field": "$..bad"}
			}
		});
		let err = Projection::compile(&schema).unwrap_err();
		let ProjectionError::InvalidPath { location, .. } = err;
		assert!(location.contains("properties.x"));
	}

	#[test]
	fn test_strip_source_fields_is_recursive() {
		let schema = json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string", "source_field": "$.inner"}
				}
			}
		});
		let stripped = strip_source_fields(&schema);

		assert_eq!(
			stripped,
			json!({
				"type": "object",
				"properties": {
					"names": {
						"type": "array",
						"items": {"type": "string"}
					}
				}
			})
		);
	}

	#[test]
	fn test_expects_output() {
		let with_props = Projection::compile(&json!({
			"type": "object",
			"properties": {"a": {"type": "string"}}
		}))
		.unwrap();
		assert!(with_props.expects_output());

		let empty = Projection::compile(&json!({"type": "object"})).unwrap();
		assert!(!empty.expects_output());
	}
}
