// Call-path transformation engine
//
// Two operations per call. On the request side, injected defaults are
// merged under the client's arguments (locked-field collisions follow the
// configured policy) and string arguments are coerced toward the schema's
// declared numeric types. On the response side, structured content is
// projected through the tool's plan, or recovered from a text content
// block first; the original content blocks always survive untouched.

use rmcp::model::CallToolResult;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::registry::ResolvedVirtualTool;
use crate::settings::DefaultMergePolicy;

use super::detect::detect_json_in_text;
use super::project::Projection;

/// Merge injected defaults into client arguments.
///
/// Client values win on collision, except for hidden-and-defaulted
/// ("locked") fields, where the policy decides. Also coerces string values
/// toward `integer`/`number` parameter types declared by the effective
/// schema.
pub fn prepare_arguments(
	tool: &ResolvedVirtualTool,
	arguments: Option<Map<String, Value>>,
	policy: DefaultMergePolicy,
) -> Result<Map<String, Value>, GatewayError> {
	let mut merged = arguments.unwrap_or_default();

	for (key, value) in &tool.effective_defaults {
		if !merged.contains_key(key) {
			merged.insert(key.clone(), value.clone());
			continue;
		}
		if !tool.hidden_fields.contains(key) {
			continue;
		}
		match policy {
			DefaultMergePolicy::Override => {
				debug!(
					target: "virtual_tools",
					tool = %tool.exposed_name,
					field = %key,
					"overriding client value for locked argument"
				);
				merged.insert(key.clone(), value.clone());
			},
			DefaultMergePolicy::ClientWins => {},
			DefaultMergePolicy::Reject => {
				return Err(GatewayError::InvalidArguments(format!(
					"argument '{key}' is locked by tool '{}'",
					tool.exposed_name
				)));
			},
		}
	}

	coerce_arguments(tool, &mut merged);
	Ok(merged)
}

/// Parse string arguments into the numeric types the schema declares.
///
/// Agents routinely send `"7"` for an integer parameter; unparseable
/// strings pass through untouched.
fn coerce_arguments(tool: &ResolvedVirtualTool, arguments: &mut Map<String, Value>) {
	let Some(properties) = tool
		.effective_input_schema
		.as_ref()
		.and_then(|s| s.get("properties"))
		.and_then(Value::as_object)
	else {
		return;
	};

	for (key, value) in arguments.iter_mut() {
		let Value::String(text) = &*value else {
			continue;
		};
		let declared = properties
			.get(key)
			.and_then(|p| p.get("type"))
			.and_then(Value::as_str);
		match declared {
			Some("integer") => {
				if let Ok(parsed) = text.parse::<i64>() {
					*value = Value::Number(parsed.into());
				}
			},
			Some("number") => {
				if let Some(parsed) = text.parse::<f64>().ok().and_then(Number::from_f64) {
					*value = Value::Number(parsed);
				}
			},
			_ => {},
		}
	}
}

/// Transform an upstream tool result for the client.
///
/// 1. Existing `structuredContent` is projected through the tool's plan.
/// 2. Otherwise, when detection is enabled and the first content block is
///    text, embedded JSON is promoted to `structuredContent` (projected if
///    a plan exists).
/// 3. Otherwise the result passes through unchanged.
pub fn transform_response(
	tool: &ResolvedVirtualTool,
	result: CallToolResult,
	detect_json: bool,
) -> CallToolResult {
	if let Some(structured) = &result.structured_content {
		let Some(plan) = &tool.output_projection else {
			return result;
		};
		let projected = apply_projection(tool, plan, structured);
		return CallToolResult {
			structured_content: Some(projected),
			..result
		};
	}

	if detect_json {
		if let Some(text) = first_text_block(&result) {
			if let Some(detected) = detect_json_in_text(text) {
				debug!(
					target: "virtual_tools",
					tool = %tool.exposed_name,
					"promoted JSON found in text content to structuredContent"
				);
				let structured = match &tool.output_projection {
					Some(plan) => apply_projection(tool, plan, &detected),
					None => detected,
				};
				return CallToolResult {
					structured_content: Some(structured),
					..result
				};
			}
		}
	}

	result
}

fn apply_projection(tool: &ResolvedVirtualTool, plan: &Projection, source: &Value) -> Value {
	let projected = plan
		.apply(source)
		.unwrap_or_else(|| Value::Object(Map::new()));
	let came_up_empty = projected
		.as_object()
		.map(|o| o.is_empty())
		.unwrap_or(false);
	if came_up_empty && plan.expects_output() {
		warn!(
			target: "virtual_tools",
			tool = %tool.exposed_name,
			"output projection yielded no matches"
		);
	}
	projected
}

fn first_text_block(result: &CallToolResult) -> Option<&str> {
	result.content.first().and_then(|content| match &content.raw {
		rmcp::model::RawContent::Text(text) => Some(text.text.as_str()),
		_ => None,
	})
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;
	use std::sync::Arc;

	use rmcp::model::{Annotated, RawContent, RawTextContent};
	use serde_json::json;

	use super::*;
	use crate::registry::ValidationMode;

	fn tool(
		defaults: &[(&str, Value)],
		hidden: &[&str],
		input_schema: Option<Value>,
		output_schema: Option<Value>,
	) -> ResolvedVirtualTool {
		ResolvedVirtualTool {
			exposed_name: "get_weather".to_string(),
			backend_name: "weather".to_string(),
			upstream_name: "fetch_forecast".to_string(),
			description: None,
			version: None,
			advertised_input_schema: json!({"type": "object"}),
			effective_input_schema: input_schema,
			effective_defaults: defaults
				.iter()
				.map(|(k, v)| (k.to_string(), v.clone()))
				.collect(),
			hidden_fields: hidden.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
			output_projection: output_schema
				.as_ref()
				.map(|s| Projection::compile(s).unwrap()),
			advertised_output_schema: None,
			expected_schema_hash: None,
			validation_mode: ValidationMode::Warn,
		}
	}

	fn text_result(text: &str) -> CallToolResult {
		CallToolResult {
			content: vec![Annotated {
				raw: RawContent::Text(RawTextContent {
					text: text.to_string(),
					meta: None,
				}),
				annotations: None,
			}],
			structured_content: None,
			is_error: Some(false),
			meta: None,
		}
	}

	fn args(value: Value) -> Option<Map<String, Value>> {
		Some(value.as_object().unwrap().clone())
	}

	#[test]
	fn test_defaults_injected_under_client_args() {
		let tool = tool(
			&[("station_id", json!("KPAL")), ("api_key", json!("K"))],
			&["station_id", "api_key"],
			None,
			None,
		);

		let merged = prepare_arguments(
			&tool,
			args(json!({"city": "Paris"})),
			DefaultMergePolicy::Override,
		)
		.unwrap();

		assert_eq!(merged.get("city"), Some(&json!("Paris")));
		assert_eq!(merged.get("station_id"), Some(&json!("KPAL")));
		assert_eq!(merged.get("api_key"), Some(&json!("K")));
	}

	#[test]
	fn test_client_wins_on_unlocked_collision() {
		// Defaulted but not hidden: the client value is honored regardless
		// of policy.
		let tool = tool(&[("units", json!("metric"))], &[], None, None);

		let merged = prepare_arguments(
			&tool,
			args(json!({"units": "imperial"})),
			DefaultMergePolicy::Override,
		)
		.unwrap();

		assert_eq!(merged.get("units"), Some(&json!("imperial")));
	}

	#[test]
	fn test_locked_collision_override_policy() {
		let tool = tool(&[("api_key", json!("K"))], &["api_key"], None, None);

		let merged = prepare_arguments(
			&tool,
			args(json!({"api_key": "client-supplied"})),
			DefaultMergePolicy::Override,
		)
		.unwrap();

		assert_eq!(merged.get("api_key"), Some(&json!("K")));
	}

	#[test]
	fn test_locked_collision_client_wins_policy() {
		let tool = tool(&[("api_key", json!("K"))], &["api_key"], None, None);

		let merged = prepare_arguments(
			&tool,
			args(json!({"api_key": "client-supplied"})),
			DefaultMergePolicy::ClientWins,
		)
		.unwrap();

		assert_eq!(merged.get("api_key"), Some(&json!("client-supplied")));
	}

	#[test]
	fn test_locked_collision_reject_policy() {
		let tool = tool(&[("api_key", json!("K"))], &["api_key"], None, None);

		let result = prepare_arguments(
			&tool,
			args(json!({"api_key": "client-supplied"})),
			DefaultMergePolicy::Reject,
		);

		assert!(matches!(result, Err(GatewayError::InvalidArguments(_))));
	}

	#[test]
	fn test_missing_arguments_become_defaults_only() {
		let tool = tool(&[("x", json!(1))], &[], None, None);
		let merged = prepare_arguments(&tool, None, DefaultMergePolicy::Override).unwrap();
		assert_eq!(merged.get("x"), Some(&json!(1)));
	}

	#[test]
	fn test_string_arguments_coerced_to_declared_numbers() {
		let schema = json!({
			"type": "object",
			"properties": {
				"days": {"type": "integer"},
				"threshold": {"type": "number"},
				"city": {"type": "string"}
			}
		});
		let tool = tool(&[], &[], Some(schema), None);

		let merged = prepare_arguments(
			&tool,
			args(json!({"days": "7", "threshold": "2.5", "city": "42"})),
			DefaultMergePolicy::Override,
		)
		.unwrap();

		assert_eq!(merged.get("days"), Some(&json!(7)));
		assert_eq!(merged.get("threshold"), Some(&json!(2.5)));
		// Declared string stays a string
		assert_eq!(merged.get("city"), Some(&json!("42")));
	}

	#[test]
	fn test_unparseable_string_passes_through() {
		let schema = json!({
			"type": "object",
			"properties": {"days": {"type": "integer"}}
		});
		let tool = tool(&[], &[], Some(schema), None);

		let merged = prepare_arguments(
			&tool,
			args(json!({"days": "soon"})),
			DefaultMergePolicy::Override,
		)
		.unwrap();

		assert_eq!(merged.get("days"), Some(&json!("soon")));
	}

	#[test]
	fn test_structured_content_is_projected() {
		let output_schema = json!({
			"type": "object",
			"properties": {
				"names": {"type": "array", "source_field": "$.entities[*].name"}
			}
		});
		let tool = tool(&[], &[], None, Some(output_schema));

		let mut result = text_result("raw text");
		result.structured_content = Some(json!({
			"entities": [{"name": "A"}, {"name": "B"}]
		}));

		let transformed = transform_response(&tool, result, true);
		assert_eq!(
			transformed.structured_content,
			Some(json!({"names": ["A", "B"]}))
		);
		// Content blocks are untouched
		assert_eq!(transformed.content.len(), 1);
	}

	#[test]
	fn test_json_in_text_promoted_and_projected() {
		let output_schema = json!({
			"type": "object",
			"properties": {
				"temperature": {"type": "number", "source_field": "$.temp"}
			}
		});
		let tool = tool(&[], &[], None, Some(output_schema));

		let result = text_result(r#"Result: {"temp": 72.5}"#);
		let transformed = transform_response(&tool, result, true);

		assert_eq!(
			transformed.structured_content,
			Some(json!({"temperature": 72.5}))
		);
		// The original text block is preserved for human observers
		match &transformed.content[0].raw {
			RawContent::Text(t) => assert!(t.text.contains("Result:")),
			other => panic!("expected text content, got {other:?}"),
		}
	}

	#[test]
	fn test_json_in_text_promoted_without_projection() {
		let tool = tool(&[], &[], None, None);

		let result = text_result(r#"{"status": "ok"}"#);
		let transformed = transform_response(&tool, result, true);

		assert_eq!(transformed.structured_content, Some(json!({"status": "ok"})));
	}

	#[test]
	fn test_detection_disabled_passes_through() {
		let tool = tool(&[], &[], None, None);

		let result = text_result(r#"{"status": "ok"}"#);
		let transformed = transform_response(&tool, result, false);

		assert!(transformed.structured_content.is_none());
	}

	#[test]
	fn test_plain_text_passes_through() {
		let tool = tool(&[], &[], None, None);

		let result = text_result("nothing structured here");
		let transformed = transform_response(&tool, result, true);

		assert!(transformed.structured_content.is_none());
		assert_eq!(transformed.content.len(), 1);
	}

	#[test]
	fn test_empty_projection_returns_empty_structured_content() {
		let output_schema = json!({
			"type": "object",
			"properties": {
				"missing": {"type": "string", "source_field": "$.not.there"}
			}
		});
		let tool = tool(&[], &[], None, Some(output_schema));

		let mut result = text_result("raw");
		result.structured_content = Some(json!({"unrelated": true}));

		let transformed = transform_response(&tool, result, true);
		assert_eq!(transformed.structured_content, Some(json!({})));
	}

	#[test]
	fn test_structured_without_plan_passes_through() {
		let tool = tool(&[], &[], None, None);

		let mut result = text_result("raw");
		result.structured_content = Some(json!({"as": "is"}));

		let transformed = transform_response(&tool, result, true);
		assert_eq!(transformed.structured_content, Some(json!({"as": "is"})));
	}
}
