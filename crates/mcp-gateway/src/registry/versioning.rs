// Tool schema hashing and drift validation
//
// A base tool may pin the upstream tool's schema with `expectedSchemaHash`.
// The hash covers `{name, description, inputSchema}` serialized with sorted
// keys, so two processes always agree on the digest. Validation runs once a
// backend session reports its tool list (deferred until Ready for OAuth
// backends) and the outcome is dispatched through the tool's validation
// mode: strict disables the tool, warn logs, skip ignores.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use super::resolve::ResolvedVirtualTool;
use super::types::ValidationMode;

/// Result status of validating one tool against its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
	/// Hash matched (or no hash was pinned)
	Valid,
	/// Hash mismatch against the pinned value
	Drift,
	/// Upstream no longer exposes the tool
	Missing,
}

/// Outcome of validating one resolved tool
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
	pub exposed_name: String,
	pub status: ValidationStatus,
	pub mode: ValidationMode,
	pub expected_hash: Option<String>,
	pub actual_hash: Option<String>,
	pub message: String,
}

impl ValidationOutcome {
	/// Whether this outcome disables the tool (strict mode only)
	pub fn disables_tool(&self) -> bool {
		self.mode == ValidationMode::Strict && self.status != ValidationStatus::Valid
	}
}

/// Compute the deterministic hash of an upstream tool definition.
///
/// Format: `sha256:<hex>` over the canonical (sorted-key, compact) JSON of
/// `{name, description, inputSchema}`.
pub fn compute_tool_hash(name: &str, description: Option<&str>, input_schema: &Value) -> String {
	let canonical = canonicalize(&serde_json::json!({
		"name": name,
		"description": description,
		"inputSchema": input_schema,
	}));
	let serialized = serde_json::to_string(&canonical).expect("canonical value serializes");

	let mut hasher = Sha256::new();
	hasher.update(serialized.as_bytes());
	format!("sha256:{:x}", hasher.finalize())
}

/// Rebuild a value with every object converted to sorted-key form.
fn canonicalize(value: &Value) -> Value {
	match value {
		Value::Object(obj) => {
			let sorted: BTreeMap<&String, Value> =
				obj.iter().map(|(k, v)| (k, canonicalize(v))).collect();
			serde_json::to_value(sorted).expect("sorted map serializes")
		},
		Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
		other => other.clone(),
	}
}

/// Hash an upstream tool as reported by `tools/list`
pub fn hash_upstream_tool(tool: &rmcp::model::Tool) -> String {
	let input_schema = Value::Object(tool.input_schema.as_ref().clone());
	compute_tool_hash(tool.name.as_ref(), tool.description.as_deref(), &input_schema)
}

/// Validate expected schema hashes against a backend's reported tool list.
///
/// `expected` is every resolved tool bound to the backend; tools without a
/// pinned hash or with skip mode pass untouched.
pub fn validate_backend_tools(
	backend_name: &str,
	expected: &[Arc<ResolvedVirtualTool>],
	upstream: &[rmcp::model::Tool],
) -> Vec<ValidationOutcome> {
	let by_name: std::collections::HashMap<&str, &rmcp::model::Tool> =
		upstream.iter().map(|t| (t.name.as_ref(), t)).collect();

	let mut outcomes = Vec::new();
	for tool in expected {
		let Some(expected_hash) = &tool.expected_schema_hash else {
			continue;
		};
		if tool.validation_mode == ValidationMode::Skip {
			continue;
		}

		let outcome = match by_name.get(tool.upstream_name.as_str()) {
			None => ValidationOutcome {
				exposed_name: tool.exposed_name.clone(),
				status: ValidationStatus::Missing,
				mode: tool.validation_mode,
				expected_hash: Some(expected_hash.clone()),
				actual_hash: None,
				message: format!(
					"tool '{}' not found on backend '{}'",
					tool.upstream_name, backend_name
				),
			},
			Some(upstream_tool) => {
				let actual = hash_upstream_tool(upstream_tool);
				if &actual == expected_hash {
					ValidationOutcome {
						exposed_name: tool.exposed_name.clone(),
						status: ValidationStatus::Valid,
						mode: tool.validation_mode,
						expected_hash: Some(expected_hash.clone()),
						actual_hash: Some(actual),
						message: String::new(),
					}
				} else {
					ValidationOutcome {
						exposed_name: tool.exposed_name.clone(),
						status: ValidationStatus::Drift,
						mode: tool.validation_mode,
						expected_hash: Some(expected_hash.clone()),
						actual_hash: Some(actual.clone()),
						message: format!(
							"schema hash mismatch: expected {expected_hash}, got {actual}"
						),
					}
				}
			},
		};

		match outcome.status {
			ValidationStatus::Valid => {},
			_ if outcome.mode == ValidationMode::Strict => {
				error!(
					target: "backend",
					tool = %outcome.exposed_name,
					backend = backend_name,
					"{} (tool disabled)", outcome.message
				);
			},
			_ => {
				warn!(
					target: "backend",
					tool = %outcome.exposed_name,
					backend = backend_name,
					"{}", outcome.message
				);
			},
		}

		outcomes.push(outcome);
	}

	outcomes
}
