// Registry resolution
//
// Turns a normalized registry document into the immutable structures the
// call path consumes:
// - source chains are walked to a base tool (cycles and runaway depth fail)
// - single-valued fields late-bind from the most specific definition;
//   `defaults` and `hideFields` merge down the chain
// - the §3 invariants are enforced, so a registry that loads cannot hide a
//   required field without a default or collide exposed names
// - per-tool plans (advertised input schema, output projection) are
//   precomputed once; `tools/list` and `tools/call` never recompute them

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{error, warn};

use crate::transform::project::{Projection, strip_source_fields};

use super::error::RegistryError;
use super::types::{Registry, ServerDef, ServerRef, ToolDef, ValidationMode};

/// Inheritance chains deeper than this are treated as runaway definitions.
const MAX_SOURCE_DEPTH: usize = 32;

/// A fully resolved tool, immutable for the lifetime of the process
#[derive(Debug, Clone)]
pub struct ResolvedVirtualTool {
	/// Name clients see
	pub exposed_name: String,
	/// Server the upstream call dispatches to
	pub backend_name: String,
	/// Tool name at the upstream server
	pub upstream_name: String,
	pub description: Option<String>,
	pub version: Option<String>,
	/// Client-facing input schema: hidden and defaulted fields removed
	pub advertised_input_schema: Value,
	/// Full effective input schema before hiding, used for argument coercion
	pub effective_input_schema: Option<Value>,
	/// Flattened argument defaults injected at call time
	pub effective_defaults: Map<String, Value>,
	/// Flattened hidden-field set
	pub hidden_fields: HashSet<String>,
	/// Compiled output projection, if the tool declares one
	pub output_projection: Option<Projection>,
	/// Advertised output schema with `source_field` stripped
	pub advertised_output_schema: Option<Value>,
	/// Pinned upstream schema hash, inherited from the chain root
	pub expected_schema_hash: Option<String>,
	/// Chain root's validation mode, governs drift handling
	pub validation_mode: ValidationMode,
}

/// The resolved registry: a read-only tool map plus the validated servers
#[derive(Debug)]
pub struct ResolvedRegistry {
	tools: HashMap<String, Arc<ResolvedVirtualTool>>,
	/// Document order of the exposed tools, for a stable tools/list
	order: Vec<String>,
	servers: Vec<ServerDef>,
}

impl ResolvedRegistry {
	/// Resolve a normalized registry document
	pub fn resolve(registry: Registry) -> Result<Self, RegistryError> {
		let mut seen_tools = HashSet::new();
		for tool in &registry.tools {
			if !seen_tools.insert(tool.name.as_str()) {
				return Err(RegistryError::DuplicateToolName(tool.name.clone()));
			}
		}

		let mut seen_servers = HashSet::new();
		for server in &registry.servers {
			if !seen_servers.insert(server.name.as_str()) {
				return Err(RegistryError::DuplicateServerName(server.name.clone()));
			}
			validate_server(server)?;
		}

		let by_name: HashMap<&str, &ToolDef> =
			registry.tools.iter().map(|t| (t.name.as_str(), t)).collect();

		let mut tools = HashMap::new();
		let mut order = Vec::new();
		for tool in &registry.tools {
			if let Some(resolved) = resolve_tool(tool, &by_name, &registry)? {
				order.push(resolved.exposed_name.clone());
				tools.insert(resolved.exposed_name.clone(), Arc::new(resolved));
			}
		}

		Ok(Self {
			tools,
			order,
			servers: registry.servers,
		})
	}

	/// O(1) lookup by exposed name
	pub fn get_tool(&self, name: &str) -> Option<&Arc<ResolvedVirtualTool>> {
		self.tools.get(name)
	}

	/// Tools in document order
	pub fn tools(&self) -> impl Iterator<Item = &Arc<ResolvedVirtualTool>> {
		self.order.iter().filter_map(|name| self.tools.get(name))
	}

	/// Resolved tools that dispatch to the given backend
	pub fn tools_for_backend(&self, backend: &str) -> Vec<Arc<ResolvedVirtualTool>> {
		self.tools()
			.filter(|t| t.backend_name == backend)
			.cloned()
			.collect()
	}

	pub fn servers(&self) -> &[ServerDef] {
		&self.servers
	}

	pub fn get_server(&self, name: &str) -> Option<&ServerDef> {
		self.servers.iter().find(|s| s.name == name)
	}

	pub fn len(&self) -> usize {
		self.tools.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}
}

fn validate_server(server: &ServerDef) -> Result<(), RegistryError> {
	match (&server.stdio, &server.url) {
		(Some(_), Some(_)) => Err(RegistryError::InvalidServer {
			name: server.name.clone(),
			reason: "declares both 'stdio' and 'url'".to_string(),
		}),
		(None, None) => Err(RegistryError::InvalidServer {
			name: server.name.clone(),
			reason: "declares neither 'stdio' nor 'url'".to_string(),
		}),
		(None, Some(url)) => {
			url::Url::parse(url).map_err(|e| RegistryError::InvalidServer {
				name: server.name.clone(),
				reason: format!("invalid url: {e}"),
			})?;
			Ok(())
		},
		(Some(_), None) => Ok(()),
	}
}

/// Resolve one tool through its source chain.
///
/// Returns `Ok(None)` when a strict `sourceVersionPin` mismatch drops the
/// tool from the exposed surface.
fn resolve_tool(
	tool: &ToolDef,
	by_name: &HashMap<&str, &ToolDef>,
	registry: &Registry,
) -> Result<Option<ResolvedVirtualTool>, RegistryError> {
	// Walk leaf -> base
	let mut chain: Vec<&ToolDef> = vec![tool];
	let mut visited: HashSet<&str> = HashSet::from([tool.name.as_str()]);
	let mut current = tool;
	loop {
		match (&current.server, &current.source) {
			(Some(_), None) => break,
			(None, Some(source)) => {
				let next = by_name.get(source.as_str()).ok_or_else(|| {
					RegistryError::UnknownSource {
						tool: current.name.clone(),
						source_tool: source.clone(),
					}
				})?;
				if !visited.insert(next.name.as_str()) {
					let mut cycle: Vec<String> =
						chain.iter().map(|t| t.name.clone()).collect();
					cycle.push(next.name.clone());
					return Err(RegistryError::SourceCycle(cycle));
				}
				if chain.len() >= MAX_SOURCE_DEPTH {
					return Err(RegistryError::SourceDepthExceeded(tool.name.clone()));
				}
				chain.push(next);
				current = next;
			},
			_ => return Err(RegistryError::AmbiguousBinding(current.name.clone())),
		}
	}

	let base = *chain.last().expect("chain is never empty");
	let server_name = match &base.server {
		Some(ServerRef::Named(name)) => name.clone(),
		_ => {
			return Err(RegistryError::InvalidServer {
				name: base.name.clone(),
				reason: "inline server bindings must be normalized before resolution".to_string(),
			});
		},
	};
	if registry.get_server(&server_name).is_none() {
		return Err(RegistryError::UnknownServer {
			tool: base.name.clone(),
			server: server_name,
		});
	}

	// Late-bind single-valued fields base -> leaf; merge defaults and
	// hidden fields along the way (descendants win key-by-key).
	let mut description = None;
	let mut version = None;
	let mut input_schema = None;
	let mut output_schema = None;
	let mut original_name = None;
	let mut defaults: Map<String, Value> = Map::new();
	let mut hidden: HashSet<String> = HashSet::new();
	for def in chain.iter().rev() {
		if def.description.is_some() {
			description = def.description.clone();
		}
		if def.version.is_some() {
			version = def.version.clone();
		}
		if def.input_schema.is_some() {
			input_schema = def.input_schema.clone();
		}
		if def.output_schema.is_some() {
			output_schema = def.output_schema.clone();
		}
		if def.original_name.is_some() {
			original_name = def.original_name.clone();
		}
		for (key, value) in &def.defaults {
			defaults.insert(key.clone(), value.clone());
		}
		for field in &def.hide_fields {
			hidden.insert(field.clone());
		}
	}

	let upstream_name = original_name.unwrap_or_else(|| base.name.clone());

	// Source version pin: compare against the immediate source's effective
	// version (itself late-bound through the rest of the chain).
	if let (Some(pin), true) = (&tool.source_version_pin, chain.len() > 1) {
		let source_version = chain[1..].iter().rev().find_map(|d| d.version.clone());
		if source_version.as_deref() != Some(pin.as_str()) {
			let found = source_version.as_deref().unwrap_or("<unversioned>");
			match tool.validation_mode {
				ValidationMode::Strict => {
					error!(
						target: "registry",
						tool = %tool.name,
						pinned = %pin,
						found = %found,
						"source version pin mismatch, dropping tool"
					);
					return Ok(None);
				},
				ValidationMode::Warn => {
					warn!(
						target: "registry",
						tool = %tool.name,
						pinned = %pin,
						found = %found,
						"source version pin mismatch"
					);
				},
				ValidationMode::Skip => {},
			}
		}
	}

	// Every field the chain root requires must stay bindable: either still
	// advertised to clients or covered by an injected default.
	if let Some(root_schema) = &base.input_schema {
		let effective_properties: HashSet<String> = input_schema
			.as_ref()
			.and_then(|s| s.get("properties"))
			.and_then(Value::as_object)
			.map(|props| props.keys().cloned().collect())
			.unwrap_or_default();

		for field in required_fields(root_schema) {
			if defaults.contains_key(&field) {
				continue;
			}
			if hidden.contains(&field) {
				return Err(RegistryError::HiddenRequiredField {
					tool: tool.name.clone(),
					field,
				});
			}
			if !effective_properties.contains(&field) {
				return Err(RegistryError::RequiredFieldUnbound {
					tool: tool.name.clone(),
					field,
				});
			}
		}
	}

	let advertised_input_schema = match &input_schema {
		Some(schema) => prune_input_schema(schema, &hidden, &defaults),
		None => json!({"type": "object"}),
	};

	let (output_projection, advertised_output_schema) = match &output_schema {
		Some(schema) => {
			let plan = Projection::compile(schema).map_err(|e| {
				RegistryError::InvalidOutputSchema {
					tool: tool.name.clone(),
					source: e,
				}
			})?;
			(Some(plan), Some(strip_source_fields(schema)))
		},
		None => (None, None),
	};

	Ok(Some(ResolvedVirtualTool {
		exposed_name: tool.name.clone(),
		backend_name: server_name,
		upstream_name,
		description,
		version,
		advertised_input_schema,
		effective_input_schema: input_schema,
		effective_defaults: defaults,
		hidden_fields: hidden,
		output_projection,
		advertised_output_schema,
		expected_schema_hash: base.expected_schema_hash.clone(),
		validation_mode: base.validation_mode,
	}))
}

fn required_fields(schema: &Value) -> Vec<String> {
	schema
		.get("required")
		.and_then(Value::as_array)
		.map(|arr| {
			arr.iter()
				.filter_map(Value::as_str)
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default()
}

/// Remove hidden and defaulted fields from `properties` and `required`.
fn prune_input_schema(
	schema: &Value,
	hidden: &HashSet<String>,
	defaults: &Map<String, Value>,
) -> Value {
	let mut pruned = schema.clone();

	let concealed = |name: &str| hidden.contains(name) || defaults.contains_key(name);

	if let Some(props) = pruned.get_mut("properties").and_then(Value::as_object_mut) {
		props.retain(|name, _| !concealed(name));
	}
	if let Some(required) = pruned.get_mut("required").and_then(Value::as_array_mut) {
		required.retain(|v| v.as_str().map(|name| !concealed(name)).unwrap_or(true));
	}

	pruned
}
