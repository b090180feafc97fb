// Registry loading
//
// Reads a registry document and normalizes it for resolution:
// 1. syntactic parse (unknown top-level keys and malformed JSON fail here)
// 2. legacy inline servers are lifted into the `servers` section
// 3. `${VAR}` environment interpolation over server env/args and defaults
// 4. `#/schemas/<name>` references are expanded in place
//
// The output is still the raw document shape; inheritance and validation
// happen in `resolve`.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::error::RegistryError;
use super::types::{AuthMode, Registry, ServerDef, ServerRef, Transport};

/// Load and normalize a registry from a file
pub fn load_registry_file(path: &Path) -> Result<Registry, RegistryError> {
	info!(target: "registry", "loading registry from {}", path.display());
	let content = std::fs::read_to_string(path)?;
	let registry = parse_registry(&content)?;
	info!(
		target: "registry",
		tools = registry.len(),
		servers = registry.servers.len(),
		"registry loaded"
	);
	Ok(registry)
}

/// Parse and normalize a registry document
pub fn parse_registry(content: &str) -> Result<Registry, RegistryError> {
	let mut registry: Registry = serde_json::from_str(content)?;
	lift_inline_servers(&mut registry);
	interpolate_env(&mut registry);
	expand_schema_refs(&mut registry)?;
	Ok(registry)
}

/// Convert legacy inline `server: {command, args, env}` bindings into named
/// server definitions so the rest of the pipeline sees only the unified form.
fn lift_inline_servers(registry: &mut Registry) {
	let mut lifted: Vec<ServerDef> = Vec::new();

	for tool in &mut registry.tools {
		let Some(ServerRef::Inline(stdio)) = tool.server.clone() else {
			continue;
		};

		// Identical inline definitions collapse onto one synthesized server.
		let existing = registry
			.servers
			.iter()
			.chain(lifted.iter())
			.find(|s| s.stdio.as_ref() == Some(&stdio))
			.map(|s| s.name.clone());

		let name = match existing {
			Some(name) => name,
			None => {
				let mut name = tool.name.clone();
				let mut suffix = 1;
				while registry
					.servers
					.iter()
					.chain(lifted.iter())
					.any(|s| s.name == name)
				{
					suffix += 1;
					name = format!("{}-{}", tool.name, suffix);
				}
				debug!(target: "registry", tool = %tool.name, server = %name, "lifted inline server");
				lifted.push(ServerDef {
					name: name.clone(),
					description: None,
					stdio: Some(stdio),
					url: None,
					transport: Transport::default(),
					auth: AuthMode::default(),
				});
				name
			},
		};

		tool.server = Some(ServerRef::Named(name));
	}

	registry.servers.extend(lifted);
}

/// Replace `${VAR}` patterns using the ambient environment.
///
/// Applies to server args, server env values, and string leaves of tool
/// defaults. Unset variables interpolate to the empty string with a warning.
fn interpolate_env(registry: &mut Registry) {
	for server in &mut registry.servers {
		if let Some(stdio) = &mut server.stdio {
			for arg in &mut stdio.args {
				*arg = interpolate_str(arg);
			}
			for value in stdio.env.values_mut() {
				*value = interpolate_str(value);
			}
		}
	}
	for tool in &mut registry.tools {
		for value in tool.defaults.values_mut() {
			*value = interpolate_value(value);
		}
	}
}

fn interpolate_value(value: &Value) -> Value {
	match value {
		Value::String(s) => Value::String(interpolate_str(s)),
		Value::Object(obj) => Value::Object(
			obj.iter()
				.map(|(k, v)| (k.clone(), interpolate_value(v)))
				.collect(),
		),
		Value::Array(arr) => Value::Array(arr.iter().map(interpolate_value).collect()),
		other => other.clone(),
	}
}

fn interpolate_str(input: &str) -> String {
	let re = Regex::new(r"\$\{([^}]+)\}").expect("valid regex");
	let mut result = input.to_string();

	for cap in re.captures_iter(input) {
		let name = &cap[1];
		let value = std::env::var(name).unwrap_or_else(|_| {
			warn!(target: "registry", variable = name, "environment variable not set, interpolating empty string");
			String::new()
		});
		result = result.replace(&cap[0], &value);
	}

	result
}

/// Expand every `#/schemas/<name>` reference in tool schemas.
///
/// Expansion recurses into the substituted fragment; revisiting a name on
/// the way down is a reference cycle and fails the load.
fn expand_schema_refs(registry: &mut Registry) -> Result<(), RegistryError> {
	let schemas = registry.schemas.clone();

	for tool in &mut registry.tools {
		if let Some(schema) = tool.input_schema.take() {
			tool.input_schema = Some(expand_refs(&schema, &schemas, &tool.name, &mut Vec::new())?);
		}
		if let Some(schema) = tool.output_schema.take() {
			tool.output_schema = Some(expand_refs(&schema, &schemas, &tool.name, &mut Vec::new())?);
		}
	}

	Ok(())
}

fn expand_refs(
	value: &Value,
	schemas: &HashMap<String, Value>,
	tool: &str,
	visiting: &mut Vec<String>,
) -> Result<Value, RegistryError> {
	match value {
		Value::Object(obj) => {
			if let Some(Value::String(reference)) = obj.get("$ref") {
				if let Some(name) = reference.strip_prefix("#/schemas/") {
					if visiting.iter().any(|v| v == name) {
						return Err(RegistryError::SchemaRefCycle(name.to_string()));
					}
					let fragment = schemas.get(name).ok_or_else(|| {
						RegistryError::MissingSchemaRef {
							tool: tool.to_string(),
							reference: reference.clone(),
						}
					})?;
					visiting.push(name.to_string());
					let expanded = expand_refs(fragment, schemas, tool, visiting)?;
					visiting.pop();
					return Ok(expanded);
				}
			}

			let mut out = Map::new();
			for (key, child) in obj {
				out.insert(key.clone(), expand_refs(child, schemas, tool, visiting)?);
			}
			Ok(Value::Object(out))
		},
		Value::Array(arr) => {
			let expanded: Result<Vec<_>, _> = arr
				.iter()
				.map(|v| expand_refs(v, schemas, tool, visiting))
				.collect();
			Ok(Value::Array(expanded?))
		},
		other => Ok(other.clone()),
	}
}
