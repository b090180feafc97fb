// Registry error types
//
// Everything here is fatal at load time: a registry that fails to parse,
// resolve, or validate stops the gateway before it serves a single request.

use thiserror::Error;

use crate::transform::project::ProjectionError;

/// Errors raised while loading, resolving, or validating a registry
#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("failed to parse registry: {0}")]
	Parse(#[from] serde_json::Error),

	#[error("failed to read registry file: {0}")]
	Io(#[from] std::io::Error),

	#[error("duplicate tool name: '{0}'")]
	DuplicateToolName(String),

	#[error("duplicate server name: '{0}'")]
	DuplicateServerName(String),

	#[error("server '{name}' is invalid: {reason}")]
	InvalidServer { name: String, reason: String },

	#[error("tool '{0}' must declare exactly one of 'server' or 'source'")]
	AmbiguousBinding(String),

	#[error("tool '{tool}' references unknown server '{server}'")]
	UnknownServer { tool: String, server: String },

	#[error("tool '{tool}' references unknown source tool '{source_tool}'")]
	UnknownSource { tool: String, source_tool: String },

	#[error("source cycle detected: {}", .0.join(" -> "))]
	SourceCycle(Vec<String>),

	#[error("source chain for tool '{0}' exceeds the maximum depth")]
	SourceDepthExceeded(String),

	#[error("unresolved schema reference '{reference}' in tool '{tool}'")]
	MissingSchemaRef { tool: String, reference: String },

	#[error("schema reference cycle through '#/schemas/{0}'")]
	SchemaRefCycle(String),

	#[error("tool '{tool}' output schema is invalid: {source}")]
	InvalidOutputSchema {
		tool: String,
		#[source]
		source: ProjectionError,
	},

	#[error(
		"tool '{tool}' hides required field '{field}' without providing a default"
	)]
	HiddenRequiredField { tool: String, field: String },

	#[error(
		"tool '{tool}' drops required field '{field}': it is neither advertised nor defaulted"
	)]
	RequiredFieldUnbound { tool: String, field: String },
}
