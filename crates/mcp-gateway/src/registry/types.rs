// Registry document types
//
// The raw registry as it appears on disk, before resolution:
// - Named server definitions (stdio commands, remote URLs)
// - Base tools (reference a server by name, may pin the backend schema)
// - Virtual tools (reference another tool via `source` and layer
//   renames, hidden fields, injected defaults, and output projections
//   on top of it)
//
// Resolution turns this document into the immutable `ResolvedRegistry`;
// nothing on the call path reads these types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed registry document
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Registry {
	/// Schema version for compatibility
	#[serde(default = "default_schema_version")]
	pub schema_version: String,

	/// Named server definitions
	#[serde(default)]
	pub servers: Vec<ServerDef>,

	/// Shared schema fragments, referenced as `#/schemas/<name>`
	#[serde(default)]
	pub schemas: HashMap<String, Value>,

	/// Tool definitions, base and virtual
	#[serde(default)]
	pub tools: Vec<ToolDef>,
}

fn default_schema_version() -> String {
	"1.0".to_string()
}

/// Transport used to reach a remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Transport {
	#[default]
	Sse,
	StreamableHttp,
}

/// Authentication mode for a remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
	#[default]
	None,
	Oauth,
}

/// How to react when a pinned schema or version no longer matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ValidationMode {
	Strict,
	#[default]
	Warn,
	Skip,
}

/// Server definition: how to connect to an MCP backend
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerDef {
	/// Server name, referenced by base tools
	pub name: String,

	#[serde(default)]
	pub description: Option<String>,

	/// Local subprocess configuration; exclusive with `url`
	#[serde(default)]
	pub stdio: Option<StdioConfig>,

	/// Remote endpoint; exclusive with `stdio`
	#[serde(default)]
	pub url: Option<String>,

	#[serde(default)]
	pub transport: Transport,

	#[serde(default)]
	pub auth: AuthMode,
}

/// Stdio subprocess configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StdioConfig {
	/// Command to execute
	pub command: String,

	#[serde(default)]
	pub args: Vec<String>,

	/// Extra environment for the subprocess; values support `${VAR}`
	#[serde(default)]
	pub env: HashMap<String, String>,
}

/// A base tool's server binding: a name reference, or (legacy form) an
/// inline stdio definition that the loader lifts into `servers`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerRef {
	Named(String),
	Inline(StdioConfig),
}

/// Tool definition: base (has `server`) or virtual (has `source`)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolDef {
	/// Name exposed to clients; unique within the document
	pub name: String,

	/// Server binding (base tools only)
	#[serde(default)]
	pub server: Option<ServerRef>,

	/// Source tool reference (virtual tools only)
	#[serde(default)]
	pub source: Option<String>,

	/// Name on the upstream server, when it differs from `name`
	#[serde(default)]
	pub original_name: Option<String>,

	/// Override description; inherited from the source when unset
	#[serde(default)]
	pub description: Option<String>,

	/// Input schema: declared for base tools, override for virtual tools
	#[serde(default)]
	pub input_schema: Option<Value>,

	/// Output projection schema with `source_field` annotations
	#[serde(default)]
	pub output_schema: Option<Value>,

	/// Values injected at call time; string leaves support `${VAR}`
	#[serde(default)]
	pub defaults: HashMap<String, Value>,

	/// Argument names removed from the advertised schema
	#[serde(default)]
	pub hide_fields: Vec<String>,

	/// Semantic version of this definition
	#[serde(default)]
	pub version: Option<String>,

	/// Pinned hash of the upstream tool, checked once the backend is ready
	#[serde(default)]
	pub expected_schema_hash: Option<String>,

	#[serde(default)]
	pub validation_mode: ValidationMode,

	/// Pin on the resolved source tool's version (virtual tools only)
	#[serde(default)]
	pub source_version_pin: Option<String>,
}

impl Registry {
	/// Get server by name
	pub fn get_server(&self, name: &str) -> Option<&ServerDef> {
		self.servers.iter().find(|s| s.name == name)
	}

	/// Get tool by name
	pub fn get_tool(&self, name: &str) -> Option<&ToolDef> {
		self.tools.iter().find(|t| t.name == name)
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}

	pub fn len(&self) -> usize {
		self.tools.len()
	}
}

impl ServerDef {
	/// Create a stdio server definition
	pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			name: name.into(),
			description: None,
			stdio: Some(StdioConfig {
				command: command.into(),
				args,
				env: HashMap::new(),
			}),
			url: None,
			transport: Transport::default(),
			auth: AuthMode::default(),
		}
	}

	/// Create a remote server definition (streamable HTTP)
	pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: None,
			stdio: None,
			url: Some(url.into()),
			transport: Transport::StreamableHttp,
			auth: AuthMode::default(),
		}
	}

	pub fn with_description(mut self, desc: impl Into<String>) -> Self {
		self.description = Some(desc.into());
		self
	}

	pub fn with_auth(mut self, auth: AuthMode) -> Self {
		self.auth = auth;
		self
	}

	pub fn requires_oauth(&self) -> bool {
		self.auth == AuthMode::Oauth
	}
}

impl ToolDef {
	/// Create a base tool bound to a named server
	pub fn base(name: impl Into<String>, server: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			server: Some(ServerRef::Named(server.into())),
			source: None,
			original_name: None,
			description: None,
			input_schema: None,
			output_schema: None,
			defaults: HashMap::new(),
			hide_fields: Vec::new(),
			version: None,
			expected_schema_hash: None,
			validation_mode: ValidationMode::default(),
			source_version_pin: None,
		}
	}

	/// Create a virtual tool derived from another tool
	pub fn virtual_tool(name: impl Into<String>, source: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			server: None,
			source: Some(source.into()),
			original_name: None,
			description: None,
			input_schema: None,
			output_schema: None,
			defaults: HashMap::new(),
			hide_fields: Vec::new(),
			version: None,
			expected_schema_hash: None,
			validation_mode: ValidationMode::default(),
			source_version_pin: None,
		}
	}

	pub fn with_description(mut self, desc: impl Into<String>) -> Self {
		self.description = Some(desc.into());
		self
	}

	pub fn with_original_name(mut self, original: impl Into<String>) -> Self {
		self.original_name = Some(original.into());
		self
	}

	pub fn with_input_schema(mut self, schema: Value) -> Self {
		self.input_schema = Some(schema);
		self
	}

	pub fn with_output_schema(mut self, schema: Value) -> Self {
		self.output_schema = Some(schema);
		self
	}

	pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
		self.defaults.insert(key.into(), value);
		self
	}

	pub fn with_hidden_fields(mut self, fields: Vec<String>) -> Self {
		self.hide_fields = fields;
		self
	}

	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}
}
