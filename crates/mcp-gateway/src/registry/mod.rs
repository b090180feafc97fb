// Tool registry
//
// Declarative composition layer: a registry document describes upstream
// servers, base tools, and virtual tools derived from them (renames, hidden
// fields, injected defaults, output projections). Loading resolves the
// document once into immutable per-tool plans; the call path only ever
// reads the resolved form.

mod error;
mod loader;
mod resolve;
mod types;
mod versioning;

pub use error::RegistryError;
pub use loader::{load_registry_file, parse_registry};
pub use resolve::{ResolvedRegistry, ResolvedVirtualTool};
pub use types::{
	AuthMode, Registry, ServerDef, ServerRef, StdioConfig, ToolDef, Transport, ValidationMode,
};
pub use versioning::{
	ValidationOutcome, ValidationStatus, compute_tool_hash, hash_upstream_tool,
	validate_backend_tools,
};
