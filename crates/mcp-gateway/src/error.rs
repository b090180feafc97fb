// Gateway error taxonomy
//
// Per-call errors surfaced to MCP clients. Load-time failures live in
// `registry::RegistryError` and are fatal before the gateway serves.
// The only error the gateway recovers from on its own is upstream session
// loss (via reconnect); everything here goes back to the caller.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Per-call gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
	#[error("unknown tool: '{0}'")]
	ToolUnknown(String),

	#[error("tool '{name}' is disabled: {reason}")]
	ToolDisabled { name: String, reason: String },

	#[error("backend '{backend}' is unavailable: {reason}")]
	BackendUnavailable { backend: String, reason: String },

	#[error("upstream call timed out after {timeout_ms} ms")]
	UpstreamTimeout { timeout_ms: u128 },

	/// Protocol-level error from the upstream server, forwarded verbatim
	#[error("upstream error: {}", .0.message)]
	Upstream(ErrorData),

	#[error("malformed upstream response: {0}")]
	MalformedResponse(String),

	#[error("invalid arguments: {0}")]
	InvalidArguments(String),
}

impl GatewayError {
	/// The stable kind tag attached to the wire error's data payload
	pub fn kind(&self) -> &'static str {
		match self {
			Self::ToolUnknown(_) => "ToolUnknown",
			Self::ToolDisabled { .. } => "ToolDisabled",
			Self::BackendUnavailable { .. } => "BackendUnavailable",
			Self::UpstreamTimeout { .. } => "UpstreamTimeout",
			Self::Upstream(_) => "UpstreamError",
			Self::MalformedResponse(_) => "MalformedResponse",
			Self::InvalidArguments(_) => "InvalidArguments",
		}
	}
}

impl From<GatewayError> for ErrorData {
	fn from(err: GatewayError) -> Self {
		let kind = err.kind();
		match err {
			// Upstream protocol errors pass through untouched
			GatewayError::Upstream(data) => data,
			GatewayError::ToolUnknown(_) | GatewayError::InvalidArguments(_) => {
				ErrorData::invalid_params(err.to_string(), Some(json!({"kind": kind})))
			},
			_ => ErrorData::internal_error(err.to_string(), Some(json!({"kind": kind}))),
		}
	}
}
