// Gateway façade
//
// The MCP server role: advertises the precomputed virtual tool surface and
// dispatches tools/call through the transformation engine to the backend
// sessions. The resolved registry is read-only shared state; the only
// mutable pieces are the disabled-tool table (fed by drift validation) and
// the /status activity timestamp.

pub mod http;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rmcp::ServerHandler;
use rmcp::model::{
	CallToolRequestParam, CallToolResult, ErrorData, Implementation, ListToolsResult, Meta,
	PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{Value, json};
use tracing::debug;

use crate::backend::BackendManager;
use crate::error::GatewayError;
use crate::registry::{ResolvedRegistry, ResolvedVirtualTool, ValidationOutcome, ValidationStatus};
use crate::settings::GatewaySettings;
use crate::transform::engine;

/// The MCP gateway server
#[derive(Clone)]
pub struct McpGateway {
	inner: Arc<GatewayInner>,
}

struct GatewayInner {
	registry: Arc<ResolvedRegistry>,
	backends: Arc<BackendManager>,
	settings: GatewaySettings,
	/// Tool surface computed once at construction; tools/list clones it
	advertised: Vec<Tool>,
	/// Exposed name -> reason, fed by schema-drift validation
	disabled: RwLock<HashMap<String, String>>,
	last_activity: RwLock<DateTime<Utc>>,
}

impl McpGateway {
	pub fn new(
		registry: Arc<ResolvedRegistry>,
		backends: Arc<BackendManager>,
		settings: GatewaySettings,
	) -> Self {
		let advertised = registry.tools().map(|t| advertise_tool(t)).collect();
		Self {
			inner: Arc::new(GatewayInner {
				registry,
				backends,
				settings,
				advertised,
				disabled: RwLock::new(HashMap::new()),
				last_activity: RwLock::new(Utc::now()),
			}),
		}
	}

	pub fn registry(&self) -> &Arc<ResolvedRegistry> {
		&self.inner.registry
	}

	pub fn backends(&self) -> &Arc<BackendManager> {
		&self.inner.backends
	}

	/// Apply drift-validation outcomes: strict failures disable the tool,
	/// a later Valid outcome re-enables it.
	pub fn apply_validation(&self, outcomes: &[ValidationOutcome]) {
		let mut disabled = self.inner.disabled.write();
		for outcome in outcomes {
			if outcome.disables_tool() {
				disabled.insert(outcome.exposed_name.clone(), outcome.message.clone());
			} else if outcome.status == ValidationStatus::Valid {
				disabled.remove(&outcome.exposed_name);
			}
		}
	}

	/// Complete a deferred OAuth backend, then run its deferred validation.
	pub async fn oauth_connect(&self, server_url: &str, token: String) -> Result<(), GatewayError> {
		let session = self.inner.backends.find_by_url(server_url).ok_or_else(|| {
			GatewayError::InvalidArguments(format!("no OAuth server registered for {server_url}"))
		})?;
		session.connect_oauth(token).await?;

		let mut outcomes = Vec::new();
		for server in self.inner.registry.servers() {
			outcomes.extend(
				self.inner
					.backends
					.validate_backend(&self.inner.registry, &server.name),
			);
		}
		self.apply_validation(&outcomes);
		Ok(())
	}

	fn touch(&self) {
		*self.inner.last_activity.write() = Utc::now();
	}

	/// The /status payload
	pub fn status_snapshot(&self) -> Value {
		let backends = self.inner.backends.statuses(&self.inner.registry);
		json!({
			"lastActivity": self.inner.last_activity.read().to_rfc3339(),
			"backendCount": backends.len(),
			"backends": backends,
		})
	}

	async fn dispatch(
		&self,
		request: CallToolRequestParam,
		context: RequestContext<RoleServer>,
	) -> Result<CallToolResult, GatewayError> {
		self.touch();

		let name = request.name.as_ref();
		let tool = self
			.inner
			.registry
			.get_tool(name)
			.ok_or_else(|| GatewayError::ToolUnknown(name.to_string()))?;

		if let Some(reason) = self.inner.disabled.read().get(name) {
			return Err(GatewayError::ToolDisabled {
				name: name.to_string(),
				reason: reason.clone(),
			});
		}

		let arguments =
			engine::prepare_arguments(tool, request.arguments, self.inner.settings.merge_policy)?;

		let session = self
			.inner
			.backends
			.session_for(&tool.backend_name)
			.ok_or_else(|| GatewayError::BackendUnavailable {
				backend: tool.backend_name.clone(),
				reason: "no session for backend".to_string(),
			})?;

		debug!(
			target: "virtual_tools",
			tool = %tool.exposed_name,
			upstream = %tool.upstream_name,
			backend = %tool.backend_name,
			"dispatching tool call"
		);

		// Correlate upstream progress notifications back to this caller.
		let progress_token = context.meta.get_progress_token();
		let upstream_meta = progress_token.as_ref().map(|token| {
			let mut meta = Meta::default();
			meta.set_progress_token(token.clone());
			meta
		});
		let router = self.inner.backends.progress();
		if let Some(token) = &progress_token {
			router.register(token, context.peer.clone());
		}

		let result = session
			.call_tool(&tool.upstream_name, arguments, upstream_meta)
			.await;

		if let Some(token) = &progress_token {
			router.unregister(token);
		}

		Ok(engine::transform_response(
			tool,
			result?,
			self.inner.settings.detect_json,
		))
	}
}

impl ServerHandler for McpGateway {
	fn get_info(&self) -> ServerInfo {
		ServerInfo {
			protocol_version: Default::default(),
			capabilities: ServerCapabilities::builder().enable_tools().build(),
			server_info: Implementation::from_build_env(),
			instructions: Some(
				"Gateway to a curated set of MCP tools. Calls are routed to the \
				 appropriate upstream server with registry-defined defaults and \
				 output projections applied."
					.to_string(),
			),
		}
	}

	fn list_tools(
		&self,
		_request: Option<PaginatedRequestParam>,
		_context: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
		self.touch();
		std::future::ready(Ok(ListToolsResult {
			tools: self.inner.advertised.clone(),
			next_cursor: None,
		}))
	}

	fn call_tool(
		&self,
		request: CallToolRequestParam,
		context: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
		async move {
			self.dispatch(request, context)
				.await
				.map_err(ErrorData::from)
		}
	}
}

fn advertise_tool(tool: &ResolvedVirtualTool) -> Tool {
	let input_schema = tool
		.advertised_input_schema
		.as_object()
		.cloned()
		.unwrap_or_default();
	let output_schema = tool
		.advertised_output_schema
		.as_ref()
		.and_then(Value::as_object)
		.cloned()
		.map(Arc::new);

	Tool {
		name: Cow::Owned(tool.exposed_name.clone()),
		title: None,
		description: tool.description.clone().map(Cow::Owned),
		input_schema: Arc::new(input_schema),
		output_schema,
		annotations: None,
		icons: None,
	}
}

#[cfg(test)]
mod tests {
	use crate::registry::{ResolvedRegistry, parse_registry};

	use super::*;

	fn gateway(content: &str) -> McpGateway {
		let registry =
			Arc::new(ResolvedRegistry::resolve(parse_registry(content).unwrap()).unwrap());
		let settings = GatewaySettings::default();
		let backends = Arc::new(BackendManager::new(&registry, &settings));
		McpGateway::new(registry, backends, settings)
	}

	#[test]
	fn test_advertised_surface_is_precomputed() {
		let gateway = gateway(
			r#"{
				"servers": [{"name": "s", "stdio": {"command": "run"}}],
				"tools": [
					{
						"name": "fetch_forecast",
						"server": "s",
						"inputSchema": {
							"type": "object",
							"properties": {
								"city": {"type": "string"},
								"api_key": {"type": "string"}
							},
							"required": ["city", "api_key"]
						}
					},
					{
						"name": "get_weather",
						"source": "fetch_forecast",
						"defaults": {"api_key": "K"},
						"outputSchema": {
							"type": "object",
							"properties": {
								"temperature": {"type": "number", "source_field": "$.temp"}
							}
						}
					}
				]
			}"#,
		);

		let advertised = &gateway.inner.advertised;
		assert_eq!(advertised.len(), 2);

		let weather = advertised
			.iter()
			.find(|t| t.name.as_ref() == "get_weather")
			.unwrap();
		assert!(weather.input_schema.get("properties").is_some());
		let props = weather.input_schema["properties"].as_object().unwrap();
		assert!(props.contains_key("city"));
		assert!(!props.contains_key("api_key"));

		// Advertised output schema has no source_field annotations
		let output = weather.output_schema.as_ref().unwrap();
		assert!(
			output["properties"]["temperature"].get("source_field").is_none()
		);
	}

	#[test]
	fn test_status_snapshot_shape() {
		let gateway = gateway(
			r#"{
				"servers": [{"name": "s", "stdio": {"command": "run"}}],
				"tools": [{"name": "t", "server": "s"}]
			}"#,
		);

		let snapshot = gateway.status_snapshot();
		assert!(snapshot.get("lastActivity").is_some());
		assert_eq!(snapshot["backendCount"], 1);
		assert_eq!(snapshot["backends"][0]["name"], "s");
	}

	#[test]
	fn test_validation_outcome_disables_and_reenables() {
		let gateway = gateway(
			r#"{
				"servers": [{"name": "s", "stdio": {"command": "run"}}],
				"tools": [{"name": "t", "server": "s"}]
			}"#,
		);

		let drifted = ValidationOutcome {
			exposed_name: "t".to_string(),
			status: ValidationStatus::Drift,
			mode: crate::registry::ValidationMode::Strict,
			expected_hash: Some("sha256:old".to_string()),
			actual_hash: Some("sha256:new".to_string()),
			message: "schema hash mismatch".to_string(),
		};
		gateway.apply_validation(std::slice::from_ref(&drifted));
		assert!(gateway.inner.disabled.read().contains_key("t"));

		let valid = ValidationOutcome {
			status: ValidationStatus::Valid,
			message: String::new(),
			..drifted
		};
		gateway.apply_validation(&[valid]);
		assert!(!gateway.inner.disabled.read().contains_key("t"));
	}
}
