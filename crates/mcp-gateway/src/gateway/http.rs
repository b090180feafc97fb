// Northbound HTTP transport
//
// Streamable HTTP MCP under /mcp (the SDK handles Mcp-Session-Id
// round-tripping) and legacy SSE under /sse + /message, plus two plain
// endpoints: GET /status for monitoring and POST /oauth/connect to
// complete deferred OAuth backends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rmcp::transport::StreamableHttpService;
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::transport::streamable_http_server::StreamableHttpServerConfig;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::McpGateway;

#[derive(Debug, Deserialize)]
struct OauthConnectRequest {
	server_url: String,
	token: String,
}

/// Build the gateway's HTTP application.
///
/// The returned cancellation token stops the SSE session workers on
/// shutdown.
pub fn router(gateway: McpGateway, bind: SocketAddr, stateless: bool) -> (Router, CancellationToken) {
	let mcp_service = StreamableHttpService::new(
		{
			let gateway = gateway.clone();
			move || Ok(gateway.clone())
		},
		Arc::new(LocalSessionManager::default()),
		StreamableHttpServerConfig {
			sse_keep_alive: Some(Duration::from_secs(15)),
			stateful_mode: !stateless,
		},
	);

	let sse_config = SseServerConfig {
		bind,
		sse_path: "/sse".to_string(),
		post_path: "/message".to_string(),
		ct: CancellationToken::new(),
		sse_keep_alive: Some(Duration::from_secs(15)),
	};
	let (sse_server, sse_router) = SseServer::new(sse_config);
	let ct = sse_server.with_service({
		let gateway = gateway.clone();
		move || gateway.clone()
	});

	let app = Router::new()
		.route("/status", get(handle_status))
		.route("/oauth/connect", post(handle_oauth_connect))
		.with_state(gateway)
		.nest_service("/mcp", mcp_service)
		.merge(sse_router);

	(app, ct)
}

async fn handle_status(State(gateway): State<McpGateway>) -> impl IntoResponse {
	Json(gateway.status_snapshot())
}

async fn handle_oauth_connect(
	State(gateway): State<McpGateway>,
	Json(request): Json<OauthConnectRequest>,
) -> impl IntoResponse {
	match gateway
		.oauth_connect(&request.server_url, request.token)
		.await
	{
		Ok(()) => (
			StatusCode::OK,
			Json(json!({"status": "connected", "server_url": request.server_url})),
		),
		Err(err) => {
			warn!(
				target: "backend",
				server_url = %request.server_url,
				error = %err,
				"oauth connect failed"
			);
			(
				StatusCode::BAD_GATEWAY,
				Json(json!({"error": err.to_string()})),
			)
		},
	}
}
