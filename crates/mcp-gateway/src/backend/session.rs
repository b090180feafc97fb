// Backend session lifecycle
//
// One session per distinct upstream connection. Non-OAuth sessions connect
// eagerly at startup; OAuth sessions wait for a token. A lost session is
// marked Closed and re-initialized on demand behind an exponential-backoff
// gate; while the gate is shut, calls fail fast with BackendUnavailable.
//
// Concurrency: the rmcp peer multiplexes concurrent requests over one
// transport using MCP request-id correlation, so callers only contend on
// the brief client-slot lock, never for the duration of a call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use rmcp::model::{
	CallToolRequest, CallToolRequestParam, CallToolResult, ClientInfo, ClientRequest, Meta,
	ProgressNotificationParam, ServerResult, Tool,
};
use rmcp::service::{
	NotificationContext, Peer, PeerRequestOptions, RunningService, ServiceError,
};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{ClientHandler, RoleClient, ServiceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::registry::{ServerDef, StdioConfig, Transport};

use super::progress::ProgressRouter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
	Connecting,
	Ready,
	/// Connected, but discovery failed; calls are still attempted
	Degraded,
	Closed,
}

type McpClient = RunningService<RoleClient, SessionClientHandler>;

/// Client-side handler for one upstream session
#[derive(Clone)]
struct SessionClientHandler {
	progress: Arc<ProgressRouter>,
}

impl ClientHandler for SessionClientHandler {
	fn get_info(&self) -> ClientInfo {
		ClientInfo::default()
	}

	fn on_progress(
		&self,
		params: ProgressNotificationParam,
		_context: NotificationContext<RoleClient>,
	) -> impl std::future::Future<Output = ()> + Send + '_ {
		let router = self.progress.clone();
		async move { router.forward(params).await }
	}
}

struct BackoffState {
	consecutive_failures: u32,
	next_allowed: Instant,
}

/// One connected (or connectable) upstream MCP peer
pub struct BackendSession {
	name: String,
	def: ServerDef,
	base_env: HashMap<String, String>,
	call_timeout: Duration,
	progress: Arc<ProgressRouter>,

	state: RwLock<SessionState>,
	client: Mutex<Option<McpClient>>,
	connect_lock: Mutex<()>,
	backoff: Mutex<BackoffState>,
	tools: RwLock<Vec<Tool>>,
	oauth_token: RwLock<Option<String>>,
}

impl BackendSession {
	pub fn new(
		name: String,
		def: ServerDef,
		base_env: HashMap<String, String>,
		call_timeout: Duration,
		progress: Arc<ProgressRouter>,
	) -> Self {
		Self {
			name,
			def,
			base_env,
			call_timeout,
			progress,
			state: RwLock::new(SessionState::Closed),
			client: Mutex::new(None),
			connect_lock: Mutex::new(()),
			backoff: Mutex::new(BackoffState {
				consecutive_failures: 0,
				next_allowed: Instant::now(),
			}),
			tools: RwLock::new(Vec::new()),
			oauth_token: RwLock::new(None),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn definition(&self) -> &ServerDef {
		&self.def
	}

	pub fn state(&self) -> SessionState {
		*self.state.read()
	}

	/// Whether the session is deferred until an OAuth token arrives
	pub fn is_oauth_pending(&self) -> bool {
		self.def.requires_oauth() && self.oauth_token.read().is_none()
	}

	/// The upstream tools/list captured at the last successful handshake
	pub fn cached_tools(&self) -> Vec<Tool> {
		self.tools.read().clone()
	}

	pub fn tool_count(&self) -> usize {
		self.tools.read().len()
	}

	/// Eagerly initialize the session (startup path for non-OAuth servers)
	pub async fn initialize(&self) -> Result<(), GatewayError> {
		self.ensure_ready().await.map(|_| ())
	}

	/// Supply the OAuth bearer token and connect
	pub async fn connect_oauth(&self, token: String) -> Result<(), GatewayError> {
		*self.oauth_token.write() = Some(token);
		self.ensure_ready().await.map(|_| ())
	}

	/// Call a tool on the upstream server.
	///
	/// `meta` carries the caller's progress token so upstream progress
	/// notifications can be correlated back. The configured deadline is
	/// enforced by the SDK, which also sends a cancellation upstream when
	/// it expires.
	pub async fn call_tool(
		&self,
		tool_name: &str,
		arguments: Map<String, Value>,
		meta: Option<Meta>,
	) -> Result<CallToolResult, GatewayError> {
		let peer = self.ensure_ready().await?;

		let request = ClientRequest::CallToolRequest(CallToolRequest {
			method: Default::default(),
			params: CallToolRequestParam {
				name: tool_name.to_string().into(),
				arguments: Some(arguments),
			},
			extensions: Default::default(),
		});

		let handle = match peer
			.send_cancellable_request(
				request,
				PeerRequestOptions {
					timeout: Some(self.call_timeout),
					meta,
				},
			)
			.await
		{
			Ok(handle) => handle,
			Err(err) => return Err(self.classify_service_error(err).await),
		};

		match handle.await_response().await {
			Ok(ServerResult::CallToolResult(result)) => Ok(result),
			Ok(other) => Err(GatewayError::MalformedResponse(format!(
				"unexpected response type for tools/call: {other:?}"
			))),
			Err(err) => Err(self.classify_service_error(err).await),
		}
	}

	async fn classify_service_error(&self, err: ServiceError) -> GatewayError {
		match err {
			ServiceError::Timeout { .. } => GatewayError::UpstreamTimeout {
				timeout_ms: self.call_timeout.as_millis(),
			},
			ServiceError::McpError(data) => GatewayError::Upstream(data),
			ServiceError::TransportSend(_) | ServiceError::TransportClosed => {
				self.mark_closed("transport closed").await;
				GatewayError::BackendUnavailable {
					backend: self.name.clone(),
					reason: "connection lost".to_string(),
				}
			},
			other => GatewayError::MalformedResponse(other.to_string()),
		}
	}

	/// Get a ready peer, connecting if necessary.
	async fn ensure_ready(&self) -> Result<Peer<RoleClient>, GatewayError> {
		if let Some(client) = self.client.lock().await.as_ref() {
			return Ok(client.peer().clone());
		}

		if self.is_oauth_pending() {
			return Err(GatewayError::BackendUnavailable {
				backend: self.name.clone(),
				reason: "awaiting OAuth authentication".to_string(),
			});
		}

		// Backoff gate: fail fast while a recent failure is cooling down.
		{
			let backoff = self.backoff.lock().await;
			let now = Instant::now();
			if now < backoff.next_allowed {
				let remaining = backoff.next_allowed - now;
				return Err(GatewayError::BackendUnavailable {
					backend: self.name.clone(),
					reason: format!("reconnect backoff, retry in {} ms", remaining.as_millis()),
				});
			}
		}

		let _guard = self.connect_lock.lock().await;

		// Another caller may have connected while we waited.
		if let Some(client) = self.client.lock().await.as_ref() {
			return Ok(client.peer().clone());
		}

		*self.state.write() = SessionState::Connecting;

		let client = match timeout(CONNECT_TIMEOUT, self.connect()).await {
			Ok(Ok(client)) => client,
			Ok(Err(err)) => {
				self.note_connect_failure().await;
				return Err(err);
			},
			Err(_) => {
				self.note_connect_failure().await;
				return Err(GatewayError::BackendUnavailable {
					backend: self.name.clone(),
					reason: format!(
						"connect timed out after {} s",
						CONNECT_TIMEOUT.as_secs()
					),
				});
			},
		};

		let peer = client.peer().clone();

		// Cache the upstream tool surface for drift validation and status.
		match client.list_all_tools().await {
			Ok(tools) => {
				info!(
					target: "backend",
					backend = %self.name,
					tools = tools.len(),
					"backend session ready"
				);
				*self.tools.write() = tools;
				*self.state.write() = SessionState::Ready;
			},
			Err(err) => {
				warn!(
					target: "backend",
					backend = %self.name,
					error = %err,
					"connected but tools/list failed"
				);
				*self.state.write() = SessionState::Degraded;
			},
		}

		*self.client.lock().await = Some(client);

		let mut backoff = self.backoff.lock().await;
		backoff.consecutive_failures = 0;
		backoff.next_allowed = Instant::now();

		Ok(peer)
	}

	async fn connect(&self) -> Result<McpClient, GatewayError> {
		let handler = SessionClientHandler {
			progress: self.progress.clone(),
		};
		let unavailable = |reason: String| GatewayError::BackendUnavailable {
			backend: self.name.clone(),
			reason,
		};

		if let Some(stdio) = &self.def.stdio {
			info!(
				target: "backend",
				backend = %self.name,
				command = %stdio.command,
				"spawning stdio backend"
			);
			let cmd = build_stdio_command(stdio, &self.base_env);
			let transport = TokioChildProcess::new(cmd)
				.map_err(|e| unavailable(format!("failed to spawn: {e}")))?;
			return handler
				.serve(transport)
				.await
				.map_err(|e| unavailable(format!("handshake failed: {e}")));
		}

		let url = self
			.def
			.url
			.clone()
			.ok_or_else(|| unavailable("server has no stdio or url".to_string()))?;
		let token = self.oauth_token.read().clone();

		info!(target: "backend", backend = %self.name, url = %url, "connecting remote backend");

		match self.def.transport {
			Transport::Sse => {
				let transport = match token {
					Some(token) => SseClientTransport::start_with_client(
						bearer_client(&self.name, &token)?,
						SseClientConfig {
							sse_endpoint: url.into(),
							..Default::default()
						},
					)
					.await
					.map_err(|e| unavailable(format!("sse connect failed: {e}")))?,
					None => SseClientTransport::start(url)
						.await
						.map_err(|e| unavailable(format!("sse connect failed: {e}")))?,
				};
				handler
					.serve(transport)
					.await
					.map_err(|e| unavailable(format!("handshake failed: {e}")))
			},
			Transport::StreamableHttp => {
				let transport = match token {
					Some(token) => StreamableHttpClientTransport::with_client(
						bearer_client(&self.name, &token)?,
						StreamableHttpClientTransportConfig {
							uri: url.into(),
							..Default::default()
						},
					),
					None => StreamableHttpClientTransport::from_uri(url),
				};
				handler
					.serve(transport)
					.await
					.map_err(|e| unavailable(format!("handshake failed: {e}")))
			},
		}
	}

	async fn note_connect_failure(&self) {
		*self.state.write() = SessionState::Closed;
		let mut backoff = self.backoff.lock().await;
		backoff.consecutive_failures = backoff.consecutive_failures.saturating_add(1);
		let delay = backoff_delay(backoff.consecutive_failures);
		backoff.next_allowed = Instant::now() + delay;
		warn!(
			target: "backend",
			backend = %self.name,
			failures = backoff.consecutive_failures,
			delay_ms = delay.as_millis() as u64,
			"backend connect failed, backing off"
		);
	}

	async fn mark_closed(&self, reason: &str) {
		warn!(target: "backend", backend = %self.name, reason, "marking session closed");
		*self.state.write() = SessionState::Closed;
		// Dropping the client kills a stdio child (kill_on_drop)
		*self.client.lock().await = None;
		let mut backoff = self.backoff.lock().await;
		backoff.consecutive_failures = backoff.consecutive_failures.saturating_add(1);
		backoff.next_allowed = Instant::now() + backoff_delay(backoff.consecutive_failures);
	}
}

/// Exponential backoff with jitter: base 500 ms, factor 2, cap 30 s, ±10 %.
fn backoff_delay(consecutive_failures: u32) -> Duration {
	if consecutive_failures == 0 {
		return Duration::ZERO;
	}
	let exp = (consecutive_failures - 1).min(16);
	let base = BACKOFF_BASE.as_millis() as u64;
	let capped = base
		.saturating_mul(1u64 << exp)
		.min(BACKOFF_CAP.as_millis() as u64);
	let jitter = rand::thread_rng().gen_range(0.9..=1.1);
	Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Build the command for a stdio backend.
///
/// The child's environment is exactly `base_env` (the gateway environment
/// when `--pass-environment` is set, empty otherwise) plus the server's
/// own `env` map; nothing is inherited implicitly.
fn build_stdio_command(stdio: &StdioConfig, base_env: &HashMap<String, String>) -> Command {
	let mut cmd = Command::new(&stdio.command);
	cmd.args(&stdio.args);
	cmd.env_clear();
	cmd.envs(base_env);
	cmd.envs(&stdio.env);
	cmd
}

fn bearer_client(backend: &str, token: &str) -> Result<reqwest::Client, GatewayError> {
	let mut headers = reqwest::header::HeaderMap::new();
	let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(
		|e| GatewayError::BackendUnavailable {
			backend: backend.to_string(),
			reason: format!("invalid bearer token: {e}"),
		},
	)?;
	headers.insert(reqwest::header::AUTHORIZATION, value);
	reqwest::Client::builder()
		.default_headers(headers)
		.build()
		.map_err(|e| GatewayError::BackendUnavailable {
			backend: backend.to_string(),
			reason: format!("failed to build http client: {e}"),
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_backoff_grows_exponentially_and_caps() {
		let first = backoff_delay(1);
		assert!(first >= Duration::from_millis(450) && first <= Duration::from_millis(550));

		let third = backoff_delay(3);
		assert!(third >= Duration::from_millis(1800) && third <= Duration::from_millis(2200));

		let huge = backoff_delay(30);
		assert!(huge <= Duration::from_millis(33000));
		assert!(huge >= Duration::from_millis(27000));
	}

	#[test]
	fn test_backoff_zero_failures_is_immediate() {
		assert_eq!(backoff_delay(0), Duration::ZERO);
	}

	#[tokio::test]
	async fn test_stdio_child_does_not_inherit_gateway_environment() {
		// SAFETY: test-scoped variable name, no concurrent reader cares
		unsafe {
			std::env::set_var("GATEWAY_TEST_LEAKED_SECRET", "oops");
		}

		let stdio = StdioConfig {
			command: "/bin/sh".to_string(),
			args: vec![
				"-c".to_string(),
				"test -z \"$GATEWAY_TEST_LEAKED_SECRET\" && test \"$SERVER_ONLY\" = yes"
					.to_string(),
			],
			env: HashMap::from([("SERVER_ONLY".to_string(), "yes".to_string())]),
		};

		// Default case: empty base_env, so the child sees only the
		// server's own env map.
		let status = build_stdio_command(&stdio, &HashMap::new())
			.status()
			.await
			.unwrap();
		assert!(status.success());

		// SAFETY: see above
		unsafe {
			std::env::remove_var("GATEWAY_TEST_LEAKED_SECRET");
		}
	}

	#[tokio::test]
	async fn test_stdio_child_receives_base_env_when_passed() {
		let stdio = StdioConfig {
			command: "/bin/sh".to_string(),
			args: vec![
				"-c".to_string(),
				"test \"$FROM_GATEWAY\" = base".to_string(),
			],
			env: HashMap::new(),
		};
		let base_env = HashMap::from([("FROM_GATEWAY".to_string(), "base".to_string())]);

		let status = build_stdio_command(&stdio, &base_env)
			.status()
			.await
			.unwrap();
		assert!(status.success());
	}

	#[tokio::test]
	async fn test_oauth_session_fails_fast_until_token() {
		let def = crate::registry::ServerDef::remote("radar", "https://radar.example.com/mcp")
			.with_auth(crate::registry::AuthMode::Oauth);
		let session = BackendSession::new(
			"radar".to_string(),
			def,
			HashMap::new(),
			Duration::from_secs(30),
			Arc::new(ProgressRouter::new()),
		);

		assert!(session.is_oauth_pending());
		let err = session.ensure_ready().await.unwrap_err();
		assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
		assert!(err.to_string().contains("OAuth"));
	}

	#[tokio::test]
	async fn test_closed_session_fails_fast_within_backoff() {
		let def = crate::registry::ServerDef::stdio("s", "/nonexistent-command", vec![]);
		let session = BackendSession::new(
			"s".to_string(),
			def,
			HashMap::new(),
			Duration::from_secs(30),
			Arc::new(ProgressRouter::new()),
		);

		// First attempt actually tries (and fails) to spawn.
		let first = session.initialize().await.unwrap_err();
		assert!(matches!(first, GatewayError::BackendUnavailable { .. }));
		assert_eq!(session.state(), SessionState::Closed);

		// Second attempt hits the backoff gate without touching the spawn path.
		let second = session.initialize().await.unwrap_err();
		assert!(second.to_string().contains("backoff"));
	}
}
