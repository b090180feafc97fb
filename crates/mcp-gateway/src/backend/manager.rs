// Backend session manager
//
// Owns one session per distinct upstream connection. Server definitions
// with identical connection fingerprints share a session; every registry
// server name still routes, via the name table, to its (possibly shared)
// session. Startup eagerly connects everything that does not wait on
// OAuth, then runs schema-drift validation over the cached tool lists.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::registry::{ResolvedRegistry, ValidationOutcome, validate_backend_tools};
use crate::settings::GatewaySettings;

use super::fingerprint::{BackendKey, fingerprint};
use super::progress::ProgressRouter;
use super::session::{BackendSession, SessionState};

/// Session table keyed by connection fingerprint
pub struct BackendManager {
	sessions: HashMap<BackendKey, Arc<BackendSession>>,
	by_name: HashMap<String, BackendKey>,
	progress: Arc<ProgressRouter>,
}

/// One row of the /status backend report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
	pub name: String,
	pub state: SessionState,
	pub tools: usize,
}

impl BackendManager {
	pub fn new(registry: &ResolvedRegistry, settings: &GatewaySettings) -> Self {
		let progress = Arc::new(ProgressRouter::new());
		let base_env: HashMap<String, String> = if settings.pass_environment {
			std::env::vars().collect()
		} else {
			HashMap::new()
		};

		let mut sessions: HashMap<BackendKey, Arc<BackendSession>> = HashMap::new();
		let mut by_name = HashMap::new();

		for server in registry.servers() {
			let key = fingerprint(server);
			match sessions.get(&key) {
				Some(existing) => {
					info!(
						target: "backend",
						server = %server.name,
						shares_with = %existing.name(),
						"identical backend definition, sharing session"
					);
				},
				None => {
					sessions.insert(
						key.clone(),
						Arc::new(BackendSession::new(
							server.name.clone(),
							server.clone(),
							base_env.clone(),
							settings.call_timeout,
							progress.clone(),
						)),
					);
				},
			}
			by_name.insert(server.name.clone(), key);
		}

		Self {
			sessions,
			by_name,
			progress,
		}
	}

	/// The shared progress router used by every session's client handler
	pub fn progress(&self) -> Arc<ProgressRouter> {
		self.progress.clone()
	}

	/// Session serving the given registry server name
	pub fn session_for(&self, server_name: &str) -> Option<Arc<BackendSession>> {
		self.by_name
			.get(server_name)
			.and_then(|key| self.sessions.get(key))
			.cloned()
	}

	/// Session whose definition points at the given URL (OAuth connect path)
	pub fn find_by_url(&self, url: &str) -> Option<Arc<BackendSession>> {
		self.sessions
			.values()
			.find(|s| s.definition().url.as_deref() == Some(url))
			.cloned()
	}

	/// Number of distinct sessions after deduplication
	pub fn session_count(&self) -> usize {
		self.sessions.len()
	}

	/// Eagerly connect all non-OAuth sessions, then validate pinned schemas.
	///
	/// A backend that fails to connect is logged and left to on-demand
	/// reconnection; startup continues.
	pub async fn start(&self, registry: &ResolvedRegistry) -> Vec<ValidationOutcome> {
		let eager: Vec<Arc<BackendSession>> = self
			.sessions
			.values()
			.filter(|s| !s.is_oauth_pending())
			.cloned()
			.collect();

		futures::future::join_all(eager.into_iter().map(|session| async move {
			if let Err(err) = session.initialize().await {
				warn!(
					target: "backend",
					backend = %session.name(),
					error = %err,
					"backend failed to initialize, will retry on demand"
				);
			}
		}))
		.await;

		let mut outcomes = Vec::new();
		for server in registry.servers() {
			outcomes.extend(self.validate_backend(registry, &server.name));
		}
		outcomes
	}

	/// Schema-drift validation for one backend's pinned tools.
	///
	/// No-op unless the session is Ready with a cached tool list; OAuth
	/// backends therefore validate when their token arrives.
	pub fn validate_backend(
		&self,
		registry: &ResolvedRegistry,
		server_name: &str,
	) -> Vec<ValidationOutcome> {
		let Some(session) = self.session_for(server_name) else {
			return Vec::new();
		};
		if session.state() != SessionState::Ready {
			return Vec::new();
		}
		let expected = registry.tools_for_backend(server_name);
		validate_backend_tools(server_name, &expected, &session.cached_tools())
	}

	/// Per-server status rows, in registry order
	pub fn statuses(&self, registry: &ResolvedRegistry) -> Vec<BackendStatus> {
		registry
			.servers()
			.iter()
			.filter_map(|server| {
				let session = self.session_for(&server.name)?;
				Some(BackendStatus {
					name: server.name.clone(),
					state: session.state(),
					tools: session.tool_count(),
				})
			})
			.collect()
	}
}
