// In-flight progress forwarding
//
// Upstream servers emit notifications/progress correlated by the progress
// token the caller supplied. The gateway registers the token together with
// the downstream peer before dispatching, the backend client handler looks
// the token up here, and the entry is removed when the call resolves.

use std::collections::HashMap;

use parking_lot::Mutex;
use rmcp::model::{ProgressNotificationParam, ProgressToken};
use rmcp::service::{Peer, RoleServer};
use tracing::debug;

/// Routes upstream progress notifications to the originating client
#[derive(Default)]
pub struct ProgressRouter {
	inflight: Mutex<HashMap<String, Peer<RoleServer>>>,
}

fn token_key(token: &ProgressToken) -> String {
	serde_json::to_string(token).unwrap_or_default()
}

impl ProgressRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an in-flight request's progress token
	pub fn register(&self, token: &ProgressToken, peer: Peer<RoleServer>) {
		self.inflight.lock().insert(token_key(token), peer);
	}

	/// Remove a token once its request has resolved
	pub fn unregister(&self, token: &ProgressToken) {
		self.inflight.lock().remove(&token_key(token));
	}

	/// Forward an upstream progress notification to the registered client
	pub async fn forward(&self, params: ProgressNotificationParam) {
		let peer = {
			let inflight = self.inflight.lock();
			inflight.get(&token_key(&params.progress_token)).cloned()
		};
		match peer {
			Some(peer) => {
				let _ = peer.notify_progress(params).await;
			},
			None => {
				debug!(
					target: "backend",
					"dropping progress notification with no in-flight request"
				);
			},
		}
	}

}
