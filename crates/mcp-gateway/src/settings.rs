// Runtime settings

use std::time::Duration;

use clap::ValueEnum;

/// What happens when a client supplies a value for a hidden-and-defaulted
/// ("locked") argument.
///
/// Defaults to `Override`: the registry default silently wins, which is the
/// safe choice when defaults carry injected secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DefaultMergePolicy {
	/// The registry default overwrites the client value
	#[default]
	Override,
	/// The client value is honored
	ClientWins,
	/// The call is rejected
	Reject,
}

/// Gateway runtime settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
	/// Bind host for the HTTP transport
	pub bind_host: String,
	/// Bind port for the HTTP transport
	pub port: u16,
	/// Stateless streamable-HTTP mode (no Mcp-Session-Id tracking)
	pub stateless: bool,
	/// Deadline for each upstream tools/call
	pub call_timeout: Duration,
	/// Collision policy for locked arguments
	pub merge_policy: DefaultMergePolicy,
	/// Promote JSON found in text content blocks to structuredContent
	pub detect_json: bool,
	/// Pass the gateway's own environment to spawned stdio servers
	pub pass_environment: bool,
}

impl Default for GatewaySettings {
	fn default() -> Self {
		Self {
			bind_host: "127.0.0.1".to_string(),
			port: 8080,
			stateless: false,
			call_timeout: Duration::from_secs(30),
			merge_policy: DefaultMergePolicy::default(),
			detect_json: true,
			pass_environment: false,
		}
	}
}
