// Backend fingerprints
//
// Two server definitions that describe the same connection collapse onto a
// single session. The fingerprint is a stable hash over the canonicalized
// connection-relevant fields: `{command, args, env}` for stdio servers,
// `{url, transport, auth}` for remote ones. Names and descriptions do not
// participate.

use std::collections::BTreeMap;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::registry::ServerDef;

/// Stable identity of one upstream connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey(String);

impl BackendKey {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for BackendKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// Short prefix is plenty for logs
		f.write_str(&self.0[..12.min(self.0.len())])
	}
}

/// Compute the canonical fingerprint of a server definition
pub fn fingerprint(server: &ServerDef) -> BackendKey {
	let canonical = match (&server.stdio, &server.url) {
		(Some(stdio), _) => {
			let env: BTreeMap<&String, &String> = stdio.env.iter().collect();
			json!({
				"stdio": {
					"command": stdio.command,
					"args": stdio.args,
					"env": env,
				}
			})
		},
		(None, Some(url)) => json!({
			"url": url,
			"transport": server.transport,
			"auth": server.auth,
		}),
		// Rejected during resolution; hash the name so the key is still unique
		(None, None) => json!({"invalid": server.name}),
	};

	let serialized = serde_json::to_string(&canonical).expect("canonical value serializes");
	let mut hasher = Sha256::new();
	hasher.update(serialized.as_bytes());
	BackendKey(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use crate::registry::{AuthMode, ServerDef, StdioConfig, Transport};

	use super::*;

	fn stdio_server(name: &str, command: &str, args: &[&str]) -> ServerDef {
		ServerDef::stdio(name, command, args.iter().map(|s| s.to_string()).collect())
	}

	#[test]
	fn test_identical_stdio_servers_share_a_key() {
		let a = stdio_server("first", "uvx", &["mcp-server-fetch"]);
		let b = stdio_server("second", "uvx", &["mcp-server-fetch"]);
		assert_eq!(fingerprint(&a), fingerprint(&b));
	}

	#[test]
	fn test_different_args_differ() {
		let a = stdio_server("s", "uvx", &["mcp-server-fetch"]);
		let b = stdio_server("s", "uvx", &["mcp-server-time"]);
		assert_ne!(fingerprint(&a), fingerprint(&b));
	}

	#[test]
	fn test_env_is_order_independent() {
		let mut a = stdio_server("s", "run", &[]);
		let mut b = stdio_server("s", "run", &[]);

		let mut env_a = HashMap::new();
		env_a.insert("A".to_string(), "1".to_string());
		env_a.insert("B".to_string(), "2".to_string());
		let mut env_b = HashMap::new();
		env_b.insert("B".to_string(), "2".to_string());
		env_b.insert("A".to_string(), "1".to_string());

		a.stdio = Some(StdioConfig {
			command: "run".to_string(),
			args: vec![],
			env: env_a,
		});
		b.stdio = Some(StdioConfig {
			command: "run".to_string(),
			args: vec![],
			env: env_b,
		});

		assert_eq!(fingerprint(&a), fingerprint(&b));
	}

	#[test]
	fn test_remote_servers_compare_url_transport_auth() {
		let a = ServerDef::remote("x", "https://example.com/mcp");
		let b = ServerDef::remote("y", "https://example.com/mcp");
		assert_eq!(fingerprint(&a), fingerprint(&b));

		let mut c = ServerDef::remote("z", "https://example.com/mcp");
		c.transport = Transport::Sse;
		assert_ne!(fingerprint(&a), fingerprint(&c));

		let d = ServerDef::remote("w", "https://example.com/mcp").with_auth(AuthMode::Oauth);
		assert_ne!(fingerprint(&a), fingerprint(&d));
	}

	#[test]
	fn test_name_and_description_do_not_participate() {
		let a = stdio_server("alpha", "run", &[]).with_description("one");
		let b = stdio_server("beta", "run", &[]).with_description("two");
		assert_eq!(fingerprint(&a), fingerprint(&b));
	}
}
