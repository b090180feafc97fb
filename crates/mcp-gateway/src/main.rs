// mcp-gateway binary
//
// Exit codes: 0 clean shutdown, 1 registry load/validation error,
// 2 fatal I/O error during startup.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rmcp::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcp_gateway::backend::BackendManager;
use mcp_gateway::gateway::{self, McpGateway};
use mcp_gateway::registry::{ResolvedRegistry, load_registry_file};
use mcp_gateway::settings::{DefaultMergePolicy, GatewaySettings};

#[derive(Parser, Debug)]
#[command(
	name = "mcp-gateway",
	version,
	about = "MCP gateway: a curated virtual tool surface over upstream MCP servers"
)]
struct Args {
	/// Path to the registry JSON file
	#[arg(long, value_name = "FILE")]
	registry: PathBuf,

	/// Host to bind the HTTP transport on
	#[arg(long, default_value = "127.0.0.1")]
	host: String,

	/// Port for the HTTP transport
	#[arg(long, default_value_t = 8080)]
	port: u16,

	/// Serve MCP over stdio instead of HTTP
	#[arg(long)]
	stdio: bool,

	/// Stateless streamable-HTTP mode (no Mcp-Session-Id tracking)
	#[arg(long)]
	stateless: bool,

	/// Pass the gateway's environment to spawned stdio servers
	#[arg(long)]
	pass_environment: bool,

	/// Deadline for each upstream tools/call, in seconds
	#[arg(long, default_value_t = 30)]
	call_timeout_secs: u64,

	/// What to do when a client supplies a value for a locked argument
	#[arg(long, value_enum, default_value_t = DefaultMergePolicy::Override)]
	merge_policy: DefaultMergePolicy,

	/// Disable promotion of JSON found in text content blocks
	#[arg(long)]
	no_detect_json: bool,

	/// Log level when RUST_LOG is not set
	#[arg(long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();

	let registry = match load_registry_file(&args.registry).and_then(ResolvedRegistry::resolve) {
		Ok(resolved) => Arc::new(resolved),
		Err(err) => {
			error!("registry load failed: {err}");
			return ExitCode::from(1);
		},
	};
	info!(
		tools = registry.len(),
		servers = registry.servers().len(),
		"registry resolved"
	);

	let settings = GatewaySettings {
		bind_host: args.host.clone(),
		port: args.port,
		stateless: args.stateless,
		call_timeout: Duration::from_secs(args.call_timeout_secs),
		merge_policy: args.merge_policy,
		detect_json: !args.no_detect_json,
		pass_environment: args.pass_environment,
	};

	let backends = Arc::new(BackendManager::new(&registry, &settings));
	let outcomes = backends.start(&registry).await;

	let gateway = McpGateway::new(registry, backends, settings.clone());
	gateway.apply_validation(&outcomes);

	let served = if args.stdio {
		serve_stdio(gateway).await
	} else {
		serve_http(gateway, &settings).await
	};

	match served {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("fatal I/O error: {err}");
			ExitCode::from(2)
		},
	}
}

async fn serve_stdio(gateway: McpGateway) -> anyhow::Result<()> {
	info!("serving MCP gateway on stdio");
	let service = gateway.serve(rmcp::transport::stdio()).await?;
	service.waiting().await?;
	Ok(())
}

async fn serve_http(gateway: McpGateway, settings: &GatewaySettings) -> anyhow::Result<()> {
	let listener =
		tokio::net::TcpListener::bind((settings.bind_host.as_str(), settings.port)).await?;
	let bind = listener.local_addr()?;
	let (app, sse_ct) = gateway::http::router(gateway, bind, settings.stateless);
	info!("serving MCP gateway on http://{bind}/mcp (SSE at /sse)");
	let served = axum::serve(listener, app).await;
	sse_ct.cancel();
	served?;
	Ok(())
}
