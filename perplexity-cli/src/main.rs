//! perplexity-mcp: MCP server for Perplexity search, reasoning and deep research.
//!
//! Serves over stdio (default) or HTTP, and ships an `ask` client for smoke
//! testing a running HTTP server.

mod ask;

use anyhow::Context;
use clap::Parser;
use perplexity_core::config::TransportMode;
use perplexity_core::{PerplexityApi, PerplexityClient, load_config};
use perplexity_mcp::McpServer;
use perplexity_mcp::tools::{ToolRegistry, register_perplexity_tools};
use perplexity_mcp::transport::StdioTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Perplexity MCP server
#[derive(Parser, Debug)]
#[command(name = "perplexity-mcp", version, about, long_about = None)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long)]
    mode: Option<String>,

    /// Listen address for http mode (e.g. 0.0.0.0:8080)
    #[arg(long)]
    listen: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ask a question through a running HTTP server
    Ask {
        /// Question to ask
        #[arg(short, long)]
        question: String,

        /// Server URL
        #[arg(short, long, default_value = ask::DEFAULT_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.quiet);

    if let Some(Commands::Ask { question, url }) = &cli.command {
        return ask::run(url, question).await;
    }

    let mut config = load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(mode) = &cli.mode {
        config.server.mode = mode
            .parse::<TransportMode>()
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    }
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen_addr(listen);
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let api_key = config
        .api
        .resolve_api_key()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let api: Arc<dyn PerplexityApi> =
        Arc::new(PerplexityClient::from_config(&config.api, api_key));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let mut registry = ToolRegistry::new();
    register_perplexity_tools(&mut registry, api, config.research.clone())
        .context("failed to register tools")?;
    let server = Arc::new(McpServer::new(Arc::new(registry)));

    info!(
        mode = %config.server.mode,
        version = env!("CARGO_PKG_VERSION"),
        "Starting perplexity-mcp"
    );
    match config.server.mode {
        TransportMode::Stdio => {
            let mut transport = StdioTransport::new();
            server.run(&mut transport, &shutdown).await?;
        }
        TransportMode::Http => {
            perplexity_mcp::http::serve(server, &config.server.listen_addr, shutdown).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Accept the port-only form `:8080` as shorthand for all interfaces.
fn listen_addr(raw: String) -> String {
    if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
        shutdown.cancel();
    });
}

/// Stderr for humans, a daily rolling JSON file for the record.
///
/// Nothing goes to stdout: in stdio mode it carries the protocol.
fn init_tracing(verbose: u8, quiet: bool) -> Option<WorkerGuard> {
    let filter = match (verbose, quiet) {
        (0, true) => EnvFilter::new("error"),
        (0, false) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        (1, _) => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    let log_dir = directories::ProjectDirs::from("ai", "perplexity", "perplexity-mcp")
        .map(|dirs| dirs.data_dir().join("logs"));
    let Some(log_dir) = log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(&log_dir, "perplexity-mcp.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Some(guard)
}
