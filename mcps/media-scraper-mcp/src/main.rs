//! Media Scraper MCP Server
//!
//! `media-scraper-mcp` speaks MCP over stdio; `media-scraper-mcp serve`
//! runs the HTTP front door for the hosted UI. Both drive the same
//! dispatcher.

use clap::{Parser, Subcommand};
use mcp_common::{init_tracing, LogTarget};
use rmcp::{transport::stdio, ServiceExt};

use media_scraper_mcp::config::Config;
use media_scraper_mcp::http::{self, AppState};
use media_scraper_mcp::MediaScraperMcpServer;

#[derive(Parser)]
#[command(name = "media-scraper-mcp")]
#[command(about = "Multi-source media search and download server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Storage root for downloaded files
    #[arg(long, env = "MEDIA_SCRAPER_STORAGE", global = true)]
    storage: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP over stdio (default)
    Mcp,
    /// Serve the HTTP API and the storage directory
    Serve {
        /// Port to listen on (default: from config or 3100)
        #[arg(long, short, env = "SCRAPER_PORT")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Mcp);

    let target = match command {
        Command::Mcp => LogTarget::Stdio,
        Command::Serve { .. } => LogTarget::Console,
    };
    init_tracing("media_scraper_mcp", target)?;

    let mut config = Config::load()?;
    if let Some(root) = cli.storage {
        config.storage.root = root;
    }

    match command {
        Command::Mcp => run_mcp(config).await,
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_http(config).await
        }
    }
}

async fn run_mcp(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Media Scraper MCP Server");

    let server = MediaScraperMcpServer::new(&config)?;
    let dispatcher = server.dispatcher().clone();
    let service = server.serve(stdio()).await?;

    tracing::info!("Server running, waiting for requests...");
    service.waiting().await?;

    tracing::info!("Server shutting down");
    if let Err(e) = dispatcher.session().close().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }
    Ok(())
}

async fn run_http(config: Config) -> anyhow::Result<()> {
    let server = MediaScraperMcpServer::new(&config)?;
    let dispatcher = server.dispatcher().clone();
    let state = AppState::new(dispatcher.clone(), config.server.port, config.public_base_url());

    http::serve(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await?;

    tracing::info!("Server shutting down");
    if let Err(e) = dispatcher.session().close().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }
    Ok(())
}
