use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft::agent::openai::ResponsesRunner;
use weft::api::{AppState, create_router};
use weft::attachments::AttachmentService;
use weft::config::{StoreMode, WeftConfig};
use weft::server::ChatServer;
use weft::store::{MemoryStore, SqliteStore, ThreadStore};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Weft - chat thread persistence and tool-output orchestration service",
    propagate_version = true
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Bind host override
    #[arg(long)]
    host: Option<String>,
    /// Bind port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(cli.config.as_deref(), args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("weft=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let mut config = WeftConfig::load(config_path)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let store: Arc<dyn ThreadStore> = match config.store {
        StoreMode::Memory => Arc::new(MemoryStore::new()),
        StoreMode::Sqlite => {
            let path = config.sqlite_path();
            Arc::new(
                SqliteStore::open(&path)
                    .await
                    .with_context(|| format!("opening sqlite store at {}", path.display()))?,
            )
        }
    };

    let upload_dir = config.upload_dir();
    std::fs::create_dir_all(&upload_dir)
        .with_context(|| format!("creating upload dir {}", upload_dir.display()))?;

    let attachments = Arc::new(AttachmentService::new(
        store.clone(),
        upload_dir,
        config.public_base_url(),
    ));
    let runner = Arc::new(ResponsesRunner::new(
        config.api_base_url.clone(),
        config.api_key.clone(),
    ));
    let server = Arc::new(ChatServer::new(
        store.clone(),
        runner,
        attachments.clone(),
        config.model.clone(),
        config.instructions.clone(),
        config.tool_output_style(),
    ));

    let config = Arc::new(config);
    let state = AppState {
        server,
        store,
        attachments,
        config: config.clone(),
    };
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parsing bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, store = %config.store, model = %config.model, "weft listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
