mod api;
mod batch;
mod config;
mod provider;

use anyhow::Result;
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "nameserver-relay")]
#[command(about = "Streams batch Namecheap nameserver updates back to the caller")]
struct Args {
    /// Path to the configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Port to listen on, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logger init)
    let mut config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize logger with config log level (env var takes precedence)
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.server.log_level)
    ).init();

    match &args.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("No configuration file given, using defaults"),
    }
    info!(
        "Namecheap endpoint: {} ({} ms between domains)",
        config.namecheap.endpoint(),
        config.namecheap.request_delay_ms
    );

    // Create router
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let static_dir = config.server.static_dir.clone();
    let app = api::create_router(config)?;

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server running at http://{}", addr);
    info!("Update endpoint: POST /api/update-dns, static files from {}", static_dir);

    axum::serve(listener, app).await?;

    Ok(())
}
