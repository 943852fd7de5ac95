use anyhow::{Context, Result};
use clap::Parser;
use ingest_core::{build_sink, BatchScheduler, Config, SchedulerSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

mod routes;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "HTTP trigger for patient generation jobs")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.local.toml")]
    config: PathBuf,

    /// Sink mode: mock or http
    #[arg(long, default_value = "mock")]
    mode: String,

    /// Bind address (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let sink = build_sink(&args.mode, &config.target).context("Failed to create sink")?;
    let settings = SchedulerSettings::from_config(&config);
    info!(
        "Using sink '{}' with batch_size={} max_parallelism={}",
        sink.name(),
        settings.batch_size,
        settings.max_parallelism
    );

    let state = routes::AppState::new(BatchScheduler::new(sink, settings));
    let app = routes::router(state);

    let bind = args.bind.unwrap_or(config.server.bind);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;

    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
