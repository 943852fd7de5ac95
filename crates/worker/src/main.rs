use anyhow::{Context, Result};
use clap::Parser;
use ingest_core::{build_sink, BatchScheduler, Config, GenerationReport, SchedulerSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Patient generation worker - generates records and inserts them in batches")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.local.toml")]
    config: PathBuf,

    /// Sink mode: mock or http
    #[arg(long, default_value = "mock")]
    mode: String,

    /// Number of records to generate (overrides generation.default_count)
    #[arg(long)]
    count: Option<u64>,

    /// Base seed (overrides generation.seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum concurrent batches (overrides config and MAX_BATCH_CONCURRENCY)
    #[arg(long)]
    max_parallelism: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerResult {
    timestamp: String,
    mode: String,
    seed: Option<u64>,
    requested_count: u64,
    batch_size: u64,
    max_parallelism: usize,
    total_records: u64,
    batches: u64,
    duration_ms: u64,
    records_per_second: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(seed) = args.seed {
        config.generation.seed = Some(seed);
    }
    if let Some(n) = args.max_parallelism {
        config.generation.max_parallelism = n;
    }
    config.validate().context("Invalid configuration")?;

    let count = args.count.unwrap_or(config.generation.default_count);

    let sink = build_sink(&args.mode, &config.target).context("Failed to create sink")?;
    info!("Using sink: {}", sink.name());

    let settings = SchedulerSettings::from_config(&config);
    let scheduler = BatchScheduler::new(sink, settings.clone());

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let report = scheduler
        .run_with_cancel(count, cancel)
        .await
        .context("Generation failed")?;

    let result = WorkerResult {
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: args.mode.clone(),
        seed: settings.base_seed,
        requested_count: count,
        batch_size: settings.batch_size,
        max_parallelism: settings.max_parallelism,
        total_records: report.total_records,
        batches: report.batches,
        duration_ms: report.duration_ms,
        records_per_second: report.records_per_second,
    };

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let output_path = format!("results/generation_{}.json", timestamp);

    std::fs::create_dir_all("results").ok();
    let result_json = serde_json::to_string_pretty(&result)?;
    std::fs::write(&output_path, result_json)?;

    info!("Results written to {}", output_path);
    print_summary(&result, &report);

    Ok(())
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling generation");
            cancel.cancel();
        }
    });
}

fn print_summary(result: &WorkerResult, report: &GenerationReport) {
    println!("\n=== Generation Summary ===");
    println!("Mode: {}", result.mode);
    println!("Records: {}", report.total_records);
    println!("Batches: {}", report.batches);
    println!("Batch size: {}", result.batch_size);
    println!("Max parallelism: {}", result.max_parallelism);
    println!("Duration: {}ms", report.duration_ms);
    println!("Rate: {:.0} records/sec", report.records_per_second);
    println!();
}
