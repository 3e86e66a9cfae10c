use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice_core::impls::SimulatedTransport;
use sluice_core::{CallResponse, ExternalServiceClient, QueueStats, SluiceConfig};

const INSTRUCTION: &str = "Rewrite the following text in a friendly, concise tone.";

/// Fire a burst of completion calls at a simulated flaky provider and print
/// what the queue and retry loop made of it.
#[derive(Debug, Parser)]
#[command(name = "sluice", version)]
struct Args {
    /// TOML config file (`[queue]`, `[retry]`, `[client]`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of concurrent calls to fire.
    #[arg(long, default_value_t = 20)]
    requests: usize,

    /// Probability that a simulated call fails with a transient fault.
    #[arg(long, default_value_t = 0.3)]
    fail_rate: f64,

    /// Simulated provider latency per call.
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    requests: usize,
    succeeded: usize,
    failed: usize,
    healthy: bool,
    stats: QueueStats,
    failures: Vec<CallResponse>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("sluice: error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.fail_rate),
        "--fail-rate must be within 0..=1, got {}",
        args.fail_rate
    );

    // (A) 設定: ファイル -> 環境変数の順に上書き
    let config = match &args.config {
        Some(path) => SluiceConfig::load(path)
            .with_context(|| format!("Cannot load config: {}", path.display()))?,
        None => SluiceConfig::default(),
    };
    let config = config
        .apply_env()
        .context("Invalid SLUICE_* environment override")?;

    // (B) client を用意（transport は擬似サービス）
    let transport = SimulatedTransport::new(Duration::from_millis(args.latency_ms), args.fail_rate);
    let client = Arc::new(
        ExternalServiceClient::new(transport, &config).context("Invalid client config")?,
    );

    if !client.test_connection().await {
        warn!("connection test failed, sending the burst anyway");
    }

    // (C) 同時に requests 件投げる
    info!(
        requests = args.requests,
        max_concurrent = config.queue.max_concurrent,
        max_queue_size = config.queue.max_queue_size,
        "sending burst"
    );
    let mut handles = Vec::with_capacity(args.requests);
    for i in 0..args.requests {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let text = format!("request {i}: pls fix this txt, it is kinda messy");
            let result = client.call(INSTRUCTION, &text, None).await;
            CallResponse::from(result.map(|completion| completion.text))
        }));
    }

    let mut responses = Vec::with_capacity(handles.len());
    for handle in handles {
        responses.push(handle.await.context("call task panicked")?);
    }

    // (D) 結果を JSON で出力
    let succeeded = responses.iter().filter(|r| r.success).count();
    let report = Report {
        requests: args.requests,
        succeeded,
        failed: responses.len() - succeeded,
        healthy: client.is_healthy(),
        stats: client.stats(),
        failures: responses.into_iter().filter(|r| !r.success).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
