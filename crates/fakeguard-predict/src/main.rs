//! fakeguard predictor process
//!
//! Reads one product listing as JSON from stdin, writes one JSON result line
//! to stdout and always exits with status 0. Logs go to stderr.
//!
//! Usage: `fakeguard-predict [config.yaml] < request.json`

use fakeguard_core::PipelineConfig;
use fakeguard_predict::{catch_panics, serve_once, PredictResponse};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let response = catch_panics(async {
        match run().await {
            Ok(response) => response,
            Err(e) => PredictResponse::error(format!("{e:#}")),
        }
    })
    .await;

    // A closed stdout is not worth a crash status.
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", response.to_json_line()).and_then(|()| stdout.flush()) {
        tracing::warn!(error = %e, "Failed to write response");
    }
}

async fn run() -> anyhow::Result<PredictResponse> {
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;

    let config = load_pipeline_config()?;

    Ok(serve_once(&raw, &config).await)
}

/// Load configuration from the first CLI argument, then `FAKEGUARD_CONFIG`,
/// then defaults.
fn load_pipeline_config() -> anyhow::Result<PipelineConfig> {
    let config_path: Option<PathBuf> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FAKEGUARD_CONFIG").ok())
        .map(PathBuf::from);

    match config_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration from file");
            Ok(fakeguard_core::load_config(&path)?)
        }
        None => {
            tracing::debug!("No config file specified, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}
