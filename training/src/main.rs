//! CLI entry point for the fakeguard training pipeline.
//!
//! Subcommands:
//!   build  -- Extract image + metadata features for every sample in the dataset
//!   split  -- Partition X/y into reproducible train and test sets
//!   train  -- Fit the random forest on the train partition and persist it

use anyhow::Context;
use clap::{Parser, Subcommand};
use fakeguard_core::PipelineConfig;
use fakeguard_ml::FeaturePipeline;
use fakeguard_training::training::dataset::{build_dataset, load_samples};
use fakeguard_training::training::split::run_split;
use fakeguard_training::training::store::FeatureStore;
use fakeguard_training::training::trainer::{self, TrainConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fakeguard-train", about = "Counterfeit classifier training pipeline")]
struct Cli {
    /// YAML configuration file (falls back to FAKEGUARD_CONFIG, then defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and store feature vectors for every sample.
    Build {
        /// JSON array of samples.
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Output directory for feature files.
        #[arg(long)]
        feature_dir: Option<PathBuf>,
    },

    /// Split X/y into train and test partitions.
    Split {
        /// Directory containing X.safetensors and y.safetensors.
        #[arg(long)]
        feature_dir: Option<PathBuf>,

        /// Fraction of rows assigned to the test partition.
        #[arg(long)]
        test_fraction: Option<f64>,

        /// Shuffle seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Preserve class ratios in both partitions.
        #[arg(long)]
        stratify: bool,
    },

    /// Fit the random forest on the train partition.
    Train {
        /// Directory containing X_train.safetensors and y_train.safetensors.
        #[arg(long)]
        feature_dir: Option<PathBuf>,

        /// Output path for the fitted model.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of trees.
        #[arg(long)]
        n_estimators: Option<usize>,

        /// Random seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Also print the report on the test partition.
        #[arg(long)]
        holdout: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_pipeline_config(cli.config)?;

    match cli.command {
        Command::Build {
            dataset,
            feature_dir,
        } => {
            let dataset = dataset.unwrap_or(config.paths.dataset.clone());
            let store = FeatureStore::new(feature_dir.unwrap_or(config.paths.feature_dir.clone()));

            let samples = load_samples(&dataset)?;
            println!("Loaded {} samples from {}", samples.len(), dataset.display());

            let pipeline = FeaturePipeline::from_config(&config)
                .await
                .context("Failed to load embedding models")?;
            build_dataset(&samples, &pipeline, &store).await?;
        }

        Command::Split {
            feature_dir,
            test_fraction,
            seed,
            stratify,
        } => {
            if let Some(f) = test_fraction {
                config.split.test_fraction = f;
            }
            if let Some(s) = seed {
                config.split.seed = s;
            }
            config.split.stratify |= stratify;
            config.validate()?;

            let store = FeatureStore::new(feature_dir.unwrap_or(config.paths.feature_dir.clone()));
            run_split(&store, &config.split)?;
        }

        Command::Train {
            feature_dir,
            output,
            n_estimators,
            seed,
            holdout,
        } => {
            if let Some(n) = n_estimators {
                config.forest.n_estimators = n;
            }
            if let Some(s) = seed {
                config.forest.seed = s;
            }
            config.validate()?;

            let store = FeatureStore::new(feature_dir.unwrap_or(config.paths.feature_dir.clone()));
            let train_config = TrainConfig {
                forest: config.forest.clone(),
                output_path: output.unwrap_or(config.paths.model.clone()),
                holdout,
            };
            trainer::train(&store, &train_config)?;
        }
    }

    Ok(())
}

/// Resolve configuration from `--config`, then `FAKEGUARD_CONFIG`, then
/// defaults.
fn load_pipeline_config(flag: Option<PathBuf>) -> anyhow::Result<PipelineConfig> {
    let path = flag.or_else(|| std::env::var("FAKEGUARD_CONFIG").ok().map(PathBuf::from));
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration from file");
            fakeguard_core::load_config(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => {
            tracing::info!("No config file specified, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}
