//! oceanlb: command line front end for load balancer configurations.
//!
//! - `validate` parses a configuration document and prints the typed form
//! - `expand` prints the create request the document turns into
//! - `dry-run` reconciles against an in-memory control plane and prints the
//!   state record a real pass would produce

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oceanlb::codec;
use oceanlb::{
    ActionPoller, InMemoryControlPlane, LoadBalancerConfig, LoadBalancerReconciler,
    LoadBalancerRecord, Reconciler, WaiterConfig,
};

/// oceanlb load balancer reconciler
#[derive(Parser, Debug)]
#[command(name = "oceanlb", version, about)]
struct Args {
    /// Seconds to wait for provisioning actions to finish
    #[arg(long, default_value = "60", global = true)]
    wait_timeout: u64,

    /// Seconds between action status polls
    #[arg(long, default_value = "3", global = true)]
    poll_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration document and print the typed configuration
    Validate {
        /// Path to the JSON configuration document
        file: PathBuf,
    },

    /// Print the create request a configuration document expands to
    Expand {
        /// Path to the JSON configuration document
        file: PathBuf,
    },

    /// Reconcile against an in-memory control plane and print the resulting state record
    DryRun {
        /// Path to the JSON configuration document
        file: PathBuf,

        /// State record from a previous pass
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oceanlb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let waiter_config = WaiterConfig {
        timeout: Duration::from_secs(args.wait_timeout),
        poll_interval: Duration::from_secs(args.poll_interval),
    };

    match args.command {
        Command::Validate { file } => {
            let config = load_config(&file)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Expand { file } => {
            let config = load_config(&file)?;
            let request = codec::expand_create_request(&config)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        Command::DryRun { file, state } => {
            let config = load_config(&file)?;
            let prior = match state {
                Some(path) => load_record(&path)?,
                None => LoadBalancerRecord::absent(),
            };

            let plane = Arc::new(InMemoryControlPlane::new());
            if let (Some(id), Some(observed)) = (prior.id(), prior.state.as_ref()) {
                plane.restore(id, observed).await;
            }

            let reconciler = LoadBalancerReconciler::new(
                Arc::clone(&plane),
                ActionPoller::new(Arc::clone(&plane), waiter_config),
            );
            let record = reconciler.reconcile(&prior, &config).await?;
            info!(calls = plane.calls().await.len(), "Dry run finished");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<LoadBalancerConfig> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    LoadBalancerConfig::from_json(&input)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

fn load_record(path: &Path) -> Result<LoadBalancerRecord> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&input).with_context(|| format!("Invalid state record in {}", path.display()))
}
