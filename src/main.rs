use clap::Parser;
use stashsync::{sync_dataset, CancelToken, RetryPolicy, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stashsync")]
#[command(about = "Synchronize a local directory with a versioned Dryad dataset", long_about = None)]
#[command(version)]
struct Args {
    /// DOI of the dataset to synchronize
    #[arg(short, long, default_value = "10.5061/dryad.dncjsxm85")]
    doi: String,

    /// Root of the manifest API
    #[arg(long, default_value = "https://datadryad.org")]
    api_base: String,

    /// Destination directory (must already exist)
    #[arg(short = 'o', long, default_value = "data")]
    data_dir: PathBuf,

    /// Maximum transfer attempts per file
    #[arg(long, default_value_t = 8)]
    max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("stashsync={}", log_level))
        .init();

    info!("🚀 StashSync - Dryad Dataset Downloader");
    info!("Dataset: {}", args.doi);
    info!("Destination: {:?}", args.data_dir);

    // Precondition: the destination directory must exist and be resolvable.
    if !args.data_dir.is_dir() {
        eprintln!(
            "Error: destination directory {:?} does not exist. Create it and re-run from the repository root.",
            args.data_dir
        );
        std::process::exit(1);
    }

    let config = SyncConfig {
        api_base: args.api_base,
        dataset_doi: args.doi,
        data_dir: args.data_dir,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            base_delay: Duration::from_millis(args.base_delay_ms),
            ..RetryPolicy::default()
        },
    };

    let cancel = CancelToken::shared();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing current write and stopping");
                cancel.cancel();
            }
        });
    }

    match sync_dataset(&config, &cancel).await {
        Ok(report) if report.cancelled => {
            eprintln!("Interrupted; partial files kept for resume.");
            std::process::exit(130);
        }
        Ok(report) if report.is_success() => {
            info!(
                "✅ Download complete. See data files in {:?}",
                config.data_dir
            );
            for (path, err) in &report.extraction_failures {
                warn!("Extraction of {} failed: {}", path, err);
            }
            Ok(())
        }
        Ok(report) => {
            for (path, err) in &report.failed {
                eprintln!("❌ {}: {}", path, err);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
