use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use start_block_sync::{
    log, ClientOptions, NetworkOutcome, RunOptions, SyncOptions, UnixTimestamp,
    WriteRetryPolicy, DEFAULT_TARGET_TIMESTAMP,
};

/// Finds, for every configured network, the first block at or after a target time and records it
/// as the network's start block.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Start block config to update.
    #[clap(long, default_value = "config.json")]
    config: PathBuf,

    /// Unix timestamp, in seconds, to find the closest block for.
    #[clap(long, default_value_t = DEFAULT_TARGET_TIMESTAMP, allow_negative_numbers = true)]
    target_timestamp: UnixTimestamp,

    /// JSON list of networks to use instead of the built-in table.
    #[clap(long)]
    networks: Option<PathBuf>,

    /// Only update this network, may be repeated.
    #[clap(long = "network")]
    only_networks: Vec<String>,

    /// Timeout for a single request to a node or gateway.
    #[clap(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// Give up on a network when finding its start block takes longer than this.
    #[clap(long)]
    search_timeout_secs: Option<u64>,

    /// How often to retry writing the config before giving up.
    #[clap(long, default_value_t = 3)]
    write_retries: usize,

    #[clap(long, default_value_t = 1000)]
    write_retry_delay_ms: u64,

    /// Find start blocks but leave the config untouched.
    #[clap(long)]
    dry_run: bool,
}

impl From<Cli> for RunOptions {
    fn from(cli: Cli) -> Self {
        RunOptions {
            config_path: cli.config,
            networks_path: cli.networks,
            only_networks: cli.only_networks,
            client: ClientOptions {
                request_timeout: Duration::from_secs(cli.request_timeout_secs),
            },
            sync: SyncOptions {
                target_timestamp: cli.target_timestamp,
                search_timeout: cli.search_timeout_secs.map(Duration::from_secs),
            },
            write_retry: WriteRetryPolicy {
                retries: cli.write_retries,
                delay: Duration::from_millis(cli.write_retry_delay_ms),
            },
            dry_run: cli.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    log::init();

    let options = RunOptions::from(Cli::parse());

    info!(
        target_timestamp = %options.sync.target_timestamp,
        config = %options.config_path.display(),
        "updating start blocks"
    );

    let summary = start_block_sync::run(&options).await?;

    for report in &summary.reports {
        match &report.outcome {
            NetworkOutcome::Updated { height, .. } => {
                info!(network = %report.network, height, "start block recorded")
            }
            NetworkOutcome::Failed { reason } => {
                error!(network = %report.network, %reason, "no start block recorded")
            }
        }
    }

    Ok(())
}
