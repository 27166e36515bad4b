//! Runs the search for every network and records the results in the start block config.
//!
//! A network failing, for whatever reason, only costs that network its update. Only failing to
//! read the config or failing to write it back ends the run.
use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    ledger::{BlockHeight, ClientOptions, FetchError, UnixTimestamp},
    locator::{find_closest_block, LocateError},
    networks::{
        default_network_definitions, load_network_definitions, resolve_endpoints,
        AdapterRegistry, NetworkRecord,
    },
    start_blocks::{StartBlockConfig, WriteRetryPolicy},
};

/// 2024-06-01T00:00:00Z
pub const DEFAULT_TARGET_TIMESTAMP: UnixTimestamp = 1_717_200_000;

#[derive(Debug, Error)]
enum NetworkError {
    #[error("failed to connect")]
    Connectivity(#[source] FetchError),
    #[error("failed to find closest block")]
    Locate(#[from] LocateError),
    #[error("failed to get details of closest block {height}")]
    ClosestBlock {
        height: BlockHeight,
        #[source]
        source: FetchError,
    },
    #[error("closest block {0} does not fit in the start block config")]
    HeightOutOfRange(BlockHeight),
    #[error("gave up after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkOutcome {
    Updated {
        height: u64,
        previous: Option<u64>,
        block_timestamp: UnixTimestamp,
        exact_match: bool,
    },
    Failed {
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkReport {
    pub network: String,
    pub outcome: NetworkOutcome,
}

impl NetworkReport {
    pub fn is_updated(&self) -> bool {
        matches!(self.outcome, NetworkOutcome::Updated { .. })
    }
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub target_timestamp: UnixTimestamp,
    /// Bounds all requests for one network together.
    pub search_timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            target_timestamp: DEFAULT_TARGET_TIMESTAMP,
            search_timeout: None,
        }
    }
}

struct ClosestBlock {
    height: u64,
    block_timestamp: UnixTimestamp,
    exact_match: bool,
}

fn format_timestamp(timestamp: UnixTimestamp) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map_or_else(|| timestamp.to_string(), |date_time| date_time.to_rfc3339())
}

async fn find_start_block(
    registry: &AdapterRegistry,
    network: &NetworkRecord,
    target: UnixTimestamp,
) -> Result<ClosestBlock, NetworkError> {
    let source = registry
        .connect(network)
        .map_err(NetworkError::Connectivity)?;

    source
        .check_connectivity()
        .await
        .map_err(NetworkError::Connectivity)?;

    let result = find_closest_block(&*source, target).await?;

    if result.is_past_head() {
        warn!(
            network = %network.name,
            head = %result.head_height,
            "target is past the head of the chain"
        );
    }

    // Also confirms the block exists, the search may settle one past the head.
    let block_timestamp = source
        .get_block_timestamp(result.height)
        .await
        .map_err(|source| NetworkError::ClosestBlock {
            height: result.height,
            source,
        })?;

    let height =
        u64::try_from(result.height).map_err(|_| NetworkError::HeightOutOfRange(result.height))?;

    Ok(ClosestBlock {
        height,
        block_timestamp,
        exact_match: result.exact_match,
    })
}

async fn find_start_block_within(
    registry: &AdapterRegistry,
    network: &NetworkRecord,
    options: &SyncOptions,
) -> Result<ClosestBlock, NetworkError> {
    let search = find_start_block(registry, network, options.target_timestamp);
    match options.search_timeout {
        Some(limit) => tokio::time::timeout(limit, search)
            .await
            .unwrap_or(Err(NetworkError::Timeout(limit))),
        None => search.await,
    }
}

/// Searches each network in turn, recording every found start block in `config`. Failed
/// networks keep whatever entry they had.
pub async fn update_start_blocks(
    networks: &[NetworkRecord],
    registry: &AdapterRegistry,
    config: &mut StartBlockConfig,
    options: &SyncOptions,
) -> Vec<NetworkReport> {
    let mut reports = Vec::with_capacity(networks.len());

    for network in networks {
        info!(network = %network.name, family = %network.family, "finding start block");

        let outcome = match find_start_block_within(registry, network, options).await {
            Ok(closest) => {
                info!(
                    network = %network.name,
                    height = closest.height,
                    block_time = %format_timestamp(closest.block_timestamp),
                    difference_secs = %(closest.block_timestamp - options.target_timestamp),
                    exact_match = closest.exact_match,
                    "found closest block"
                );

                let previous = config.set(&network.name, closest.height);
                info!(
                    network = %network.name,
                    height = closest.height,
                    ?previous,
                    "updated start block"
                );

                NetworkOutcome::Updated {
                    height: closest.height,
                    previous,
                    block_timestamp: closest.block_timestamp,
                    exact_match: closest.exact_match,
                }
            }
            Err(err) => {
                let reason = format!("{:#}", anyhow::Error::from(err));
                error!(network = %network.name, %reason, "skipping network");
                NetworkOutcome::Failed { reason }
            }
        };

        reports.push(NetworkReport {
            network: network.name.clone(),
            outcome,
        });
    }

    reports
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// JSON list of network definitions, the built-in table when absent.
    pub networks_path: Option<PathBuf>,
    /// Restricts the run to these network names, all networks when empty.
    pub only_networks: Vec<String>,
    pub client: ClientOptions,
    pub sync: SyncOptions,
    pub write_retry: WriteRetryPolicy,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.json"),
            networks_path: None,
            only_networks: vec![],
            client: ClientOptions::default(),
            sync: SyncOptions::default(),
            write_retry: WriteRetryPolicy::default(),
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub reports: Vec<NetworkReport>,
    pub persisted: bool,
}

impl RunSummary {
    pub fn updated(&self) -> impl Iterator<Item = &NetworkReport> {
        self.reports.iter().filter(|report| report.is_updated())
    }

    pub fn failed(&self) -> impl Iterator<Item = &NetworkReport> {
        self.reports.iter().filter(|report| !report.is_updated())
    }
}

fn select_networks(networks: Vec<NetworkRecord>, only: &[String]) -> Vec<NetworkRecord> {
    if only.is_empty() {
        return networks;
    }

    for name in only {
        if !networks.iter().any(|network| &network.name == name) {
            warn!(network = %name, "requested network is not configured, ignoring");
        }
    }

    networks
        .into_iter()
        .filter(|network| only.contains(&network.name))
        .collect()
}

pub async fn run(options: &RunOptions) -> Result<RunSummary> {
    let mut config = StartBlockConfig::load(&options.config_path)?;

    for (network, start_block) in config.entries() {
        info!(%network, %start_block, "start block from config");
    }

    if !options.dry_run {
        let backup = config
            .backup()
            .with_context(|| format!("failed to back up {}", options.config_path.display()))?;
        info!(backup = %backup.display(), "backed up start block config");
    }

    let definitions = match &options.networks_path {
        Some(path) => load_network_definitions(path)?,
        None => default_network_definitions(),
    };
    let networks = select_networks(resolve_endpoints(&definitions), &options.only_networks);
    let registry = AdapterRegistry::with_default_adapters(options.client.clone());

    let reports = update_start_blocks(&networks, &registry, &mut config, &options.sync).await;

    let summary = RunSummary {
        reports,
        persisted: !options.dry_run,
    };

    info!(
        updated = summary.updated().count(),
        failed = summary.failed().count(),
        "done finding start blocks"
    );

    if options.dry_run {
        info!("dry run, leaving start block config untouched");
    } else {
        config.persist(&options.write_retry).await?;
        info!(path = %config.path().display(), "start block config updated successfully");
    }

    Ok(summary)
}
