//! The persisted start block document.
//!
//! Shaped `{ "network_start_block": { "<network>": <height> } }`. Any other key, and the
//! heights of networks we do not touch, are carried through untouched.
use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use backoff::backoff::Backoff;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub const NETWORK_START_BLOCK_KEY: &str = "network_start_block";

#[derive(Debug, Error)]
pub enum StartBlocksError {
    #[error("failed to load start block config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
    #[error("failed to persist start block config {} after {attempts} attempts", path.display())]
    Persist {
        path: PathBuf,
        attempts: usize,
        #[source]
        source: io::Error,
    },
}

/// How often, and how far apart, a failed write of the document is tried again.
#[derive(Clone, Debug)]
pub struct WriteRetryPolicy {
    pub retries: usize,
    pub delay: Duration,
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Constant delay, gives up after a fixed number of retries.
struct LimitedRetries {
    delay: Duration,
    max_retries: usize,
    retries: usize,
}

impl From<&WriteRetryPolicy> for LimitedRetries {
    fn from(policy: &WriteRetryPolicy) -> Self {
        Self {
            delay: policy.delay,
            max_retries: policy.retries,
            retries: 0,
        }
    }
}

impl Backoff for LimitedRetries {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            None
        } else {
            self.retries += 1;
            Some(self.delay)
        }
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut backup = OsString::from(path.as_os_str());
    backup.push(".old");
    PathBuf::from(backup)
}

/// Writes to a temporary file next to `path` then renames it over `path`, readers never see a
/// half written document.
fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;

    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartBlockConfig {
    path: PathBuf,
    document: Map<String, Value>,
}

impl StartBlockConfig {
    pub fn load(path: &Path) -> Result<Self, StartBlocksError> {
        let text = fs::read_to_string(path).map_err(|err| StartBlocksError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, StartBlocksError> {
        let invalid = |reason: String| StartBlocksError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let mut document = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(document)) => document,
            Ok(_) => return Err(invalid("expected a JSON object".to_string())),
            Err(err) => return Err(invalid(err.to_string())),
        };

        match document.get(NETWORK_START_BLOCK_KEY) {
            None => {
                debug!("no {NETWORK_START_BLOCK_KEY} in config, starting from an empty map");
                document.insert(
                    NETWORK_START_BLOCK_KEY.to_string(),
                    Value::Object(Map::new()),
                );
            }
            Some(Value::Object(_)) => (),
            Some(_) => {
                return Err(invalid(format!(
                    "expected {NETWORK_START_BLOCK_KEY} to be an object"
                )))
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_blocks(&self) -> Option<&Map<String, Value>> {
        self.document
            .get(NETWORK_START_BLOCK_KEY)
            .and_then(Value::as_object)
    }

    /// Network name and stored value for every recorded network.
    pub fn entries(&self) -> Vec<(&str, &Value)> {
        self.start_blocks()
            .map(|start_blocks| {
                start_blocks
                    .iter()
                    .map(|(network, value)| (network.as_str(), value))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, network: &str) -> Option<u64> {
        self.start_blocks()
            .and_then(|start_blocks| start_blocks.get(network))
            .and_then(Value::as_u64)
    }

    /// Records `height` for `network`, returning the height it replaces if there was one.
    pub fn set(&mut self, network: &str, height: u64) -> Option<u64> {
        let previous = self.get(network);
        let start_blocks = self
            .document
            .entry(NETWORK_START_BLOCK_KEY)
            .or_insert_with(|| Value::Object(Map::new()));

        if let Value::Object(start_blocks) = start_blocks {
            start_blocks.insert(network.to_string(), Value::from(height));
        }

        previous
    }

    pub fn to_json_pretty(&self) -> String {
        // A map of strings to JSON values always serializes.
        serde_json::to_string_pretty(&self.document).unwrap_or_default()
    }

    /// Copies the document as it is on disk to `<path>.old`.
    pub fn backup(&self) -> io::Result<PathBuf> {
        let backup = backup_path(&self.path);
        fs::copy(&self.path, &backup)?;
        Ok(backup)
    }

    pub async fn persist(&self, policy: &WriteRetryPolicy) -> Result<(), StartBlocksError> {
        let contents = self.to_json_pretty();
        let attempts = AtomicUsize::new(0);

        backoff::future::retry(LimitedRetries::from(policy), || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            write_atomically(&self.path, &contents).map_err(|err| {
                warn!(%err, attempt, path = %self.path.display(), "failed to write start block config");
                backoff::Error::transient(err)
            })
        })
        .await
        .map_err(|source| StartBlocksError::Persist {
            path: self.path.clone(),
            attempts: attempts.load(Ordering::SeqCst),
            source,
        })
    }
}
