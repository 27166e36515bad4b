//! Finds the block closest to a target time by binary searching heights, the only ordering a
//! ledger lets us query.
//!
//! The search runs over `[1, head]`, genesis is never considered. When no block matches the
//! target exactly the result is the lower bound the search converged on: the first height whose
//! timestamp is at or past the target. This is not necessarily the nearer neighbour, and when the
//! target lies beyond the head it is `head + 1`, a block that does not exist yet. Downstream
//! indexers depend on exactly these heights, keep it that way.
use thiserror::Error;
use tracing::debug;

use crate::ledger::{BlockHeight, FetchError, LedgerSource, UnixTimestamp};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("failed to get head height")]
    HeadHeight(#[source] FetchError),
    #[error("failed to get timestamp of block {height}")]
    BlockTimestamp {
        height: BlockHeight,
        #[source]
        source: FetchError,
    },
    /// Every block up to a head of `BlockHeight::MAX` is older than the target, the boundary
    /// height past it has no representation.
    #[error("target is past head {head_height}, the highest height there is")]
    PastLastHeight { head_height: BlockHeight },
}

impl LocateError {
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            LocateError::HeadHeight(source) => Some(source),
            LocateError::BlockTimestamp { source, .. } => Some(source),
            LocateError::PastLastHeight { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub height: BlockHeight,
    /// A probed block carried exactly the target timestamp.
    pub exact_match: bool,
    pub head_height: BlockHeight,
}

impl SearchResult {
    /// The target lies after every block up to the head we saw.
    pub fn is_past_head(&self) -> bool {
        self.height > self.head_height
    }
}

pub async fn find_closest_block<S>(
    source: &S,
    target: UnixTimestamp,
) -> Result<SearchResult, LocateError>
where
    S: LedgerSource + ?Sized,
{
    let head_height = source
        .get_head_height()
        .await
        .map_err(LocateError::HeadHeight)?;

    let mut low: BlockHeight = 1;
    let mut high = head_height;

    while low <= high {
        // Same as (low + high) / 2 without the overflow.
        let mid = low + (high - low) / 2;

        let timestamp = source
            .get_block_timestamp(mid)
            .await
            .map_err(|source| LocateError::BlockTimestamp {
                height: mid,
                source,
            })?;

        debug!(%low, %high, %mid, %timestamp, %target, "probed block");

        if timestamp == target {
            return Ok(SearchResult {
                height: mid,
                exact_match: true,
                head_height,
            });
        }

        if timestamp < target {
            low = mid
                .checked_add(1)
                .ok_or(LocateError::PastLastHeight { head_height })?;
        } else {
            // mid >= low >= 1, cannot underflow.
            high = mid - 1;
        }
    }

    Ok(SearchResult {
        height: low,
        exact_match: false,
        head_height,
    })
}
