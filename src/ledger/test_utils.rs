use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{BlockHeight, FetchError, LedgerSource, UnixTimestamp};

/// In-memory ledger where `timestamps[0]` belongs to height 1. Counts timestamp fetches.
pub struct FixtureLedger {
    timestamps: Vec<UnixTimestamp>,
    failing_height: Option<BlockHeight>,
    timestamp_fetches: AtomicUsize,
}

impl FixtureLedger {
    pub fn new(timestamps: Vec<UnixTimestamp>) -> Self {
        Self {
            timestamps,
            failing_height: None,
            timestamp_fetches: AtomicUsize::new(0),
        }
    }

    /// Heights `1..=head` with `timestamp(h) = start + step * h`.
    pub fn linear(head: BlockHeight, start: UnixTimestamp, step: UnixTimestamp) -> Self {
        let timestamps = (1..=head)
            .map(|height| start + step * height as UnixTimestamp)
            .collect();
        Self::new(timestamps)
    }

    pub fn failing_at(mut self, height: BlockHeight) -> Self {
        self.failing_height = Some(height);
        self
    }

    pub fn timestamp_fetches(&self) -> usize {
        self.timestamp_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerSource for FixtureLedger {
    async fn check_connectivity(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn get_head_height(&self) -> Result<BlockHeight, FetchError> {
        Ok(self.timestamps.len() as BlockHeight)
    }

    async fn get_block_timestamp(&self, height: BlockHeight) -> Result<UnixTimestamp, FetchError> {
        self.timestamp_fetches.fetch_add(1, Ordering::SeqCst);

        if self.failing_height == Some(height) {
            return Err(FetchError::Connectivity("connection reset".to_string()));
        }

        usize::try_from(height)
            .ok()
            .and_then(|height| height.checked_sub(1))
            .and_then(|index| self.timestamps.get(index))
            .copied()
            .ok_or(FetchError::NotFound(height))
    }
}
