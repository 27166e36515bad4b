pub mod env;
mod json_codecs;
pub mod ledger;
pub mod locator;
pub mod log;
pub mod networks;
mod performance;
pub mod start_blocks;
mod sync;

pub use ledger::{BlockHeight, ClientOptions, FetchError, LedgerSource, UnixTimestamp};
pub use locator::{find_closest_block, LocateError, SearchResult};
pub use networks::{AdapterRegistry, NetworkDefinition, NetworkFamily, NetworkRecord};
pub use start_blocks::{StartBlockConfig, StartBlocksError, WriteRetryPolicy};
pub use sync::{
    run, update_start_blocks, NetworkOutcome, NetworkReport, RunOptions, RunSummary, SyncOptions,
    DEFAULT_TARGET_TIMESTAMP,
};
