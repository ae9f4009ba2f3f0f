mod chain;
mod contract;
mod fetch;
mod range;

#[cfg(test)]
pub(crate) mod testutil;

pub use chain::ChainBackfiller;
pub use contract::ContractBackfiller;
pub use fetch::{block_times_in_range, logs_in_range};
pub use range::{make_range, RangeError, RangeFetchResult, RangeIterator};

use thiserror::Error;

use crate::db::DbError;
use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("backfill cancelled")]
    Cancelled,

    #[error("failed to store {count} item(s) in range [{start}, {end}]: {detail}")]
    StoreFailures {
        count: usize,
        start: u64,
        end: u64,
        detail: String,
    },

    #[error("{failed} of {total} contract backfills failed: {detail}")]
    ContractFailures {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl BackfillError {
    /// True when the error carries a cancellation, directly or from a joined
    /// sub-task.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackfillError::Cancelled)
    }
}
