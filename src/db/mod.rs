mod filters;
mod memory;
mod postgres;

pub use filters::{EthTxFilter, LogFilter, ReceiptFilter, PAGE_SIZE};
pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EthTxRecord, LogRecord, ReceiptRecord};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Pool error: {0}")]
    PoolError(#[from] deadpool_postgres::PoolError),

    #[error("Postgres error: {0}")]
    PostgresError(#[from] tokio_postgres::Error),

    #[error("Build error: {0}")]
    BuildError(#[from] deadpool_postgres::BuildError),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract for chain events. All stores are idempotent on their
/// unique keys: inserting an existing key is a silent no-op, so a failed
/// backfill range can always be retried wholesale.
///
/// Unique keys: log `(chain_id, tx_hash, log_index)`, receipt
/// `(chain_id, tx_hash)`, transaction `(tx_hash, chain_id)`, checkpoint
/// `(contract_address, chain_id)`.
#[async_trait]
pub trait EventDB: Send + Sync {
    async fn store_log(&self, log: &LogRecord, chain_id: u64) -> Result<(), DbError>;

    async fn store_receipt(&self, receipt: &ReceiptRecord, chain_id: u64) -> Result<(), DbError>;

    async fn store_eth_tx(&self, tx: &EthTxRecord) -> Result<(), DbError>;

    /// Logs matching every set filter field, ordered by block number then log
    /// index, one fixed-size 1-indexed page at a time.
    async fn retrieve_logs_with_filter(
        &self,
        filter: &LogFilter,
        page: usize,
    ) -> Result<Vec<LogRecord>, DbError>;

    /// Receipts matching the filter, with each receipt's logs re-attached by
    /// `(chain_id, tx_hash)` in log-index order.
    async fn retrieve_receipts_with_filter(
        &self,
        filter: &ReceiptFilter,
        page: usize,
    ) -> Result<Vec<ReceiptRecord>, DbError>;

    async fn retrieve_eth_txs_with_filter(
        &self,
        filter: &EthTxFilter,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError>;

    async fn retrieve_eth_txs_in_range(
        &self,
        filter: &EthTxFilter,
        start_block: u64,
        end_block: u64,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError>;

    /// Mark logs in the inclusive block range as finalized.
    async fn confirm_logs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError>;

    async fn confirm_eth_txs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError>;

    async fn confirm_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError>;

    /// Reorg cleanup: drop all logs stored under a block hash that is no
    /// longer canonical. Receipts and transactions for the same hash must be
    /// dropped alongside, or a later re-backfill silently keeps the stale
    /// rows (first write wins on conflict).
    async fn delete_logs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError>;

    async fn delete_receipts_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError>;

    async fn delete_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError>;

    /// Highest fully indexed block for the contract, 0 when the contract has
    /// never been checkpointed.
    async fn retrieve_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<u64, DbError>;

    /// Advance the checkpoint. Never moves it backwards.
    async fn store_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), DbError>;
}
