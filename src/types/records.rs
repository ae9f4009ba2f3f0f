use alloy::consensus::TxReceipt;
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::{Log, TransactionReceipt};

/// An inclusive block range, constructed per backfill call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A single event log as observed on chain. Unique per
/// `(chain_id, tx_hash, log_index)` once stored; the chain id travels
/// alongside the record through the store API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub block_hash: B256,
    pub log_index: u64,
    pub removed: bool,
}

impl From<Log> for LogRecord {
    fn from(log: Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
            tx_index: log.transaction_index.unwrap_or_default(),
            block_hash: log.block_hash.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            removed: log.removed,
        }
    }
}

/// The aggregate of all logs emitted by one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptRecord {
    pub tx_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub logs: Vec<LogRecord>,
}

impl From<TransactionReceipt> for ReceiptRecord {
    fn from(receipt: TransactionReceipt) -> Self {
        let logs = receipt
            .inner
            .logs()
            .iter()
            .cloned()
            .map(LogRecord::from)
            .collect();
        Self {
            tx_hash: receipt.transaction_hash,
            block_hash: receipt.block_hash.unwrap_or_default(),
            block_number: receipt.block_number.unwrap_or_default(),
            logs,
        }
    }
}

/// Transaction data as fetched from the chain, before it is bound to a
/// chain id and block position for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxData {
    pub hash: B256,
    pub raw: Bytes,
    pub gas_fee_cap: u128,
    pub gas_tip_cap: u128,
}

/// A stored transaction. Unique per `(tx_hash, chain_id)`; re-inserting an
/// existing key is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthTxRecord {
    pub tx_hash: B256,
    pub chain_id: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub raw: Bytes,
    pub gas_fee_cap: u128,
    pub gas_tip_cap: u128,
    pub confirmed: bool,
}
