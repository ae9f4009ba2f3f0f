use alloy::primitives::{Address, B256};

/// Rows per retrieval page. Pages are 1-indexed.
pub const PAGE_SIZE: usize = 100;

/// Structural predicate: a row matches when every set field matches.
/// An all-default filter matches everything.
#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub chain_id: Option<u64>,
    pub tx_hash: Option<B256>,
    pub block_hash: Option<B256>,
    pub address: Option<Address>,
    pub block_number: Option<u64>,
    pub confirmed: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct ReceiptFilter {
    pub chain_id: Option<u64>,
    pub tx_hash: Option<B256>,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct EthTxFilter {
    pub chain_id: Option<u64>,
    pub tx_hash: Option<B256>,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub confirmed: Option<bool>,
}
