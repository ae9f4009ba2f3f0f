//! In-memory chain and store doubles for backfill tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::db::{
    DbError, EthTxFilter, EventDB, LogFilter, MemoryEventStore, ReceiptFilter,
};
use crate::rpc::{ChainBackend, RpcError};
use crate::types::{EthTxRecord, LogRecord, ReceiptRecord, TxData};

/// Deterministic block hash for a mock height.
pub fn hash_of(n: u64) -> B256 {
    B256::from(U256::from(n))
}

struct MockBlock {
    timestamp: u64,
    hash: B256,
    logs: Vec<LogRecord>,
}

/// A fixed, fully materialized chain. Heights are vector indices, so block 0
/// always exists once a block has been added.
pub struct MockChain {
    chain_id: u64,
    blocks: Vec<MockBlock>,
    txs: HashMap<B256, TxData>,
    receipts: HashMap<B256, ReceiptRecord>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            blocks: Vec::new(),
            txs: HashMap::new(),
            receipts: HashMap::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Append a block at the next height and return that height.
    pub fn add_block(&mut self, timestamp: u64) -> u64 {
        let height = self.blocks.len() as u64;
        self.blocks.push(MockBlock {
            timestamp,
            hash: hash_of(height),
            logs: Vec::new(),
        });
        height
    }

    /// Mine a transaction into an existing block with `log_count` logs from
    /// `address`, returning its hash. Log indices are block scoped.
    pub fn add_tx_with_logs(&mut self, height: u64, address: Address, log_count: usize) -> B256 {
        let tx_hash = hash_of(1_000_000 + self.txs.len() as u64);
        let block = &mut self.blocks[height as usize];
        let base_index = block.logs.len() as u64;
        let tx_index = self
            .receipts
            .values()
            .filter(|r| r.block_number == height)
            .count() as u64;

        let mut logs = Vec::with_capacity(log_count);
        for offset in 0..log_count as u64 {
            logs.push(LogRecord {
                address,
                topics: vec![hash_of(0xfeed)],
                data: Bytes::from(tx_hash.to_vec()),
                block_number: height,
                tx_hash,
                tx_index,
                block_hash: block.hash,
                log_index: base_index + offset,
                removed: false,
            });
        }
        block.logs.extend(logs.iter().cloned());

        self.receipts.insert(
            tx_hash,
            ReceiptRecord {
                tx_hash,
                block_hash: block.hash,
                block_number: height,
                logs,
            },
        );
        self.txs.insert(
            tx_hash,
            TxData {
                hash: tx_hash,
                raw: Bytes::from(tx_hash.to_vec()),
                gas_fee_cap: 30,
                gas_tip_cap: 2,
            },
        );
        tx_hash
    }

    /// Drop the transaction body while keeping its receipt and logs, so
    /// fetching it behaves like an unknown hash.
    pub fn forget_tx(&mut self, tx_hash: B256) {
        self.txs.remove(&tx_hash);
    }
}

#[async_trait]
impl ChainBackend for MockChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        if self.blocks.is_empty() {
            return Err(RpcError::BlockNotFound(0));
        }
        Ok(self.blocks.len() as u64 - 1)
    }

    async fn block_time(&self, height: u64) -> Result<u64, RpcError> {
        self.blocks
            .get(height as usize)
            .map(|b| b.timestamp)
            .ok_or(RpcError::BlockNotFound(height))
    }

    async fn logs(
        &self,
        address: Address,
        start: u64,
        end: u64,
    ) -> Result<Vec<LogRecord>, RpcError> {
        let mut out = Vec::new();
        for height in start..=end {
            if let Some(block) = self.blocks.get(height as usize) {
                out.extend(block.logs.iter().filter(|l| l.address == address).cloned());
            }
        }
        Ok(out)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<TxData>, RpcError> {
        Ok(self.txs.get(&hash).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>, RpcError> {
        Ok(self.receipts.get(&hash).cloned())
    }
}

/// A store whose writes can be made to fail wholesale, for exercising the
/// no-checkpoint-on-failure path. Reads always pass through.
pub struct FailingStore {
    inner: MemoryEventStore,
    fail_writes: bool,
    checkpoint_calls: AtomicUsize,
}

impl FailingStore {
    pub fn new(fail_writes: bool) -> Self {
        Self {
            inner: MemoryEventStore::new(),
            fail_writes,
            checkpoint_calls: AtomicUsize::new(0),
        }
    }

    pub fn checkpoint_calls(&self) -> usize {
        self.checkpoint_calls.load(Ordering::SeqCst)
    }

    /// Seed a checkpoint directly, bypassing the failure gate and the call
    /// counter.
    pub async fn inner_checkpoint(&self, contract_address: Address, chain_id: u64, block: u64) {
        self.inner
            .store_last_indexed(contract_address, chain_id, block)
            .await
            .unwrap();
    }

    fn gate(&self) -> Result<(), DbError> {
        if self.fail_writes {
            Err(DbError::Unavailable("writes disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventDB for FailingStore {
    async fn store_log(&self, log: &LogRecord, chain_id: u64) -> Result<(), DbError> {
        self.gate()?;
        self.inner.store_log(log, chain_id).await
    }

    async fn store_receipt(&self, receipt: &ReceiptRecord, chain_id: u64) -> Result<(), DbError> {
        self.gate()?;
        self.inner.store_receipt(receipt, chain_id).await
    }

    async fn store_eth_tx(&self, tx: &EthTxRecord) -> Result<(), DbError> {
        self.gate()?;
        self.inner.store_eth_tx(tx).await
    }

    async fn retrieve_logs_with_filter(
        &self,
        filter: &LogFilter,
        page: usize,
    ) -> Result<Vec<LogRecord>, DbError> {
        self.inner.retrieve_logs_with_filter(filter, page).await
    }

    async fn retrieve_receipts_with_filter(
        &self,
        filter: &ReceiptFilter,
        page: usize,
    ) -> Result<Vec<ReceiptRecord>, DbError> {
        self.inner.retrieve_receipts_with_filter(filter, page).await
    }

    async fn retrieve_eth_txs_with_filter(
        &self,
        filter: &EthTxFilter,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        self.inner.retrieve_eth_txs_with_filter(filter, page).await
    }

    async fn retrieve_eth_txs_in_range(
        &self,
        filter: &EthTxFilter,
        start_block: u64,
        end_block: u64,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        self.inner
            .retrieve_eth_txs_in_range(filter, start_block, end_block, page)
            .await
    }

    async fn confirm_logs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .confirm_logs_in_range(start_block, end_block, chain_id)
            .await
    }

    async fn confirm_eth_txs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .confirm_eth_txs_in_range(start_block, end_block, chain_id)
            .await
    }

    async fn confirm_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .confirm_eth_txs_for_block_hash(block_hash, chain_id)
            .await
    }

    async fn delete_logs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .delete_logs_for_block_hash(block_hash, chain_id)
            .await
    }

    async fn delete_receipts_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .delete_receipts_for_block_hash(block_hash, chain_id)
            .await
    }

    async fn delete_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.gate()?;
        self.inner
            .delete_eth_txs_for_block_hash(block_hash, chain_id)
            .await
    }

    async fn retrieve_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<u64, DbError> {
        self.inner
            .retrieve_last_indexed(contract_address, chain_id)
            .await
    }

    async fn store_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), DbError> {
        self.checkpoint_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;
        self.inner
            .store_last_indexed(contract_address, chain_id, block_number)
            .await
    }
}
