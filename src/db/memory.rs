use std::collections::{BTreeMap, HashMap};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::filters::{EthTxFilter, LogFilter, ReceiptFilter, PAGE_SIZE};
use crate::db::{DbError, EventDB};
use crate::types::{EthTxRecord, LogRecord, ReceiptRecord};

#[derive(Debug, Clone)]
struct StoredLog {
    record: LogRecord,
    confirmed: bool,
}

#[derive(Debug, Clone)]
struct StoredReceipt {
    tx_hash: B256,
    block_hash: B256,
    block_number: u64,
}

#[derive(Default)]
struct Inner {
    /// (chain_id, tx_hash, log_index) -> log
    logs: BTreeMap<(u64, B256, u64), StoredLog>,
    /// (chain_id, tx_hash) -> receipt metadata; logs are re-attached on read
    receipts: BTreeMap<(u64, B256), StoredReceipt>,
    /// (tx_hash, chain_id) -> transaction
    txs: BTreeMap<(B256, u64), EthTxRecord>,
    /// (contract_address, chain_id) -> checkpoint
    last_indexed: HashMap<(Address, u64), u64>,
}

/// In-memory [`EventDB`] with the same unique-key and no-op-on-conflict
/// semantics as the postgres adapter. Backs the test suites and local runs.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, page: usize) -> Vec<T> {
    let page = page.max(1);
    items
        .into_iter()
        .skip((page - 1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect()
}

impl Inner {
    fn logs_for_tx(&self, chain_id: u64, tx_hash: B256) -> Vec<LogRecord> {
        let mut logs: Vec<LogRecord> = self
            .logs
            .range((chain_id, tx_hash, 0)..=(chain_id, tx_hash, u64::MAX))
            .map(|(_, stored)| stored.record.clone())
            .collect();
        logs.sort_by_key(|log| log.log_index);
        logs
    }
}

#[async_trait]
impl EventDB for MemoryEventStore {
    async fn store_log(&self, log: &LogRecord, chain_id: u64) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner
            .logs
            .entry((chain_id, log.tx_hash, log.log_index))
            .or_insert_with(|| StoredLog {
                record: log.clone(),
                confirmed: false,
            });
        Ok(())
    }

    async fn store_receipt(&self, receipt: &ReceiptRecord, chain_id: u64) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner
            .receipts
            .entry((chain_id, receipt.tx_hash))
            .or_insert_with(|| StoredReceipt {
                tx_hash: receipt.tx_hash,
                block_hash: receipt.block_hash,
                block_number: receipt.block_number,
            });
        Ok(())
    }

    async fn store_eth_tx(&self, tx: &EthTxRecord) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner
            .txs
            .entry((tx.tx_hash, tx.chain_id))
            .or_insert_with(|| tx.clone());
        Ok(())
    }

    async fn retrieve_logs_with_filter(
        &self,
        filter: &LogFilter,
        page: usize,
    ) -> Result<Vec<LogRecord>, DbError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<LogRecord> = inner
            .logs
            .iter()
            .filter(|((chain_id, _, _), stored)| {
                filter.chain_id.is_none_or(|want| want == *chain_id)
                    && filter.tx_hash.is_none_or(|want| want == stored.record.tx_hash)
                    && filter.block_hash.is_none_or(|want| want == stored.record.block_hash)
                    && filter.address.is_none_or(|want| want == stored.record.address)
                    && filter
                        .block_number
                        .is_none_or(|want| want == stored.record.block_number)
                    && filter.confirmed.is_none_or(|want| want == stored.confirmed)
            })
            .map(|(_, stored)| stored.record.clone())
            .collect();
        matched.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(paginate(matched, page))
    }

    async fn retrieve_receipts_with_filter(
        &self,
        filter: &ReceiptFilter,
        page: usize,
    ) -> Result<Vec<ReceiptRecord>, DbError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<ReceiptRecord> = inner
            .receipts
            .iter()
            .filter(|((chain_id, _), stored)| {
                filter.chain_id.is_none_or(|want| want == *chain_id)
                    && filter.tx_hash.is_none_or(|want| want == stored.tx_hash)
                    && filter.block_hash.is_none_or(|want| want == stored.block_hash)
                    && filter.block_number.is_none_or(|want| want == stored.block_number)
            })
            .map(|((chain_id, _), stored)| ReceiptRecord {
                tx_hash: stored.tx_hash,
                block_hash: stored.block_hash,
                block_number: stored.block_number,
                logs: inner.logs_for_tx(*chain_id, stored.tx_hash),
            })
            .collect();
        matched.sort_by_key(|receipt| receipt.block_number);
        Ok(paginate(matched, page))
    }

    async fn retrieve_eth_txs_with_filter(
        &self,
        filter: &EthTxFilter,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<EthTxRecord> = inner
            .txs
            .values()
            .filter(|tx| tx_matches(filter, tx))
            .cloned()
            .collect();
        matched.sort_by_key(|tx| tx.block_number);
        Ok(paginate(matched, page))
    }

    async fn retrieve_eth_txs_in_range(
        &self,
        filter: &EthTxFilter,
        start_block: u64,
        end_block: u64,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<EthTxRecord> = inner
            .txs
            .values()
            .filter(|tx| {
                tx_matches(filter, tx)
                    && tx.block_number >= start_block
                    && tx.block_number <= end_block
            })
            .cloned()
            .collect();
        matched.sort_by_key(|tx| tx.block_number);
        Ok(paginate(matched, page))
    }

    async fn confirm_logs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        for ((log_chain, _, _), stored) in inner.logs.iter_mut() {
            if *log_chain == chain_id
                && stored.record.block_number >= start_block
                && stored.record.block_number <= end_block
            {
                stored.confirmed = true;
            }
        }
        Ok(())
    }

    async fn confirm_eth_txs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        for ((_, tx_chain), tx) in inner.txs.iter_mut() {
            if *tx_chain == chain_id
                && tx.block_number >= start_block
                && tx.block_number <= end_block
            {
                tx.confirmed = true;
            }
        }
        Ok(())
    }

    async fn confirm_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        for ((_, tx_chain), tx) in inner.txs.iter_mut() {
            if *tx_chain == chain_id && tx.block_hash == block_hash {
                tx.confirmed = true;
            }
        }
        Ok(())
    }

    async fn delete_logs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.logs.retain(|(log_chain, _, _), stored| {
            !(*log_chain == chain_id && stored.record.block_hash == block_hash)
        });
        Ok(())
    }

    async fn delete_receipts_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.receipts.retain(|(receipt_chain, _), stored| {
            !(*receipt_chain == chain_id && stored.block_hash == block_hash)
        });
        Ok(())
    }

    async fn delete_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner
            .txs
            .retain(|(_, tx_chain), tx| !(*tx_chain == chain_id && tx.block_hash == block_hash));
        Ok(())
    }

    async fn retrieve_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<u64, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .last_indexed
            .get(&(contract_address, chain_id))
            .copied()
            .unwrap_or(0))
    }

    async fn store_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .last_indexed
            .entry((contract_address, chain_id))
            .or_insert(0);
        // Checkpoints never move backwards.
        if block_number > *entry {
            *entry = block_number;
        }
        Ok(())
    }
}

fn tx_matches(filter: &EthTxFilter, tx: &EthTxRecord) -> bool {
    filter.chain_id.is_none_or(|want| want == tx.chain_id)
        && filter.tx_hash.is_none_or(|want| want == tx.tx_hash)
        && filter.block_hash.is_none_or(|want| want == tx.block_hash)
        && filter.block_number.is_none_or(|want| want == tx.block_number)
        && filter.confirmed.is_none_or(|want| want == tx.confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, U256};

    fn hash_of(n: u64) -> B256 {
        B256::from(U256::from(n))
    }

    fn make_log(tx_hash: B256, block_number: u64, log_index: u64) -> LogRecord {
        LogRecord {
            address: address!("00000000000000000000000000000000000000aa"),
            topics: vec![hash_of(0xEE)],
            data: Bytes::from(vec![1, 2, 3]),
            block_number,
            tx_hash,
            tx_index: 0,
            block_hash: hash_of(block_number + 500),
            log_index,
            removed: false,
        }
    }

    #[tokio::test]
    async fn store_and_retrieve_log_by_tx_hash() {
        let store = MemoryEventStore::new();
        let tx_a = hash_of(1);
        let tx_c = hash_of(2);

        let log_a = make_log(tx_a, 1, 0);
        store.store_log(&log_a, 7).await.unwrap();
        let log_b = make_log(tx_a, 2, 1);
        store.store_log(&log_b, 7).await.unwrap();
        let log_c = make_log(tx_c, 3, 2);
        store.store_log(&log_c, 8).await.unwrap();

        let filter = LogFilter {
            chain_id: Some(7),
            tx_hash: Some(tx_a),
            ..Default::default()
        };
        let retrieved = store.retrieve_logs_with_filter(&filter, 1).await.unwrap();
        assert_eq!(retrieved, vec![log_a, log_b]);

        let filter = LogFilter {
            chain_id: Some(8),
            tx_hash: Some(tx_c),
            ..Default::default()
        };
        let retrieved = store.retrieve_logs_with_filter(&filter, 1).await.unwrap();
        assert_eq!(retrieved, vec![log_c]);
    }

    #[tokio::test]
    async fn duplicate_log_insert_is_a_noop() {
        let store = MemoryEventStore::new();
        let tx = hash_of(1);
        let log = make_log(tx, 1, 0);
        store.store_log(&log, 7).await.unwrap();

        let mut mutated = log.clone();
        mutated.data = Bytes::from(vec![9]);
        store.store_log(&mutated, 7).await.unwrap();

        let retrieved = store
            .retrieve_logs_with_filter(&LogFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(retrieved.len(), 1);
        // First write wins.
        assert_eq!(retrieved[0].data, log.data);
    }

    #[tokio::test]
    async fn confirm_logs_in_range_marks_only_the_range() {
        let store = MemoryEventStore::new();
        for i in 0..5u64 {
            let log = make_log(hash_of(100 + i), i, i);
            store.store_log(&log, 7).await.unwrap();
        }

        store.confirm_logs_in_range(0, 1, 7).await.unwrap();

        let filter = LogFilter {
            chain_id: Some(7),
            confirmed: Some(true),
            ..Default::default()
        };
        let confirmed = store.retrieve_logs_with_filter(&filter, 1).await.unwrap();
        assert_eq!(confirmed.len(), 2);
        assert_eq!(confirmed[0].block_number, 0);
        assert_eq!(confirmed[1].block_number, 1);
    }

    #[tokio::test]
    async fn delete_logs_for_block_hash_removes_rows() {
        let store = MemoryEventStore::new();
        let log = make_log(hash_of(1), 5, 0);
        store.store_log(&log, 7).await.unwrap();

        let filter = LogFilter {
            chain_id: Some(7),
            block_hash: Some(log.block_hash),
            ..Default::default()
        };
        assert_eq!(
            store
                .retrieve_logs_with_filter(&filter, 1)
                .await
                .unwrap()
                .len(),
            1
        );

        store
            .delete_logs_for_block_hash(log.block_hash, 7)
            .await
            .unwrap();
        assert!(store
            .retrieve_logs_with_filter(&filter, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn receipts_reattach_logs_in_index_order() {
        let store = MemoryEventStore::new();
        let tx = hash_of(1);
        store.store_log(&make_log(tx, 4, 1), 7).await.unwrap();
        store.store_log(&make_log(tx, 4, 0), 7).await.unwrap();
        let receipt = ReceiptRecord {
            tx_hash: tx,
            block_hash: hash_of(504),
            block_number: 4,
            logs: vec![],
        };
        store.store_receipt(&receipt, 7).await.unwrap();

        let retrieved = store
            .retrieve_receipts_with_filter(&ReceiptFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].logs.len(), 2);
        assert_eq!(retrieved[0].logs[0].log_index, 0);
        assert_eq!(retrieved[0].logs[1].log_index, 1);
    }

    #[tokio::test]
    async fn reorg_repair_replaces_receipts_under_the_canonical_hash() {
        let store = MemoryEventStore::new();
        let tx = hash_of(1);
        let stale_hash = hash_of(900);
        let canonical_hash = hash_of(901);

        let mut log = make_log(tx, 5, 0);
        log.block_hash = stale_hash;
        store.store_log(&log, 7).await.unwrap();
        let receipt = ReceiptRecord {
            tx_hash: tx,
            block_hash: stale_hash,
            block_number: 5,
            logs: vec![],
        };
        store.store_receipt(&receipt, 7).await.unwrap();

        // Reorg repair drops every row under the stale hash before the
        // range is re-backfilled.
        store.delete_logs_for_block_hash(stale_hash, 7).await.unwrap();
        store.delete_receipts_for_block_hash(stale_hash, 7).await.unwrap();
        store.delete_eth_txs_for_block_hash(stale_hash, 7).await.unwrap();

        log.block_hash = canonical_hash;
        store.store_log(&log, 7).await.unwrap();
        let canonical = ReceiptRecord {
            block_hash: canonical_hash,
            ..receipt
        };
        store.store_receipt(&canonical, 7).await.unwrap();

        let filter = ReceiptFilter {
            chain_id: Some(7),
            block_hash: Some(canonical_hash),
            ..Default::default()
        };
        let retrieved = store
            .retrieve_receipts_with_filter(&filter, 1)
            .await
            .unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].block_hash, canonical_hash);
        assert_eq!(retrieved[0].logs[0].block_hash, canonical_hash);

        let stale_filter = ReceiptFilter {
            chain_id: Some(7),
            block_hash: Some(stale_hash),
            ..Default::default()
        };
        assert!(store
            .retrieve_receipts_with_filter(&stale_filter, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn checkpoint_is_monotonic() {
        let store = MemoryEventStore::new();
        let contract = address!("00000000000000000000000000000000000000aa");
        assert_eq!(store.retrieve_last_indexed(contract, 7).await.unwrap(), 0);

        store.store_last_indexed(contract, 7, 10).await.unwrap();
        store.store_last_indexed(contract, 7, 5).await.unwrap();
        assert_eq!(store.retrieve_last_indexed(contract, 7).await.unwrap(), 10);

        store.store_last_indexed(contract, 7, 12).await.unwrap();
        assert_eq!(store.retrieve_last_indexed(contract, 7).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn tx_confirm_and_delete_by_block_hash() {
        let store = MemoryEventStore::new();
        let tx = EthTxRecord {
            tx_hash: hash_of(1),
            chain_id: 7,
            block_hash: hash_of(505),
            block_number: 5,
            raw: Bytes::from(vec![0xde, 0xad]),
            gas_fee_cap: 100,
            gas_tip_cap: 2,
            confirmed: false,
        };
        store.store_eth_tx(&tx).await.unwrap();

        store
            .confirm_eth_txs_for_block_hash(tx.block_hash, 7)
            .await
            .unwrap();
        let filter = EthTxFilter {
            chain_id: Some(7),
            confirmed: Some(true),
            ..Default::default()
        };
        assert_eq!(
            store
                .retrieve_eth_txs_with_filter(&filter, 1)
                .await
                .unwrap()
                .len(),
            1
        );

        store
            .delete_eth_txs_for_block_hash(tx.block_hash, 7)
            .await
            .unwrap();
        assert!(store
            .retrieve_eth_txs_with_filter(&EthTxFilter::default(), 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tx_range_retrieval_is_inclusive_and_filtered() {
        let store = MemoryEventStore::new();
        for block in 1..=6u64 {
            let tx = EthTxRecord {
                tx_hash: hash_of(block),
                chain_id: if block == 4 { 8 } else { 7 },
                block_hash: hash_of(block + 500),
                block_number: block,
                raw: Bytes::from(vec![block as u8]),
                gas_fee_cap: 100,
                gas_tip_cap: 2,
                confirmed: false,
            };
            store.store_eth_tx(&tx).await.unwrap();
        }

        let filter = EthTxFilter {
            chain_id: Some(7),
            ..Default::default()
        };
        // Both ends of the range are included; the chain 8 tx at block 4 is
        // filtered out.
        let in_range = store
            .retrieve_eth_txs_in_range(&filter, 2, 5, 1)
            .await
            .unwrap();
        assert_eq!(in_range.len(), 3);
        assert_eq!(in_range[0].block_number, 2);
        assert_eq!(in_range[2].block_number, 5);

        let single = store
            .retrieve_eth_txs_in_range(&filter, 3, 3, 1)
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].block_number, 3);

        assert!(store
            .retrieve_eth_txs_in_range(&filter, 7, 9, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn pagination_is_one_indexed_and_fixed_size() {
        let store = MemoryEventStore::new();
        for i in 0..(PAGE_SIZE as u64 + 5) {
            store.store_log(&make_log(hash_of(i), i, 0), 7).await.unwrap();
        }

        let page_one = store
            .retrieve_logs_with_filter(&LogFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(page_one.len(), PAGE_SIZE);
        let page_two = store
            .retrieve_logs_with_filter(&LogFilter::default(), 2)
            .await
            .unwrap();
        assert_eq!(page_two.len(), 5);
        // Page 0 is clamped to page 1.
        let page_zero = store
            .retrieve_logs_with_filter(&LogFilter::default(), 0)
            .await
            .unwrap();
        assert_eq!(page_zero, page_one);
    }
}
