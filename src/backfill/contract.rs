use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backfill::fetch::logs_in_range;
use crate::backfill::BackfillError;
use crate::db::EventDB;
use crate::rpc::ChainBackend;
use crate::types::config::BackfillConfig;
use crate::types::{BlockRange, EthTxRecord, LogRecord};

/// Backfills one contract on one chain over a bounded block range, storing
/// the transaction, receipt, and logs for every event-emitting transaction.
///
/// The checkpoint for `(address, chain_id)` advances to the range end only
/// when every item in the range stored cleanly, so a failed range is retried
/// wholesale on the next run. The idempotent store makes the retry safe.
pub struct ContractBackfiller {
    chain_id: u64,
    address: Address,
    store: Arc<dyn EventDB>,
    backend: Arc<dyn ChainBackend>,
    settings: BackfillConfig,
}

impl ContractBackfiller {
    pub fn new(
        chain_id: u64,
        address: Address,
        store: Arc<dyn EventDB>,
        backend: Arc<dyn ChainBackend>,
        settings: BackfillConfig,
    ) -> Self {
        Self {
            chain_id,
            address,
            store,
            backend,
            settings,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Stream the contract's logs over `[start, end]` in ascending block
    /// order. The producer fetches one `blocks_per_fetch` chunk at a time and
    /// reports its final status on the second channel once the log channel is
    /// drained or an error stops it.
    pub fn get_logs(
        &self,
        token: &CancellationToken,
        start: u64,
        end: u64,
    ) -> (
        mpsc::Receiver<LogRecord>,
        oneshot::Receiver<Result<(), BackfillError>>,
    ) {
        let (log_tx, log_rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let (done_tx, done_rx) = oneshot::channel();

        let backend = self.backend.clone();
        let address = self.address;
        let settings = self.settings.clone();
        let token = token.clone();

        tokio::spawn(async move {
            let outcome = produce_logs(backend, address, settings, start, end, log_tx, &token).await;
            let _ = done_tx.send(outcome);
        });

        (log_rx, done_rx)
    }

    /// Backfill `[start, end]`, resuming past the stored checkpoint. Returns
    /// `Ok` only when the whole effective range stored successfully, in which
    /// case the checkpoint is at `end`.
    pub async fn backfill(
        &self,
        token: &CancellationToken,
        start: u64,
        end: u64,
    ) -> Result<(), BackfillError> {
        if end < start {
            return Err(crate::backfill::RangeError::InvalidRange.into());
        }

        let last_indexed = self
            .store
            .retrieve_last_indexed(self.address, self.chain_id)
            .await?;
        // 0 means never checkpointed; block 0 itself must not be skipped.
        let effective_start = if last_indexed > 0 {
            start.max(last_indexed + 1)
        } else {
            start
        };
        if effective_start > end {
            tracing::debug!(
                chain_id = self.chain_id,
                address = %self.address,
                last_indexed,
                end,
                "range already indexed, nothing to backfill"
            );
            return Ok(());
        }

        tracing::info!(
            chain_id = self.chain_id,
            address = %self.address,
            start = effective_start,
            end,
            "backfilling contract"
        );

        let (mut log_rx, mut done_rx) = self.get_logs(token, effective_start, end);

        let mut processed: HashSet<B256> = HashSet::new();
        let mut failures: Vec<String> = Vec::new();
        let mut producer_result: Option<Result<(), BackfillError>> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(BackfillError::Cancelled),
                joined = &mut done_rx, if producer_result.is_none() => {
                    producer_result = Some(joined.unwrap_or_else(|_| {
                        Err(BackfillError::Internal("log producer dropped".into()))
                    }));
                }
                maybe_log = log_rx.recv() => {
                    match maybe_log {
                        Some(log) => {
                            self.handle_log(log, &mut processed, &mut failures).await;
                        }
                        None => break,
                    }
                }
            }
        }

        let producer_result = match producer_result {
            Some(result) => result,
            None => done_rx.await.unwrap_or_else(|_| {
                Err(BackfillError::Internal("log producer dropped".into()))
            }),
        };
        producer_result?;

        if !failures.is_empty() {
            return Err(BackfillError::StoreFailures {
                count: failures.len(),
                start: effective_start,
                end,
                detail: failures.join("; "),
            });
        }

        self.store
            .store_last_indexed(self.address, self.chain_id, end)
            .await?;
        tracing::info!(
            chain_id = self.chain_id,
            address = %self.address,
            end,
            txs = processed.len(),
            "contract backfill complete"
        );
        Ok(())
    }

    /// Process one streamed log: fetch its transaction and receipt, then
    /// store transaction, receipt, and all receipt logs. A failure is
    /// recorded and skips the failed item's dependents; the rest of the range
    /// keeps going.
    async fn handle_log(
        &self,
        log: LogRecord,
        processed: &mut HashSet<B256>,
        failures: &mut Vec<String>,
    ) {
        let tx_hash = log.tx_hash;
        if !processed.insert(tx_hash) {
            return;
        }

        let receipt = match self.backend.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                failures.push(format!("no receipt for tx {tx_hash}"));
                return;
            }
            Err(e) => {
                failures.push(format!("receipt fetch for tx {tx_hash}: {e}"));
                return;
            }
        };
        let tx = match self.backend.transaction(tx_hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                failures.push(format!("tx {tx_hash} not found"));
                return;
            }
            Err(e) => {
                failures.push(format!("tx fetch for {tx_hash}: {e}"));
                return;
            }
        };

        let record = EthTxRecord {
            tx_hash,
            chain_id: self.chain_id,
            block_hash: receipt.block_hash,
            block_number: receipt.block_number,
            raw: tx.raw,
            gas_fee_cap: tx.gas_fee_cap,
            gas_tip_cap: tx.gas_tip_cap,
            confirmed: false,
        };
        if let Err(e) = self.store.store_eth_tx(&record).await {
            failures.push(format!("store tx {tx_hash}: {e}"));
            return;
        }
        if let Err(e) = self.store.store_receipt(&receipt, self.chain_id).await {
            failures.push(format!("store receipt for tx {tx_hash}: {e}"));
            return;
        }
        for receipt_log in &receipt.logs {
            if let Err(e) = self.store.store_log(receipt_log, self.chain_id).await {
                failures.push(format!(
                    "store log {} of tx {tx_hash}: {e}",
                    receipt_log.log_index
                ));
            }
        }
    }
}

async fn produce_logs(
    backend: Arc<dyn ChainBackend>,
    address: Address,
    settings: BackfillConfig,
    start: u64,
    end: u64,
    log_tx: mpsc::Sender<LogRecord>,
    token: &CancellationToken,
) -> Result<(), BackfillError> {
    let chunk_size = settings.blocks_per_fetch.max(1);
    let mut chunk_start = start;

    loop {
        let chunk = BlockRange {
            start: chunk_start,
            end: chunk_start.saturating_add(chunk_size - 1).min(end),
        };
        tracing::debug!(%address, %chunk, "fetching log chunk");
        let pages = logs_in_range(
            backend.clone(),
            address,
            chunk.start,
            chunk.end,
            settings.page_size,
            settings.concurrency,
            token,
        )
        .await?;

        let mut itr = pages.iterator();
        while !itr.done() {
            let (_, page) = itr.next()?;
            for log in page {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(BackfillError::Cancelled),
                    sent = log_tx.send(log) => {
                        if sent.is_err() {
                            // Consumer hung up, there is nobody to stream to.
                            return Err(BackfillError::Cancelled);
                        }
                    }
                }
            }
        }

        if chunk.end == end {
            return Ok(());
        }
        chunk_start = chunk.end + 1;
    }
}
