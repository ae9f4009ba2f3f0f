use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backfill::{BackfillError, ContractBackfiller};
use crate::db::EventDB;
use crate::rpc::ChainBackend;
use crate::types::config::{BackfillConfig, ChainConfig};

/// Runs the backfillers for every configured contract on one chain
/// concurrently. One contract failing never stops its siblings; the failures
/// are aggregated and reported together once all contracts have finished.
pub struct ChainBackfiller {
    chain_id: u64,
    contracts: Vec<(u64, Arc<ContractBackfiller>)>,
}

impl ChainBackfiller {
    pub fn new(
        chain: &ChainConfig,
        store: Arc<dyn EventDB>,
        backend: Arc<dyn ChainBackend>,
        settings: BackfillConfig,
    ) -> Self {
        let contracts = chain
            .contracts
            .iter()
            .map(|contract| {
                let backfiller = ContractBackfiller::new(
                    chain.chain_id,
                    contract.address,
                    store.clone(),
                    backend.clone(),
                    settings.clone(),
                );
                (contract.start_block, Arc::new(backfiller))
            })
            .collect();
        Self {
            chain_id: chain.chain_id,
            contracts,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Lowest deploy block across the configured contracts, the natural
    /// start for a whole-chain backfill.
    pub fn min_start_block(&self) -> u64 {
        self.contracts
            .iter()
            .map(|(start, _)| *start)
            .min()
            .unwrap_or(0)
    }

    /// Backfill `[start, end]` for every contract. Each contract's effective
    /// start is clamped up to its deploy block.
    pub async fn backfill(
        &self,
        token: &CancellationToken,
        start: u64,
        end: u64,
    ) -> Result<(), BackfillError> {
        let total = self.contracts.len();
        let mut workers = JoinSet::new();

        for (deploy_block, backfiller) in &self.contracts {
            let contract_start = start.max(*deploy_block);
            if contract_start > end {
                tracing::debug!(
                    chain_id = self.chain_id,
                    address = %backfiller.address(),
                    deploy_block,
                    end,
                    "contract deployed past range end, skipping"
                );
                continue;
            }

            let backfiller = backfiller.clone();
            let token = token.clone();
            workers.spawn(async move {
                let address = backfiller.address();
                let result = backfiller.backfill(&token, contract_start, end).await;
                (address, result)
            });
        }

        let mut failures: Vec<String> = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = workers.join_next().await {
            let (address, result) = joined
                .map_err(|e| BackfillError::Internal(format!("contract worker panicked: {e}")))?;
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => cancelled = true,
                Err(e) => {
                    tracing::error!(
                        chain_id = self.chain_id,
                        %address,
                        error = %e,
                        "contract backfill failed"
                    );
                    failures.push(format!("{address}: {e}"));
                }
            }
        }

        if cancelled {
            return Err(BackfillError::Cancelled);
        }
        if !failures.is_empty() {
            return Err(BackfillError::ContractFailures {
                failed: failures.len(),
                total,
                detail: failures.join("; "),
            });
        }

        tracing::info!(
            chain_id = self.chain_id,
            contracts = total,
            start,
            end,
            "chain backfill complete"
        );
        Ok(())
    }
}
