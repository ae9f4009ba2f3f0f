use alloy::consensus::Transaction as _;
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Filter;
use async_trait::async_trait;

use crate::rpc::client::{RpcClient, RpcError};
use crate::types::{LogRecord, ReceiptRecord, TxData};

/// Capability interface over a chain RPC endpoint. The backfill engine
/// depends on this contract only; production traffic goes through
/// [`RpcClient`], tests substitute an in-memory chain.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Current head height.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Timestamp of the block at `height`.
    async fn block_time(&self, height: u64) -> Result<u64, RpcError>;

    /// All logs emitted by `address` in the inclusive block range.
    async fn logs(&self, address: Address, start: u64, end: u64)
        -> Result<Vec<LogRecord>, RpcError>;

    /// The transaction with the given hash, if known to the node.
    async fn transaction(&self, hash: B256) -> Result<Option<TxData>, RpcError>;

    /// The receipt for the given transaction hash, if mined.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>, RpcError>;
}

#[async_trait]
impl ChainBackend for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.get_block_number().await
    }

    async fn block_time(&self, height: u64) -> Result<u64, RpcError> {
        let block = self
            .get_block_by_number(height)
            .await?
            .ok_or(RpcError::BlockNotFound(height))?;
        Ok(block.header.timestamp)
    }

    async fn logs(
        &self,
        address: Address,
        start: u64,
        end: u64,
    ) -> Result<Vec<LogRecord>, RpcError> {
        let filter = Filter::new().address(address).from_block(start).to_block(end);
        let logs = self.get_logs(&filter).await?;
        Ok(logs.into_iter().map(LogRecord::from).collect())
    }

    async fn transaction(&self, hash: B256) -> Result<Option<TxData>, RpcError> {
        let Some(tx) = self.get_transaction(hash).await? else {
            return Ok(None);
        };
        let envelope = tx.inner.into_inner();
        Ok(Some(TxData {
            hash,
            raw: envelope.encoded_2718().into(),
            gas_fee_cap: envelope.max_fee_per_gas(),
            gas_tip_cap: envelope.max_priority_fee_per_gas().unwrap_or_default(),
        }))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>, RpcError> {
        let receipt = self.get_transaction_receipt(hash).await?;
        Ok(receipt.map(ReceiptRecord::from))
    }
}
