use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backfill::range::{make_range, RangeFetchResult};
use crate::backfill::BackfillError;
use crate::rpc::ChainBackend;
use crate::types::LogRecord;

/// One timestamp per block height in the inclusive range, index 0 = `start`.
/// Workers run `concurrency`-bounded and are all joined before the result is
/// handed back, so the returned collector is safe to iterate.
pub async fn block_times_in_range(
    backend: Arc<dyn ChainBackend>,
    start: u64,
    end: u64,
    concurrency: usize,
    token: &CancellationToken,
) -> Result<Arc<RangeFetchResult<u64>>, BackfillError> {
    let heights = make_range(start, end)?;
    let result = Arc::new(RangeFetchResult::new(heights.len()));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();

    for (index, height) in heights.into_iter().enumerate() {
        let backend = backend.clone();
        let result = result.clone();
        let semaphore = semaphore.clone();
        let token = token.clone();

        workers.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| BackfillError::Cancelled)?;
            let time = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BackfillError::Cancelled),
                fetched = backend.block_time(height) => fetched?,
            };
            result.put(index, time)?;
            Ok::<(), BackfillError>(())
        });
    }

    join_workers(workers, "block time").await?;
    Ok(result)
}

/// Paged log fetch over the inclusive range: each index holds one page of
/// `page_size` blocks, deduplicated by `(tx_hash, log_index)`. Concatenating
/// the pages in index order yields the full log set for the range.
pub async fn logs_in_range(
    backend: Arc<dyn ChainBackend>,
    address: Address,
    start: u64,
    end: u64,
    page_size: u64,
    concurrency: usize,
    token: &CancellationToken,
) -> Result<Arc<RangeFetchResult<Vec<LogRecord>>>, BackfillError> {
    let pages = page_bounds(start, end, page_size)?;
    let result = Arc::new(RangeFetchResult::new(pages.len()));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();

    for (index, (page_start, page_end)) in pages.into_iter().enumerate() {
        let backend = backend.clone();
        let result = result.clone();
        let semaphore = semaphore.clone();
        let token = token.clone();

        workers.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| BackfillError::Cancelled)?;
            let logs = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BackfillError::Cancelled),
                fetched = backend.logs(address, page_start, page_end) => fetched?,
            };
            result.put(index, dedup_logs(logs))?;
            Ok::<(), BackfillError>(())
        });
    }

    join_workers(workers, "log page").await?;
    Ok(result)
}

/// Partition `[start, end]` into consecutive sub-ranges of at most
/// `page_size` blocks.
fn page_bounds(start: u64, end: u64, page_size: u64) -> Result<Vec<(u64, u64)>, BackfillError> {
    if end < start {
        return Err(crate::backfill::RangeError::InvalidRange.into());
    }
    let page_size = page_size.max(1);

    let mut pages = Vec::new();
    let mut page_start = start;
    loop {
        let page_end = page_start.saturating_add(page_size - 1).min(end);
        pages.push((page_start, page_end));
        if page_end == end {
            break;
        }
        page_start = page_end + 1;
    }
    Ok(pages)
}

fn dedup_logs(logs: Vec<LogRecord>) -> Vec<LogRecord> {
    let mut seen = HashSet::new();
    logs.into_iter()
        .filter(|log| seen.insert((log.tx_hash, log.log_index)))
        .collect()
}

async fn join_workers(
    mut workers: JoinSet<Result<(), BackfillError>>,
    what: &str,
) -> Result<(), BackfillError> {
    while let Some(joined) = workers.join_next().await {
        joined.map_err(|e| BackfillError::Internal(format!("{what} worker panicked: {e}")))??;
    }
    Ok(())
}
