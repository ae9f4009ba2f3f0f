use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use event_indexer_rs::backfill::ChainBackfiller;
use event_indexer_rs::db::{EventDB, PgEventStore};
use event_indexer_rs::rpc::{ChainBackend, RateLimitConfig, RpcClient};
use event_indexer_rs::types::config::IndexerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = IndexerConfig::load(Path::new("config/config.json"))?;
    config.load_required_env_vars()?;

    let database_url = std::env::var(&config.database_url_env_var)
        .with_context(|| format!("{} is not set", config.database_url_env_var))?;
    let store = PgEventStore::new(&database_url).await?;
    store.run_migrations().await?;
    let store: Arc<dyn EventDB> = Arc::new(store);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, cancelling backfills");
                token.cancel();
            }
        });
    }

    let mut workers = JoinSet::new();
    for chain in &config.chains {
        let rpc_url = std::env::var(&chain.rpc_url_env_var)
            .with_context(|| format!("{} is not set", chain.rpc_url_env_var))?;
        let client = match chain.requests_per_second {
            Some(requests_per_second) => RpcClient::from_url_with_rate_limit(
                &rpc_url,
                RateLimitConfig {
                    requests_per_second,
                    ..Default::default()
                },
            ),
            None => RpcClient::from_url(&rpc_url),
        }
        .with_context(|| format!("building RPC client for chain {}", chain.name))?;
        let backend: Arc<dyn ChainBackend> = Arc::new(client);

        let backfiller =
            ChainBackfiller::new(chain, store.clone(), backend.clone(), config.backfill.clone());
        let name = chain.name.clone();
        let token = token.clone();

        workers.spawn(async move {
            let head = backend
                .block_number()
                .await
                .with_context(|| format!("fetching head for chain {name}"))?;
            let start = backfiller.min_start_block();
            tracing::info!(chain = %name, start, end = head, "starting chain backfill");
            backfiller.backfill(&token, start, head).await?;
            Ok::<_, anyhow::Error>(name)
        });
    }

    let mut failed = false;
    while let Some(joined) = workers.join_next().await {
        match joined.context("chain worker panicked")? {
            Ok(name) => tracing::info!(chain = %name, "chain backfill finished"),
            Err(e) => {
                failed = true;
                tracing::error!(error = %e, "chain backfill failed");
            }
        }
    }
    anyhow::ensure!(!failed, "one or more chain backfills failed");
    Ok(())
}
