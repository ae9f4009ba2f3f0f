use std::env;
use std::num::NonZeroU32;
use std::path::Path;

use alloy::primitives::Address;
use serde::Deserialize;

/// A single contract to index on a chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub address: Address,
    /// Block the contract was deployed in; backfills never start below it.
    #[serde(default)]
    pub start_block: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url_env_var: String,
    /// RPC request cap for this chain; unset disables rate limiting.
    #[serde(default)]
    pub requests_per_second: Option<NonZeroU32>,
    pub contracts: Vec<ContractConfig>,
}

/// Tuning knobs for the range fetchers.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Blocks covered by one paged `eth_getLogs` call.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Concurrent in-flight RPC sub-queries per ranged fetch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Blocks covered by one producer chunk before results are streamed.
    #[serde(default = "default_blocks_per_fetch")]
    pub blocks_per_fetch: u64,
    /// Capacity of the log stream channel between producer and consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_page_size() -> u64 {
    256
}

fn default_concurrency() -> usize {
    8
}

fn default_blocks_per_fetch() -> u64 {
    2048
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            concurrency: default_concurrency(),
            blocks_per_fetch: default_blocks_per_fetch(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub backfill: BackfillConfig,
    pub database_url_env_var: String,
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file at {}: {e}", path.display()))?;
        let config: IndexerConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file at {}: {e}", path.display()))?;

        anyhow::ensure!(!config.chains.is_empty(), "config lists no chains");
        for chain in &config.chains {
            anyhow::ensure!(
                !chain.contracts.is_empty(),
                "chain {} lists no contracts",
                chain.name
            );
        }
        anyhow::ensure!(config.backfill.page_size > 0, "page_size must be non-zero");
        anyhow::ensure!(
            config.backfill.blocks_per_fetch > 0,
            "blocks_per_fetch must be non-zero"
        );

        Ok(config)
    }

    /// Ensures every env var the config names is set, loading `.env` once if
    /// any are missing.
    pub fn load_required_env_vars(&self) -> anyhow::Result<()> {
        let mut required: Vec<&str> = self
            .chains
            .iter()
            .map(|c| c.rpc_url_env_var.as_str())
            .collect();
        required.push(self.database_url_env_var.as_str());

        let missing: Vec<&&str> = required
            .iter()
            .filter(|var| env::var(var).is_err())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        dotenvy::dotenv().map_err(|e| {
            anyhow::anyhow!("missing env vars {missing:?} and failed to load .env file: {e}")
        })?;

        let still_missing: Vec<&str> = required
            .iter()
            .filter(|var| env::var(var).is_err())
            .copied()
            .collect();

        anyhow::ensure!(
            still_missing.is_empty(),
            "missing required env vars after loading .env: {still_missing:?}"
        );

        Ok(())
    }
}
