use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::db::filters::{EthTxFilter, LogFilter, ReceiptFilter, PAGE_SIZE};
use crate::db::{DbError, EventDB};
use crate::types::{EthTxRecord, LogRecord, ReceiptRecord};

/// Logs keep one nullable column per topic slot; a log carries at most four.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logs (
    chain_id     BIGINT NOT NULL,
    tx_hash      BYTEA  NOT NULL,
    log_index    BIGINT NOT NULL,
    block_hash   BYTEA  NOT NULL,
    block_number BIGINT NOT NULL,
    tx_index     BIGINT NOT NULL,
    address      BYTEA  NOT NULL,
    topic0       BYTEA,
    topic1       BYTEA,
    topic2       BYTEA,
    topic3       BYTEA,
    data         BYTEA  NOT NULL,
    removed      BOOLEAN NOT NULL,
    confirmed    BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (chain_id, tx_hash, log_index)
);
CREATE INDEX IF NOT EXISTS logs_block_hash_idx ON logs (chain_id, block_hash);
CREATE INDEX IF NOT EXISTS logs_block_number_idx ON logs (chain_id, block_number);

CREATE TABLE IF NOT EXISTS receipts (
    chain_id     BIGINT NOT NULL,
    tx_hash      BYTEA  NOT NULL,
    block_hash   BYTEA  NOT NULL,
    block_number BIGINT NOT NULL,
    PRIMARY KEY (chain_id, tx_hash)
);

CREATE TABLE IF NOT EXISTS eth_txs (
    tx_hash      BYTEA  NOT NULL,
    chain_id     BIGINT NOT NULL,
    block_hash   BYTEA  NOT NULL,
    block_number BIGINT NOT NULL,
    raw_tx       BYTEA  NOT NULL,
    gas_fee_cap  TEXT   NOT NULL,
    gas_tip_cap  TEXT   NOT NULL,
    confirmed    BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (tx_hash, chain_id)
);
CREATE INDEX IF NOT EXISTS eth_txs_block_hash_idx ON eth_txs (chain_id, block_hash);

CREATE TABLE IF NOT EXISTS last_indexed (
    contract_address BYTEA  NOT NULL,
    chain_id         BIGINT NOT NULL,
    block_number     BIGINT NOT NULL,
    PRIMARY KEY (contract_address, chain_id)
);
";

/// Postgres-backed [`EventDB`]. Idempotence comes from
/// `ON CONFLICT ... DO NOTHING` on every insert, so concurrent writers for
/// the same chain and contract never conflict.
pub struct PgEventStore {
    pool: Pool,
}

impl PgEventStore {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = Manager::from_config(config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(16)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(DbError::BuildError)?;

        let _conn = pool.get().await?;
        tracing::info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Apply the embedded schema. Safe to run on every start.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| DbError::MigrationError(e.to_string()))?;
        tracing::info!("Database schema up to date");
        Ok(())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DbError> {
        let client = self.pool.get().await?;
        let rows = client.query(sql, params).await?;
        Ok(rows)
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let affected = client.execute(sql, params).await?;
        Ok(affected)
    }

    async fn logs_for_tx(&self, chain_id: u64, tx_hash: B256) -> Result<Vec<LogRecord>, DbError> {
        let rows = self
            .query(
                "SELECT * FROM logs WHERE chain_id = $1 AND tx_hash = $2 ORDER BY log_index",
                &[&(chain_id as i64), &tx_hash.as_slice()],
            )
            .await?;
        rows.iter().map(log_from_row).collect()
    }
}

/// Accumulates `column = $N` conditions and their owned parameters for a
/// filtered query.
#[derive(Default)]
struct WhereBuilder {
    conditions: Vec<String>,
    params: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl WhereBuilder {
    fn push<V: ToSql + Sync + Send + 'static>(&mut self, column: &str, value: V) {
        self.conditions
            .push(format!("{column} = ${}", self.params.len() + 1));
        self.params.push(Box::new(value));
    }

    fn push_raw<V: ToSql + Sync + Send + 'static>(&mut self, condition_fmt: &str, value: V) {
        self.conditions
            .push(condition_fmt.replace("$?", &format!("${}", self.params.len() + 1)));
        self.params.push(Box::new(value));
    }

    fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect()
    }
}

fn log_where(filter: &LogFilter) -> WhereBuilder {
    let mut builder = WhereBuilder::default();
    if let Some(chain_id) = filter.chain_id {
        builder.push("chain_id", chain_id as i64);
    }
    if let Some(tx_hash) = filter.tx_hash {
        builder.push("tx_hash", tx_hash.to_vec());
    }
    if let Some(block_hash) = filter.block_hash {
        builder.push("block_hash", block_hash.to_vec());
    }
    if let Some(address) = filter.address {
        builder.push("address", address.to_vec());
    }
    if let Some(block_number) = filter.block_number {
        builder.push("block_number", block_number as i64);
    }
    if let Some(confirmed) = filter.confirmed {
        builder.push("confirmed", confirmed);
    }
    builder
}

fn receipt_where(filter: &ReceiptFilter) -> WhereBuilder {
    let mut builder = WhereBuilder::default();
    if let Some(chain_id) = filter.chain_id {
        builder.push("chain_id", chain_id as i64);
    }
    if let Some(tx_hash) = filter.tx_hash {
        builder.push("tx_hash", tx_hash.to_vec());
    }
    if let Some(block_hash) = filter.block_hash {
        builder.push("block_hash", block_hash.to_vec());
    }
    if let Some(block_number) = filter.block_number {
        builder.push("block_number", block_number as i64);
    }
    builder
}

fn eth_tx_where(filter: &EthTxFilter) -> WhereBuilder {
    let mut builder = WhereBuilder::default();
    if let Some(chain_id) = filter.chain_id {
        builder.push("chain_id", chain_id as i64);
    }
    if let Some(tx_hash) = filter.tx_hash {
        builder.push("tx_hash", tx_hash.to_vec());
    }
    if let Some(block_hash) = filter.block_hash {
        builder.push("block_hash", block_hash.to_vec());
    }
    if let Some(block_number) = filter.block_number {
        builder.push("block_number", block_number as i64);
    }
    if let Some(confirmed) = filter.confirmed {
        builder.push("confirmed", confirmed);
    }
    builder
}

fn page_clause(page: usize) -> String {
    let page = page.max(1);
    format!("LIMIT {PAGE_SIZE} OFFSET {}", (page - 1) * PAGE_SIZE)
}

fn b256_from_column(row: &Row, column: &str) -> Result<B256, DbError> {
    let bytes: Vec<u8> = row.get(column);
    if bytes.len() != 32 {
        return Err(DbError::MalformedRow(format!(
            "{column} holds {} bytes, expected 32",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn address_from_column(row: &Row, column: &str) -> Result<Address, DbError> {
    let bytes: Vec<u8> = row.get(column);
    if bytes.len() != 20 {
        return Err(DbError::MalformedRow(format!(
            "{column} holds {} bytes, expected 20",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn u128_from_column(row: &Row, column: &str) -> Result<u128, DbError> {
    let text: String = row.get(column);
    text.parse()
        .map_err(|e| DbError::MalformedRow(format!("{column} is not a u128: {e}")))
}

fn log_from_row(row: &Row) -> Result<LogRecord, DbError> {
    let mut topics = Vec::new();
    for column in ["topic0", "topic1", "topic2", "topic3"] {
        let topic: Option<Vec<u8>> = row.get(column);
        match topic {
            Some(bytes) if bytes.len() == 32 => topics.push(B256::from_slice(&bytes)),
            Some(bytes) => {
                return Err(DbError::MalformedRow(format!(
                    "{column} holds {} bytes, expected 32",
                    bytes.len()
                )))
            }
            None => break,
        }
    }

    Ok(LogRecord {
        address: address_from_column(row, "address")?,
        topics,
        data: Bytes::from(row.get::<_, Vec<u8>>("data")),
        block_number: row.get::<_, i64>("block_number") as u64,
        tx_hash: b256_from_column(row, "tx_hash")?,
        tx_index: row.get::<_, i64>("tx_index") as u64,
        block_hash: b256_from_column(row, "block_hash")?,
        log_index: row.get::<_, i64>("log_index") as u64,
        removed: row.get("removed"),
    })
}

fn eth_tx_from_row(row: &Row) -> Result<EthTxRecord, DbError> {
    Ok(EthTxRecord {
        tx_hash: b256_from_column(row, "tx_hash")?,
        chain_id: row.get::<_, i64>("chain_id") as u64,
        block_hash: b256_from_column(row, "block_hash")?,
        block_number: row.get::<_, i64>("block_number") as u64,
        raw: Bytes::from(row.get::<_, Vec<u8>>("raw_tx")),
        gas_fee_cap: u128_from_column(row, "gas_fee_cap")?,
        gas_tip_cap: u128_from_column(row, "gas_tip_cap")?,
        confirmed: row.get("confirmed"),
    })
}

#[async_trait]
impl EventDB for PgEventStore {
    async fn store_log(&self, log: &LogRecord, chain_id: u64) -> Result<(), DbError> {
        let topic = |i: usize| log.topics.get(i).map(|t| t.to_vec());
        self.execute(
            "INSERT INTO logs (chain_id, tx_hash, log_index, block_hash, block_number, tx_index, \
             address, topic0, topic1, topic2, topic3, data, removed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
            &[
                &(chain_id as i64),
                &log.tx_hash.as_slice(),
                &(log.log_index as i64),
                &log.block_hash.as_slice(),
                &(log.block_number as i64),
                &(log.tx_index as i64),
                &log.address.as_slice(),
                &topic(0),
                &topic(1),
                &topic(2),
                &topic(3),
                &log.data.as_ref(),
                &log.removed,
            ],
        )
        .await?;
        Ok(())
    }

    async fn store_receipt(&self, receipt: &ReceiptRecord, chain_id: u64) -> Result<(), DbError> {
        self.execute(
            "INSERT INTO receipts (chain_id, tx_hash, block_hash, block_number) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (chain_id, tx_hash) DO NOTHING",
            &[
                &(chain_id as i64),
                &receipt.tx_hash.as_slice(),
                &receipt.block_hash.as_slice(),
                &(receipt.block_number as i64),
            ],
        )
        .await?;
        Ok(())
    }

    async fn store_eth_tx(&self, tx: &EthTxRecord) -> Result<(), DbError> {
        self.execute(
            "INSERT INTO eth_txs (tx_hash, chain_id, block_hash, block_number, raw_tx, \
             gas_fee_cap, gas_tip_cap, confirmed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (tx_hash, chain_id) DO NOTHING",
            &[
                &tx.tx_hash.as_slice(),
                &(tx.chain_id as i64),
                &tx.block_hash.as_slice(),
                &(tx.block_number as i64),
                &tx.raw.as_ref(),
                &tx.gas_fee_cap.to_string(),
                &tx.gas_tip_cap.to_string(),
                &tx.confirmed,
            ],
        )
        .await?;
        Ok(())
    }

    async fn retrieve_logs_with_filter(
        &self,
        filter: &LogFilter,
        page: usize,
    ) -> Result<Vec<LogRecord>, DbError> {
        let builder = log_where(filter);
        let sql = format!(
            "SELECT * FROM logs {} ORDER BY block_number, log_index {}",
            builder.where_sql(),
            page_clause(page)
        );
        let rows = self.query(&sql, &builder.param_refs()).await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn retrieve_receipts_with_filter(
        &self,
        filter: &ReceiptFilter,
        page: usize,
    ) -> Result<Vec<ReceiptRecord>, DbError> {
        let builder = receipt_where(filter);
        let sql = format!(
            "SELECT * FROM receipts {} ORDER BY block_number {}",
            builder.where_sql(),
            page_clause(page)
        );
        let rows = self.query(&sql, &builder.param_refs()).await?;

        let mut receipts = Vec::with_capacity(rows.len());
        for row in &rows {
            let chain_id = row.get::<_, i64>("chain_id") as u64;
            let tx_hash = b256_from_column(row, "tx_hash")?;
            receipts.push(ReceiptRecord {
                tx_hash,
                block_hash: b256_from_column(row, "block_hash")?,
                block_number: row.get::<_, i64>("block_number") as u64,
                logs: self.logs_for_tx(chain_id, tx_hash).await?,
            });
        }
        Ok(receipts)
    }

    async fn retrieve_eth_txs_with_filter(
        &self,
        filter: &EthTxFilter,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        let builder = eth_tx_where(filter);
        let sql = format!(
            "SELECT * FROM eth_txs {} ORDER BY block_number {}",
            builder.where_sql(),
            page_clause(page)
        );
        let rows = self.query(&sql, &builder.param_refs()).await?;
        rows.iter().map(eth_tx_from_row).collect()
    }

    async fn retrieve_eth_txs_in_range(
        &self,
        filter: &EthTxFilter,
        start_block: u64,
        end_block: u64,
        page: usize,
    ) -> Result<Vec<EthTxRecord>, DbError> {
        let mut builder = eth_tx_where(filter);
        builder.push_raw("block_number >= $?", start_block as i64);
        builder.push_raw("block_number <= $?", end_block as i64);
        let sql = format!(
            "SELECT * FROM eth_txs {} ORDER BY block_number {}",
            builder.where_sql(),
            page_clause(page)
        );
        let rows = self.query(&sql, &builder.param_refs()).await?;
        rows.iter().map(eth_tx_from_row).collect()
    }

    async fn confirm_logs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.execute(
            "UPDATE logs SET confirmed = TRUE \
             WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3",
            &[
                &(chain_id as i64),
                &(start_block as i64),
                &(end_block as i64),
            ],
        )
        .await?;
        Ok(())
    }

    async fn confirm_eth_txs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.execute(
            "UPDATE eth_txs SET confirmed = TRUE \
             WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3",
            &[
                &(chain_id as i64),
                &(start_block as i64),
                &(end_block as i64),
            ],
        )
        .await?;
        Ok(())
    }

    async fn confirm_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        self.execute(
            "UPDATE eth_txs SET confirmed = TRUE WHERE chain_id = $1 AND block_hash = $2",
            &[&(chain_id as i64), &block_hash.as_slice()],
        )
        .await?;
        Ok(())
    }

    async fn delete_logs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let deleted = self
            .execute(
                "DELETE FROM logs WHERE chain_id = $1 AND block_hash = $2",
                &[&(chain_id as i64), &block_hash.as_slice()],
            )
            .await?;
        tracing::debug!(chain_id, %block_hash, deleted, "deleted logs for reorged block");
        Ok(())
    }

    async fn delete_receipts_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let deleted = self
            .execute(
                "DELETE FROM receipts WHERE chain_id = $1 AND block_hash = $2",
                &[&(chain_id as i64), &block_hash.as_slice()],
            )
            .await?;
        tracing::debug!(chain_id, %block_hash, deleted, "deleted receipts for reorged block");
        Ok(())
    }

    async fn delete_eth_txs_for_block_hash(
        &self,
        block_hash: B256,
        chain_id: u64,
    ) -> Result<(), DbError> {
        let deleted = self
            .execute(
                "DELETE FROM eth_txs WHERE chain_id = $1 AND block_hash = $2",
                &[&(chain_id as i64), &block_hash.as_slice()],
            )
            .await?;
        tracing::debug!(chain_id, %block_hash, deleted, "deleted txs for reorged block");
        Ok(())
    }

    async fn retrieve_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<u64, DbError> {
        let rows = self
            .query(
                "SELECT block_number FROM last_indexed \
                 WHERE contract_address = $1 AND chain_id = $2",
                &[&contract_address.as_slice(), &(chain_id as i64)],
            )
            .await?;
        Ok(rows
            .first()
            .map(|row| row.get::<_, i64>("block_number") as u64)
            .unwrap_or(0))
    }

    async fn store_last_indexed(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), DbError> {
        self.execute(
            "INSERT INTO last_indexed (contract_address, chain_id, block_number) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (contract_address, chain_id) DO UPDATE \
             SET block_number = GREATEST(last_indexed.block_number, EXCLUDED.block_number)",
            &[
                &contract_address.as_slice(),
                &(chain_id as i64),
                &(block_number as i64),
            ],
        )
        .await?;
        Ok(())
    }
}
