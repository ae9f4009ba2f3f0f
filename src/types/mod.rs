pub mod config;
pub mod records;

pub use records::{BlockRange, EthTxRecord, LogRecord, ReceiptRecord, TxData};
