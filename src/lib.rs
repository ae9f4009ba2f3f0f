pub mod backfill;
pub mod db;
pub mod rpc;
pub mod types;
