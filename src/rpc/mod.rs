mod backend;
mod client;

pub use backend::ChainBackend;
pub use client::{RateLimitConfig, RetryConfig, RpcClient, RpcClientConfig, RpcError};
