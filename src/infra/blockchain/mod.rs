//! Chain client implementations.

pub mod rpc;

pub use rpc::{EthRpcClient, RpcClientConfig};
