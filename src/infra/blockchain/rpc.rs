//! Ethereum JSON-RPC chain client.
//!
//! Every call targets the URL it is given (the chain proxy URL), so one client
//! serves every chain. Only connection-class failures are retried.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::ethereum::{format_quantity, parse_u64_quantity};
use crate::domain::{AppError, Block, BlockchainError, ChainClient, EventLog, LogFilter, Receipt};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl RpcClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("RPC_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: std::env::var("RPC_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    hash: String,
    #[serde(default)]
    transactions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_hash: Option<String>,
    block_number: Option<String>,
    transaction_index: Option<String>,
    contract_address: Option<String>,
    gas_used: Option<String>,
    cumulative_gas_used: Option<String>,
    effective_gas_price: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
    privacy_group_id: Option<String>,
    output: Option<String>,
    revert_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
    block_number: Option<String>,
    block_hash: Option<String>,
    transaction_hash: Option<String>,
    transaction_index: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

fn quantity(value: Option<&String>) -> Result<u64, AppError> {
    value.map_or(Ok(0), |v| parse_u64_quantity(v)).map_err(invalid_response)
}

fn invalid_response(e: AppError) -> AppError {
    AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string()))
}

impl TryFrom<RpcBlock> for Block {
    type Error = AppError;

    fn try_from(raw: RpcBlock) -> Result<Self, Self::Error> {
        Ok(Self {
            number: parse_u64_quantity(&raw.number).map_err(invalid_response)?,
            hash: raw.hash,
            transactions: raw.transactions,
        })
    }
}

impl TryFrom<RpcLog> for EventLog {
    type Error = AppError;

    fn try_from(raw: RpcLog) -> Result<Self, Self::Error> {
        Ok(Self {
            address: raw.address,
            topics: raw.topics,
            data: raw.data,
            block_number: quantity(raw.block_number.as_ref())?,
            block_hash: raw.block_hash,
            tx_hash: raw.transaction_hash,
            tx_index: quantity(raw.transaction_index.as_ref())?,
            log_index: quantity(raw.log_index.as_ref())?,
            removed: raw.removed,
        })
    }
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = AppError;

    fn try_from(raw: RpcReceipt) -> Result<Self, Self::Error> {
        Ok(Self {
            tx_hash: raw.transaction_hash,
            block_hash: raw.block_hash,
            block_number: quantity(raw.block_number.as_ref())?,
            tx_index: quantity(raw.transaction_index.as_ref())?,
            contract_address: raw.contract_address,
            gas_used: quantity(raw.gas_used.as_ref())?,
            cumulative_gas_used: quantity(raw.cumulative_gas_used.as_ref())?,
            effective_gas_price: raw.effective_gas_price,
            status: quantity(raw.status.as_ref())?,
            logs: raw
                .logs
                .into_iter()
                .map(EventLog::try_from)
                .collect::<Result<_, _>>()?,
            privacy_group_id: raw.privacy_group_id,
            output: raw.output,
            revert_reason: raw.revert_reason,
        })
    }
}

fn decode_code(code: &str) -> Result<Vec<u8>, AppError> {
    let digits = code.strip_prefix("0x").unwrap_or(code);
    hex::decode(digits).map_err(|e| {
        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
            "invalid code '{}': {}",
            code, e
        )))
    })
}

/// Ethereum JSON-RPC client over HTTP
pub struct EthRpcClient {
    http_client: Client,
    config: RpcClientConfig,
}

impl EthRpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self, AppError> {
        Self::new(RpcClientConfig::default())
    }

    async fn send_request(&self, url: &str, method: &str, params: &Value) -> Result<Value, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(AppError::Blockchain(BlockchainError::Connection(format!(
                "node answered HTTP {}",
                status
            ))));
        }
        if !status.is_success() {
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "node answered HTTP {}",
                status
            ))));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }
        Ok(rpc_response.result)
    }

    /// Make an RPC call, retrying connection-class failures
    #[instrument(skip(self, params), fields(url = %url))]
    async fn rpc_call<R: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<R, AppError> {
        let mut attempt = 0;
        let result = loop {
            match self.send_request(url, method, &params).await {
                Ok(result) => break result,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt = attempt, error = %e, method = %method, "RPC call failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        serde_json::from_value(result).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                "{}: {}",
                method, e
            )))
        })
    }

    async fn get_block(&self, url: &str, tag: Value) -> Result<Block, AppError> {
        let raw: Option<RpcBlock> = self
            .rpc_call(url, "eth_getBlockByNumber", json!([tag.clone(), false]))
            .await?;
        match raw {
            Some(raw) => raw.try_into(),
            // Nodes behind a load balancer may lag each other by a block or two
            None => Err(AppError::Blockchain(BlockchainError::Connection(format!(
                "block {} not available yet",
                tag
            )))),
        }
    }
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn latest_block(&self, url: &str) -> Result<Block, AppError> {
        self.get_block(url, json!("latest")).await
    }

    async fn block_by_number(&self, url: &str, number: u64) -> Result<Block, AppError> {
        self.get_block(url, json!(format_quantity(u128::from(number))))
            .await
    }

    async fn transaction_receipt(
        &self,
        url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError> {
        let raw: Option<RpcReceipt> = self
            .rpc_call(url, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        debug!(tx_hash = %tx_hash, found = raw.is_some(), "Fetched transaction receipt");
        raw.map(Receipt::try_from).transpose()
    }

    async fn private_transaction_receipt(
        &self,
        url: &str,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AppError> {
        let raw: Option<RpcReceipt> = self
            .rpc_call(url, "priv_getTransactionReceipt", json!([tx_hash]))
            .await?;
        raw.map(Receipt::try_from).transpose()
    }

    async fn filter_logs(&self, url: &str, filter: &LogFilter) -> Result<Vec<EventLog>, AppError> {
        let params = json!([{
            "address": filter.addresses,
            "fromBlock": format_quantity(u128::from(filter.from_block)),
            "toBlock": format_quantity(u128::from(filter.to_block)),
        }]);
        let raw: Vec<RpcLog> = self.rpc_call(url, "eth_getLogs", params).await?;
        raw.into_iter().map(EventLog::try_from).collect()
    }

    async fn code_at(&self, url: &str, address: &str) -> Result<Vec<u8>, AppError> {
        let code: String = self
            .rpc_call(url, "eth_getCode", json!([address, "latest"]))
            .await?;
        decode_code(&code)
    }

    async fn priv_code_at(
        &self,
        url: &str,
        privacy_group_id: &str,
        address: &str,
    ) -> Result<Vec<u8>, AppError> {
        let code: String = self
            .rpc_call(url, "priv_getCode", json!([privacy_group_id, address, "latest"]))
            .await?;
        decode_code(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_conversion() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": "0xaa",
            "blockHash": "0xbb",
            "blockNumber": "0x1b4",
            "transactionIndex": "0x1",
            "contractAddress": null,
            "gasUsed": "0x5208",
            "cumulativeGasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca07",
            "status": "0x1",
            "logs": [{
                "address": "0xcafe",
                "topics": ["0x01"],
                "data": "0x",
                "blockNumber": "0x1b4",
                "logIndex": "0x0"
            }]
        }))
        .unwrap();

        let receipt = Receipt::try_from(raw).unwrap();
        assert_eq!(receipt.block_number, 436);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(receipt.is_success());
        assert_eq!(receipt.logs[0].block_number, 436);
        assert_eq!(receipt.effective_gas_price.as_deref(), Some("0x3b9aca07"));
    }

    #[test]
    fn test_block_conversion_rejects_bad_number() {
        let raw = RpcBlock {
            number: "436".to_string(),
            hash: "0x01".to_string(),
            transactions: vec![],
        };
        assert!(matches!(
            Block::try_from(raw),
            Err(AppError::Blockchain(BlockchainError::InvalidResponse(_)))
        ));
    }

    #[test]
    fn test_decode_code() {
        assert!(decode_code("0x").unwrap().is_empty());
        assert_eq!(decode_code("0x6080").unwrap(), vec![0x60, 0x80]);
        assert!(decode_code("0xzz").is_err());
    }
}
