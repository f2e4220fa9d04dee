//! HTTP adapter tests against `wiremock` servers.
//!
//! Covers the JSON-RPC chain client, the orchestration API client and the
//! webhook messenger.

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

// ============================================================================
// JSON-RPC CHAIN CLIENT
// ============================================================================

mod rpc_client_tests {
    use super::*;
    use std::time::Duration;
    use tx_orchestrator::domain::{AppError, BlockchainError, ChainClient, LogFilter};
    use tx_orchestrator::infra::{EthRpcClient, RpcClientConfig};

    fn client() -> EthRpcClient {
        EthRpcClient::new(RpcClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        })
        .unwrap()
    }

    fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    #[tokio::test]
    async fn test_latest_block_decodes_hex() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getBlockByNumber",
                "params": ["latest", false]
            })))
            .respond_with(rpc_result(json!({
                "number": "0x1b4",
                "hash": "0xdc0818cf78f21a8e70579cb46a43643f78291264dda342ae31049421c82d21ae",
                "transactions": ["0xaa", "0xbb"]
            })))
            .mount(&mock_server)
            .await;

        let block = client().latest_block(&mock_server.uri()).await.unwrap();
        assert_eq!(block.number, 436);
        assert_eq!(block.transactions, vec!["0xaa", "0xbb"]);
    }

    #[tokio::test]
    async fn test_block_by_number_sends_hex_quantity() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getBlockByNumber",
                "params": ["0xa", false]
            })))
            .respond_with(rpc_result(json!({
                "number": "0xa",
                "hash": "0x0a",
                "transactions": []
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let block = client().block_by_number(&mock_server.uri(), 10).await.unwrap();
        assert_eq!(block.number, 10);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(json!({
                "number": "0x2",
                "hash": "0x02",
                "transactions": []
            })))
            .with_priority(2)
            .mount(&mock_server)
            .await;

        let block = client().latest_block(&mock_server.uri()).await.unwrap();
        assert_eq!(block.number, 2);
    }

    #[tokio::test]
    async fn test_json_rpc_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "Method not found"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client()
            .private_transaction_receipt(&mock_server.uri(), "0xaa")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::RpcError(ref m)) if m.contains("-32601")
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_receipt_is_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionReceipt"})))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&mock_server)
            .await;

        let receipt = client()
            .transaction_receipt(&mock_server.uri(), "0xaa")
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_receipt_decodes_quantities() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getTransactionReceipt",
                "params": ["0xaa"]
            })))
            .respond_with(rpc_result(json!({
                "transactionHash": "0xaa",
                "blockHash": "0x02",
                "blockNumber": "0x2",
                "transactionIndex": "0x0",
                "contractAddress": "0x8f2a55949038a9610f50fb23b5883af3b4ecb3c3",
                "gasUsed": "0x5208",
                "cumulativeGasUsed": "0x5208",
                "status": "0x1",
                "logs": []
            })))
            .mount(&mock_server)
            .await;

        let receipt = client()
            .transaction_receipt(&mock_server.uri(), "0xaa")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.block_number, 2);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(receipt.is_success());
        assert_eq!(
            receipt.deployed_contract(),
            Some("0x8f2a55949038a9610f50fb23b5883af3b4ecb3c3")
        );
    }

    #[tokio::test]
    async fn test_filter_logs_and_code() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(rpc_result(json!([{
                "address": "0xcafe",
                "topics": ["0xddf252ad"],
                "data": "0x",
                "blockNumber": "0x3",
                "transactionHash": "0xaa",
                "logIndex": "0x0"
            }])))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getCode"})))
            .respond_with(rpc_result(json!("0x6080")))
            .mount(&mock_server)
            .await;

        let client = client();
        let logs = client
            .filter_logs(
                &mock_server.uri(),
                &LogFilter {
                    addresses: vec!["0xcafe".to_string()],
                    from_block: 1,
                    to_block: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 3);

        let code = client.code_at(&mock_server.uri(), "0xcafe").await.unwrap();
        assert_eq!(code, vec![0x60, 0x80]);
    }
}

// ============================================================================
// ORCHESTRATION API CLIENT
// ============================================================================

mod orchestration_client_tests {
    use super::*;
    use secrecy::SecretString;
    use tx_orchestrator::domain::{
        JobFilters, JobStatus, OrchestrationClient, UpdateJobRequest,
    };
    use tx_orchestrator::infra::{HttpOrchestrationClient, OrchestrationConfig};

    fn chain_json() -> serde_json::Value {
        json!({
            "uuid": "c1",
            "name": "besu",
            "chain_id": "1337",
            "urls": ["http://node:8545"],
            "listener_block_time_ms": 1000,
            "tenant_id": "acme"
        })
    }

    fn job_json(uuid: &str, status: &str) -> serde_json::Value {
        json!({
            "uuid": uuid,
            "schedule_uuid": null,
            "chain_uuid": "c1",
            "tenant_id": "acme",
            "type": "eth_transaction",
            "status": status,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_get_chain_caches_node_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/c1"))
            .and(header("X-Tenant-ID", "*"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chain_json()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = OrchestrationConfig::new(mock_server.uri());
        config.api_key = Some(SecretString::from("s3cret"));
        let client = HttpOrchestrationClient::new(config).unwrap();

        let chain = client.get_chain("c1").await.unwrap();
        assert_eq!(chain.chain_id, "1337");
        assert_eq!(client.chain_proxy_url("c1"), "http://node:8545");
    }

    #[tokio::test]
    async fn test_proxy_mode_ignores_cached_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chain_json()))
            .mount(&mock_server)
            .await;

        let mut config = OrchestrationConfig::new(mock_server.uri());
        config.use_proxy = true;
        let client = HttpOrchestrationClient::new(config).unwrap();

        client.get_chain("c1").await.unwrap();
        assert_eq!(
            client.chain_proxy_url("c1"),
            format!("{}/proxy/chains/c1", mock_server.uri())
        );
    }

    #[tokio::test]
    async fn test_search_jobs_sends_filters() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs"))
            .and(query_param("status", "PENDING"))
            .and(query_param("chain_uuid", "c1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([job_json("j1", "PENDING")])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpOrchestrationClient::new(OrchestrationConfig::new(mock_server.uri())).unwrap();
        let jobs = client
            .search_jobs(&JobFilters {
                status: Some(JobStatus::Pending),
                chain_uuid: Some("c1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_job_maps_invalid_state() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/jobs/j1"))
            .and(body_partial_json(json!({"status": "MINED"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "invalid_state", "message": "job j1 is already MINED"}
            })))
            .mount(&mock_server)
            .await;

        let client = HttpOrchestrationClient::new(OrchestrationConfig::new(mock_server.uri())).unwrap();
        let err = client
            .update_job("j1", &UpdateJobRequest::status(JobStatus::Mined, "mined"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert!(err.to_string().contains("already MINED"));
    }

    #[tokio::test]
    async fn test_unavailable_api_is_retryable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/jobs/j1/resend"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let client = HttpOrchestrationClient::new(OrchestrationConfig::new(mock_server.uri())).unwrap();
        let err = client.resend_job_tx("j1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "not_found", "message": "job missing not found"}
            })))
            .mount(&mock_server)
            .await;

        let client = HttpOrchestrationClient::new(OrchestrationConfig::new(mock_server.uri())).unwrap();
        assert!(client.get_job("missing").await.unwrap_err().is_not_found());
    }
}

// ============================================================================
// WEBHOOK MESSENGER
// ============================================================================

mod webhook_tests {
    use super::*;
    use tx_orchestrator::domain::{ContractEventLogsMessage, EventLog, NotificationClient};
    use tx_orchestrator::infra::WebhookNotifier;

    fn message() -> ContractEventLogsMessage {
        ContractEventLogsMessage {
            chain_uuid: "c1".to_string(),
            chain_id: "1337".to_string(),
            subscription_uuid: "s1".to_string(),
            tenant_id: "acme".to_string(),
            logs: vec![EventLog {
                address: "0xcafe".to_string(),
                block_number: 3,
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_message_is_posted_as_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_partial_json(json!({"subscription_uuid": "s1", "chain_id": "1337"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/events", mock_server.uri()))).unwrap();
        notifier.contract_event_logs_message(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(Some(mock_server.uri())).unwrap();
        let err = notifier.contract_event_logs_message(&message()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_without_url_messages_are_dropped() {
        let notifier = WebhookNotifier::new(None).unwrap();
        notifier.contract_event_logs_message(&message()).await.unwrap();
    }
}
