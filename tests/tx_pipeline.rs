//! End-to-end transaction pipeline scenarios against a mocked HTTP JSON-RPC
//! server, covering the EIP-1559 send path and the send-and-wait revert
//! replay behavior.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chainlink_rpc_core::client::{ClientCore, ReadClient};
use chainlink_rpc_core::error::Result;
use chainlink_rpc_core::external::{ChainProfile, SignatureParts, Signer};
use chainlink_rpc_core::retry::RetryConfig;
use chainlink_rpc_core::rpc::http::HttpClient;
use chainlink_rpc_core::tx::{TransactionRequest, TxPipeline, UnsignedTx};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedSigner {
    address: Address,
}

#[async_trait]
impl Signer for FixedSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, _unsigned: &UnsignedTx, _chain_id: u64) -> Result<SignatureParts> {
        Ok(SignatureParts { r: [1u8; 32], s: [2u8; 32], y_parity: 0 })
    }
}

async fn pipeline_against(server: &MockServer) -> TxPipeline {
    let http = Arc::new(HttpClient::new(server.uri()).unwrap());
    let core = Arc::new(ClientCore::new(http, 1, RetryConfig::default()));
    let read = ReadClient::new(core);
    let signer = Arc::new(FixedSigner { address: Address::repeat_byte(0xaa) });
    TxPipeline::new(read, signer).with_chain_profile(ChainProfile {
        chain_id: 1,
        supports_1559: true,
        default_priority_fee: 1_000_000_000,
    })
}

fn respond(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "jsonrpc": "2.0", "id": 1, "result": result
    }))
}

#[tokio::test]
async fn eip1559_send_builds_typed_envelope_and_broadcasts() {
    let server = MockServer::start().await;

    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_chainId"})))
        .respond_with(respond(serde_json::json!("0x1")))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_getTransactionCount"})))
        .respond_with(respond(serde_json::json!("0x5")))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_estimateGas"})))
        .respond_with(respond(serde_json::json!("0x5208")))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_sendRawTransaction"})))
        .respond_with(respond(serde_json::json!(format!("0x{}", "ab".repeat(32)))))
        .mount(&server)
        .await;

    let pipeline = pipeline_against(&server).await;
    let req = TransactionRequest {
        from: None,
        to: Some(Address::repeat_byte(0xbb)),
        value: Some(U256::from(1_000_000_000_000_000_000u128)),
        ..Default::default()
    };

    let hash = pipeline.send(req).await.unwrap();
    assert_eq!(hash.as_slice().len(), 32);
}

#[tokio::test]
async fn send_and_wait_surfaces_revert_on_failed_receipt() {
    let server = MockServer::start().await;

    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_chainId"})))
        .respond_with(respond(serde_json::json!("0x1")))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_getTransactionCount"})))
        .respond_with(respond(serde_json::json!("0x0")))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_estimateGas"})))
        .respond_with(respond(serde_json::json!("0x5208")))
        .mount(&server)
        .await;
    let tx_hash = format!("0x{}", "cd".repeat(32));
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_sendRawTransaction"})))
        .respond_with(respond(serde_json::json!(tx_hash)))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_getTransactionReceipt"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {
                "transactionHash": tx_hash,
                "blockHash": format!("0x{}", "11".repeat(32)),
                "blockNumber": "0x2a",
                "from": format!("0x{}", "aa".repeat(20)),
                "to": format!("0x{}", "bb".repeat(20)),
                "gasUsed": "0x5208",
                "status": "0x0",
                "logs": []
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST")).and(path("/")).and(body_partial_json(serde_json::json!({"method": "eth_call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": 3, "message": "execution reverted", "data": "0x08c379a00000000000000000"}
        })))
        .mount(&server)
        .await;

    let pipeline = pipeline_against(&server).await;
    let req = TransactionRequest {
        to: Some(Address::repeat_byte(0xbb)),
        value: Some(U256::from(1u64)),
        ..Default::default()
    };

    let err = pipeline
        .send_and_wait(req, std::time::Duration::from_secs(2), std::time::Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, chainlink_rpc_core::error::Error::Revert(_)));
}
