//! Read client (C6): typed blockchain read operations layered over any
//! [`crate::rpc::Transport`] through the retry engine (C4).
//!
//! Grounded in `evm_provider::ChainProvider`'s operation set (chain id,
//! balance, nonce, call, gas price, ...) and `MegaEthClient`'s
//! `#[instrument]` + typed-method style, re-targeted at this crate's own
//! error/quantity types instead of alloy's provider stack.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::codec::u64_to_hex;
use crate::error::{Error, Result};
use crate::external::{MetricsSink, NoopMetricsSink, OpaqueRevertDecoder, RevertDecoder};
use crate::retry::{self, RetryConfig};
use crate::rpc::Transport;
use crate::types::{BlockTag, Filter, Quantity, Receipt, SimulateResult, TransactionView};

/// Shared core every typed client (read-only, signing, test-node) wraps.
/// Holds the transport, retry policy, and the once-per-client cached chain
/// id (validated against an optional expected value *before* caching, per
/// spec §3/§7 — implemented with a [`tokio::sync::OnceCell`], which gives
/// the same "exactly once, losers observe the winner, never cache on
/// failure" semantics the design notes ask for without hand-rolling atomics
/// for what is an infrequent, one-shot operation).
pub struct ClientCore {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) max_retries: u32,
    pub(crate) retry_config: RetryConfig,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) revert_decoder: Arc<dyn RevertDecoder>,
    pub(crate) expected_chain_id: Option<u64>,
    chain_id_cache: OnceCell<u64>,
}

impl ClientCore {
    pub fn new(transport: Arc<dyn Transport>, max_retries: u32, retry_config: RetryConfig) -> Self {
        Self {
            transport,
            max_retries,
            retry_config,
            metrics: Arc::new(NoopMetricsSink),
            revert_decoder: Arc::new(OpaqueRevertDecoder),
            expected_chain_id: None,
            chain_id_cache: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    #[must_use]
    pub fn with_revert_decoder(mut self, decoder: Arc<dyn RevertDecoder>) -> Self {
        self.revert_decoder = decoder;
        self
    }

    #[must_use]
    pub fn with_expected_chain_id(mut self, id: u64) -> Self {
        self.expected_chain_id = Some(id);
        self
    }

    /// Exposed to other in-crate components (the transaction pipeline) that
    /// need to issue a method not otherwise wrapped by [`ReadClient`], e.g.
    /// `eth_sendRawTransaction`.
    pub(crate) async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        self.call(method, params).await
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let transport = self.transport.clone();
        let method_owned = method.to_string();
        retry::run(
            move || {
                let transport = transport.clone();
                let method = method_owned.clone();
                let params = params.clone();
                async move { transport.call(&method, params).await }
            },
            self.max_retries.max(1),
            &self.retry_config,
        )
        .await
    }

    /// Resolve the chain id, fetching and caching it on first use. If an
    /// expected chain id was configured, a mismatch raises
    /// [`Error::ChainMismatch`] and nothing is cached.
    pub async fn chain_id(&self) -> Result<u64> {
        let expected = self.expected_chain_id;
        self.chain_id_cache
            .get_or_try_init(|| async move {
                let v = self.call("eth_chainId", Value::Array(vec![])).await?;
                let hex = v.as_str().ok_or_else(|| Error::MalformedResponse("eth_chainId result not a string".into()))?;
                let got = crate::codec::hex_to_u64(hex)?;
                if let Some(exp) = expected {
                    if exp != got {
                        return Err(Error::ChainMismatch { expected: exp, got });
                    }
                }
                Ok(got)
            })
            .await
            .copied()
    }
}

/// Typed read-only client. `Arc<ClientCore>` so it's cheap to clone and
/// share across tasks (e.g. handed to the transaction pipeline too).
#[derive(Clone)]
pub struct ReadClient {
    pub(crate) core: Arc<ClientCore>,
    /// Present only when this client was built directly over HTTP, so
    /// `batch_raw` can use the transport's native batch endpoint instead of
    /// issuing N individual calls.
    http: Option<Arc<crate::rpc::http::HttpClient>>,
}

impl ReadClient {
    pub fn new(core: Arc<ClientCore>) -> Self {
        Self { core, http: None }
    }

    #[instrument(skip(self))]
    pub async fn chain_id(&self) -> Result<u64> {
        self.core.chain_id().await
    }

    #[instrument(skip(self))]
    pub async fn block_by_number(&self, tag: BlockTag) -> Result<Option<crate::types::Block>> {
        let v = self
            .core
            .call("eth_getBlockByNumber", serde_json::json!([tag.as_param(), false]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(v).map_err(|e| Error::Parse(e.to_string()))?))
    }

    #[instrument(skip(self))]
    pub async fn balance(&self, address: Address, tag: BlockTag) -> Result<U256> {
        let v = self.core.call("eth_getBalance", serde_json::json!([address, tag.as_param()])).await?;
        parse_u256(&v)
    }

    #[instrument(skip(self))]
    pub async fn code(&self, address: Address, tag: BlockTag) -> Result<Bytes> {
        let v = self.core.call("eth_getCode", serde_json::json!([address, tag.as_param()])).await?;
        parse_bytes(&v)
    }

    #[instrument(skip(self))]
    pub async fn storage_at(&self, address: Address, slot: B256, tag: BlockTag) -> Result<B256> {
        let v = self
            .core
            .call("eth_getStorageAt", serde_json::json!([address, slot, tag.as_param()]))
            .await?;
        v.as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| Error::MalformedResponse("eth_getStorageAt result not a 32-byte hex string".into()))
    }

    #[instrument(skip(self))]
    pub async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TransactionView>> {
        let v = self.core.call("eth_getTransactionByHash", serde_json::json!([hash])).await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(v).map_err(|e| Error::Parse(e.to_string()))?))
    }

    #[instrument(skip(self))]
    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let v = self.core.call("eth_getTransactionReceipt", serde_json::json!([hash])).await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(v).map_err(|e| Error::Parse(e.to_string()))?))
    }

    #[instrument(skip(self, call_obj))]
    pub async fn call(&self, call_obj: Value, tag: BlockTag) -> Result<Bytes> {
        match self.core.call("eth_call", serde_json::json!([call_obj, tag.as_param()])).await {
            Ok(v) => parse_bytes(&v),
            Err(Error::Rpc(obj)) => {
                if let Some(raw) = obj.revert_data() {
                    let info = self.core.revert_decoder.decode(raw);
                    Err(Error::Revert(info))
                } else {
                    Err(Error::Rpc(obj))
                }
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn logs(&self, filter: &Filter) -> Result<Vec<crate::types::Log>> {
        let v = self.core.call("eth_getLogs", serde_json::json!([filter.to_wire_params()])).await?;
        serde_json::from_value(v).map_err(|e| Error::Parse(e.to_string()))
    }

    #[instrument(skip(self, call_obj))]
    pub async fn estimate_gas(&self, call_obj: Value) -> Result<u64> {
        let v = self.core.call("eth_estimateGas", serde_json::json!([call_obj])).await?;
        parse_u64(&v)
    }

    #[instrument(skip(self, call_obj))]
    pub async fn create_access_list(&self, call_obj: Value, tag: BlockTag) -> Result<Value> {
        self.core.call("eth_createAccessList", serde_json::json!([call_obj, tag.as_param()])).await
    }

    /// `eth_simulateV1`. A "method not found" error is surfaced distinctly
    /// so callers can fall back rather than treat it as a generic RPC error.
    #[instrument(skip(self, payload))]
    pub async fn simulate(&self, payload: Value) -> Result<SimulateResult> {
        match self.core.call("eth_simulateV1", serde_json::json!([payload])).await {
            Ok(v) => crate::types::parse_simulate_result(v),
            Err(Error::Rpc(obj)) if obj.code == -32601 => Err(Error::SimulateUnsupported),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn blob_base_fee(&self) -> Result<U256> {
        let v = self.core.call("eth_blobBaseFee", Value::Array(vec![])).await?;
        parse_u256(&v)
    }

    #[instrument(skip(self))]
    pub async fn gas_price(&self) -> Result<U256> {
        let v = self.core.call("eth_gasPrice", Value::Array(vec![])).await?;
        parse_u256(&v)
    }

    #[instrument(skip(self))]
    pub async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64> {
        let v = self
            .core
            .call("eth_getTransactionCount", serde_json::json!([address, tag.as_param()]))
            .await?;
        parse_u64(&v)
    }

    /// Submit several read calls as one JSON-RPC batch, when the underlying
    /// transport is HTTP (the teacher's `batch()`, generalized here).
    pub async fn batch_raw(&self, calls: Vec<(String, Value)>) -> Result<Vec<Result<Value>>> {
        if let Some(http) = &self.http {
            return http.batch(calls).await;
        }
        // WebSocket multiplexing already gives us effectively-concurrent
        // dispatch; just fan the calls out individually.
        let mut out = Vec::with_capacity(calls.len());
        for (m, p) in calls {
            out.push(self.core.call(&m, p).await);
        }
        Ok(out)
    }

    /// Build a read client whose batch operations go through the HTTP
    /// client's native batch endpoint instead of N individual calls.
    pub fn from_http(http: Arc<crate::rpc::http::HttpClient>, max_retries: u32, retry_config: RetryConfig) -> Self {
        let core = Arc::new(ClientCore::new(http.clone(), max_retries, retry_config));
        Self { core, http: Some(http) }
    }
}

fn parse_u256(v: &Value) -> Result<U256> {
    let s = v.as_str().ok_or_else(|| Error::MalformedResponse("expected hex-quantity string".into()))?;
    s.parse::<U256>().map_err(|e| Error::Parse(e.to_string()))
}

fn parse_u64(v: &Value) -> Result<u64> {
    let s = v.as_str().ok_or_else(|| Error::MalformedResponse("expected hex-quantity string".into()))?;
    crate::codec::hex_to_u64(s)
}

fn parse_bytes(v: &Value) -> Result<Bytes> {
    let s = v.as_str().ok_or_else(|| Error::MalformedResponse("expected hex-bytes string".into()))?;
    s.parse::<Bytes>().map_err(|e| Error::Parse(e.to_string()))
}

pub(crate) fn quantity_param(v: u64) -> Value {
    Value::String(u64_to_hex(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::http::HttpClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_against(server: &MockServer) -> ReadClient {
        let http = Arc::new(HttpClient::new(server.uri()).unwrap());
        let core = Arc::new(ClientCore::new(http, 3, RetryConfig::default()));
        ReadClient::new(core)
    }

    #[tokio::test]
    async fn chain_id_caches_after_first_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        assert_eq!(client.chain_id().await.unwrap(), 1);
        assert_eq!(client.chain_id().await.unwrap(), 1); // cached, no second request
    }

    #[tokio::test]
    async fn call_revert_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": 3, "message": "execution reverted", "data": "0x08c379a00000000000000000"}
            })))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let err = client.call(serde_json::json!({}), BlockTag::Latest).await.unwrap_err();
        assert!(matches!(err, Error::Revert(_)));
    }

    #[tokio::test]
    async fn simulate_unsupported_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let err = client.simulate(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::SimulateUnsupported));
    }
}
