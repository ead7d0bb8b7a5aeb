//! Transaction pipeline (C7): fill defaults, sign, broadcast, and poll for a
//! receipt with exponential poll-interval growth and revert-reason
//! extraction via replay.
//!
//! Grounded in the teacher's `tx::send`/`tx::build` shape (the overall
//! build→sign→broadcast→poll pipeline, gas-estimation constants reused
//! as-is) but replacing its CBOR envelope and fixed poll interval with RLP
//! encoding (`tx::encode`) and the exponential growth spec §4.7 requires.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::client::ReadClient;
use crate::error::{Error, Result};
use crate::external::{ChainProfile, MetricsSink, NoopMetricsSink, Signer};
use crate::tx::encode::{encode_signed, legacy_v};
use crate::tx::types::{TransactionRequest, UnsignedTx};
use crate::types::BlockTag;

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct TxPipeline {
    pub read: ReadClient,
    pub signer: Arc<dyn Signer>,
    pub chain_profile: Option<ChainProfile>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl TxPipeline {
    pub fn new(read: ReadClient, signer: Arc<dyn Signer>) -> Self {
        Self { read, signer, chain_profile: None, metrics: Arc::new(NoopMetricsSink) }
    }

    #[must_use]
    pub fn with_chain_profile(mut self, profile: ChainProfile) -> Self {
        self.chain_profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Fill defaults, sign, and broadcast. Returns the broadcast transaction
    /// hash.
    #[instrument(skip(self, req))]
    pub async fn send(&self, req: TransactionRequest) -> Result<B256> {
        let (hash, _replay) = self.build_and_broadcast(req).await?;
        Ok(hash)
    }

    /// Broadcast, then poll for a receipt. Polling starts at `poll_interval`
    /// and doubles after every miss, capped at 10s; total elapsed never
    /// exceeds `timeout` by more than one interval. A mined receipt with
    /// `status=false` is never surfaced as success: the original call is
    /// replayed at the mined block to recover the revert reason.
    #[instrument(skip(self, req))]
    pub async fn send_and_wait(
        &self,
        req: TransactionRequest,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<crate::types::Receipt> {
        let (hash, replay_call) = self.build_and_broadcast(req).await?;
        let deadline = Instant::now() + timeout;
        let mut interval = poll_interval;

        loop {
            if let Some(receipt) = self.read.transaction_receipt(hash).await? {
                if receipt.succeeded() {
                    return Ok(receipt);
                }
                return Err(self.decode_revert_via_replay(&replay_call, receipt.block_number, hash).await);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ReceiptTimeout { tx_hash: format!("{hash:#x}"), elapsed: timeout });
            }
            let remaining = deadline - now;
            tokio::time::sleep(interval.min(remaining)).await;
            interval = crate::rpc::ws::next_poll_interval(interval).min(MAX_POLL_INTERVAL);
        }
    }

    async fn decode_revert_via_replay(&self, replay_call: &Value, mined_block: crate::types::Quantity, hash: B256) -> Error {
        let tag = BlockTag::Number(mined_block.0);
        match self.read.call(replay_call.clone(), tag).await {
            Err(Error::Revert(info)) => {
                warn!(tx_hash = %format!("{hash:#x}"), reason = %info.reason, "transaction mined but reverted");
                Error::Revert(info)
            }
            Err(other) => other,
            Ok(_) => {
                // The node accepted the replay without reverting (e.g. state
                // has since moved on); we still owe the caller a revert kind
                // per spec §4.7, just without a decoded reason.
                Error::Revert(crate::error::RevertInfo {
                    kind: "unknown".into(),
                    reason: "transaction mined with status=false but replay did not reproduce a revert".into(),
                    raw_hex: String::new(),
                })
            }
        }
    }

    async fn build_and_broadcast(&self, req: TransactionRequest) -> Result<(B256, Value)> {
        let chain_id = self.read.core.chain_id().await?;
        let from = req.from.unwrap_or_else(|| self.signer.address());

        let use_1559 = if req.wants_eip1559() {
            let supported = self.chain_profile.map(|p| p.supports_1559).unwrap_or(true);
            if !supported {
                self.metrics.on_legacy_fallback("chain does not support EIP-1559");
                info!("falling back to legacy pricing: chain profile reports no EIP-1559 support");
            }
            supported
        } else {
            false
        };

        let nonce = match req.nonce {
            Some(n) => n,
            None => self.read.transaction_count(from, BlockTag::Pending).await?,
        };

        let to = req.to;
        let value = req.value.unwrap_or(U256::ZERO);
        let data = req.data.clone().unwrap_or_default();

        let replay_call = build_call_object(from, to, value, &data);

        let gas_limit = match req.gas_limit {
            Some(g) => g,
            None => self.read.estimate_gas(replay_call.clone()).await?,
        };

        let unsigned = if use_1559 {
            let priority = req
                .max_priority_fee_per_gas
                .or_else(|| self.chain_profile.map(|p| p.default_priority_fee))
                .unwrap_or(1_000_000_000);
            // Per the conservative reading of the source behavior (see
            // DESIGN.md): max_fee defaults to priority and, if explicitly
            // given, is clamped up to at least priority. It is not clamped
            // to the current base fee.
            let max_fee = req.max_fee_per_gas.map(|f| f.max(priority)).unwrap_or(priority);
            UnsignedTx::Eip1559 {
                chain_id,
                nonce,
                max_priority_fee_per_gas: priority,
                max_fee_per_gas: max_fee,
                gas_limit,
                to,
                value,
                data: data.clone(),
                access_list: req.access_list.clone().unwrap_or_default(),
            }
        } else {
            let gas_price = match req.gas_price {
                Some(p) => p,
                None => u128::try_from(self.read.gas_price().await?).unwrap_or(u128::MAX),
            };
            UnsignedTx::Legacy { nonce, gas_price, gas_limit, to, value, data: data.clone(), chain_id }
        };

        let sig = self.signer.sign(&unsigned, chain_id).await?;
        let v = match &unsigned {
            UnsignedTx::Legacy { .. } => legacy_v(chain_id, sig.y_parity),
            UnsignedTx::Eip1559 { .. } => sig.y_parity as u64,
        };

        let encoded = encode_signed(&unsigned, v, sig.r, sig.s);
        let raw_hex = format!("0x{}", hex::encode(&encoded));

        let hash = match self.read.core.call_raw("eth_sendRawTransaction", serde_json::json!([raw_hex])).await {
            Ok(v) => parse_tx_hash(&v)?,
            Err(Error::Rpc(obj)) => {
                if let Some(raw) = obj.revert_data() {
                    return Err(Error::Revert(self.read.core.revert_decoder.decode(raw)));
                }
                if obj.message.to_lowercase().contains("invalid sender") {
                    return Err(Error::InvalidSender(obj.message));
                }
                return Err(Error::Rpc(obj));
            }
            Err(e) => return Err(e),
        };

        Ok((hash, replay_call))
    }
}

fn build_call_object(from: Address, to: Option<Address>, value: U256, data: &Bytes) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("from".into(), Value::String(from.to_string()));
    if let Some(to) = to {
        obj.insert("to".into(), Value::String(to.to_string()));
    }
    obj.insert("value".into(), Value::String(format!("0x{value:x}")));
    obj.insert("data".into(), Value::String(format!("0x{}", hex::encode(data))));
    Value::Object(obj)
}

fn parse_tx_hash(v: &Value) -> Result<B256> {
    let s = v.as_str().ok_or_else(|| Error::MalformedResponse("eth_sendRawTransaction result not a string".into()))?;
    s.parse::<B256>().map_err(|e| Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_object_omits_absent_to() {
        let obj = build_call_object(Address::ZERO, None, U256::ZERO, &Bytes::new());
        assert!(obj.get("to").is_none());
    }

    #[test]
    fn call_object_includes_to_when_present() {
        let obj = build_call_object(Address::ZERO, Some(Address::repeat_byte(1)), U256::ZERO, &Bytes::new());
        assert!(obj.get("to").is_some());
    }
}
