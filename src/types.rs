//! Typed wire shapes for the read client (C6) and transaction pipeline (C7).
//!
//! Addresses, hashes, and big quantities are the `alloy-primitives` types
//! (`Address`, `B256`, `U256`, `Bytes`); they already (de)serialize to/from
//! the canonical `0x`-hex quantity form this crate's wire codec produces, so
//! field types here just need the right JSON-RPC key names.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{hex_to_u64, u64_to_hex};
use crate::error::{Error, Result};

/// A block selector: a tag or an explicit height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Earliest,
    Pending,
    Safe,
    Finalized,
    Number(u64),
}

impl BlockTag {
    pub fn as_param(&self) -> Value {
        match self {
            BlockTag::Latest => Value::String("latest".into()),
            BlockTag::Earliest => Value::String("earliest".into()),
            BlockTag::Pending => Value::String("pending".into()),
            BlockTag::Safe => Value::String("safe".into()),
            BlockTag::Finalized => Value::String("finalized".into()),
            BlockTag::Number(n) => Value::String(u64_to_hex(*n)),
        }
    }
}

/// One entry of an EIP-2930 access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListItem {
    pub address: Address,
    #[serde(rename = "storageKeys", default)]
    pub storage_keys: Vec<B256>,
}

pub type AccessList = Vec<AccessListItem>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub number: Option<Quantity>,
    pub hash: Option<B256>,
    #[serde(rename = "parentHash")]
    pub parent_hash: B256,
    #[serde(rename = "stateRoot")]
    pub state_root: B256,
    pub miner: Address,
    #[serde(rename = "gasLimit")]
    pub gas_limit: Quantity,
    #[serde(rename = "gasUsed")]
    pub gas_used: Quantity,
    pub timestamp: Quantity,
    #[serde(rename = "baseFeePerGas")]
    pub base_fee_per_gas: Option<U256>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: Header,
    pub transactions: Vec<Value>,
    #[serde(default)]
    pub uncles: Vec<B256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub hash: B256,
    #[serde(default)]
    pub nonce: Quantity,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<B256>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<Quantity>,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: Option<U256>,
    #[serde(rename = "maxFeePerGas", default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(rename = "maxPriorityFeePerGas", default)]
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas: Quantity,
    pub input: Bytes,
    #[serde(rename = "chainId", default)]
    pub chain_id: Option<Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<Quantity>,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<B256>,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<Quantity>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: B256,
    #[serde(rename = "blockHash")]
    pub block_hash: B256,
    #[serde(rename = "blockNumber")]
    pub block_number: Quantity,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(rename = "contractAddress", default)]
    pub contract_address: Option<Address>,
    #[serde(rename = "gasUsed")]
    pub gas_used: Quantity,
    pub status: Option<Quantity>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

impl Receipt {
    /// `true` when the receipt carries a present, nonzero status. Per §4.7
    /// this is the sole signal that determines whether send-and-wait must
    /// replay the call to recover a revert reason.
    pub fn succeeded(&self) -> bool {
        self.status.map(|q| q.0 != 0).unwrap_or(false)
    }
}

/// A `0x`-hex-encoded unsigned 64-bit quantity, used for fields (nonce, gas,
/// block number, log index, ...) the wire format sends as quantities but
/// that never exceed 64 bits in practice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub u64);

impl Quantity {
    pub fn new(v: u64) -> Self {
        Self(v)
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<Quantity> for u64 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&u64_to_hex(self.0))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex_to_u64(&s).map(Quantity).map_err(serde::de::Error::custom)
    }
}

/// Address filter as accepted by `eth_getLogs`: a scalar address encodes as
/// a single string, more than one as an array (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFilter {
    Any,
    One(Address),
    Many(Vec<Address>),
}

impl AddressFilter {
    fn as_param(&self) -> Option<Value> {
        match self {
            AddressFilter::Any => None,
            AddressFilter::One(a) => Some(Value::String(a.to_string())),
            AddressFilter::Many(v) => {
                Some(Value::Array(v.iter().map(|a| Value::String(a.to_string())).collect()))
            }
        }
    }
}

/// One topic filter position: absent, a single hash, or an OR-set of hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    Any,
    One(B256),
    AnyOf(Vec<B256>),
}

impl TopicFilter {
    fn as_param(&self) -> Value {
        match self {
            TopicFilter::Any => Value::Null,
            TopicFilter::One(h) => Value::String(h.to_string()),
            TopicFilter::AnyOf(hs) => {
                Value::Array(hs.iter().map(|h| Value::String(h.to_string())).collect())
            }
        }
    }
}

/// `eth_getLogs` filter. Absent block-range fields are omitted from the
/// wire params entirely rather than sent as `null` (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub from_block: Option<BlockTag>,
    pub to_block: Option<BlockTag>,
    pub address: AddressFilterOrDefault,
    pub topics: Vec<TopicFilter>,
    pub block_hash: Option<B256>,
}

/// Wrapper so `Filter::default()` gets `AddressFilter::Any` without requiring
/// `AddressFilter: Default` to mean something else semantically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFilterOrDefault(pub AddressFilter);

impl Default for AddressFilterOrDefault {
    fn default() -> Self {
        Self(AddressFilter::Any)
    }
}

impl Filter {
    pub fn to_wire_params(&self) -> Value {
        let mut obj = serde_json::Map::new();
        if let Some(h) = self.block_hash {
            obj.insert("blockHash".into(), Value::String(h.to_string()));
        } else {
            if let Some(fb) = &self.from_block {
                obj.insert("fromBlock".into(), fb.as_param());
            }
            if let Some(tb) = &self.to_block {
                obj.insert("toBlock".into(), tb.as_param());
            }
        }
        if let Some(addr) = self.address.0.as_param() {
            obj.insert("address".into(), addr);
        }
        if !self.topics.is_empty() {
            let topics: Vec<Value> = self.topics.iter().map(TopicFilter::as_param).collect();
            obj.insert("topics".into(), Value::Array(topics));
        }
        Value::Object(obj)
    }
}

/// Result of `eth_simulateV1`: either a single block result or an array of
/// them, per spec §4.6 ("both forms must be accepted").
#[derive(Debug, Clone)]
pub enum SimulateResult {
    Single(Value),
    Many(Vec<Value>),
}

pub fn parse_simulate_result(v: Value) -> Result<SimulateResult> {
    match v {
        Value::Array(items) => Ok(SimulateResult::Many(items)),
        obj @ Value::Object(_) => Ok(SimulateResult::Single(obj)),
        other => Err(Error::MalformedResponse(format!(
            "eth_simulateV1 result was neither object nor array: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_roundtrip() {
        let q = Quantity(42);
        let s = serde_json::to_string(&q).unwrap();
        assert_eq!(s, "\"0x2a\"");
        let back: Quantity = serde_json::from_str(&s).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn filter_single_address_is_scalar() {
        let f = Filter {
            address: AddressFilterOrDefault(AddressFilter::One(Address::ZERO)),
            ..Default::default()
        };
        let v = f.to_wire_params();
        assert!(v.get("address").unwrap().is_string());
    }

    #[test]
    fn filter_multi_address_is_array() {
        let f = Filter {
            address: AddressFilterOrDefault(AddressFilter::Many(vec![Address::ZERO, Address::ZERO])),
            ..Default::default()
        };
        let v = f.to_wire_params();
        assert!(v.get("address").unwrap().is_array());
    }

    #[test]
    fn filter_omits_absent_block_range() {
        let f = Filter::default();
        let v = f.to_wire_params();
        assert!(v.get("fromBlock").is_none());
        assert!(v.get("toBlock").is_none());
    }

    #[test]
    fn block_hash_filter_suppresses_range() {
        let f = Filter {
            block_hash: Some(B256::ZERO),
            from_block: Some(BlockTag::Latest),
            ..Default::default()
        };
        let v = f.to_wire_params();
        assert!(v.get("blockHash").is_some());
        assert!(v.get("fromBlock").is_none());
    }
}
