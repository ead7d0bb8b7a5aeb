//! Transaction data model (spec §3): the user-facing request with every
//! field optional, and the two unsigned envelope variants as a tagged sum
//! rather than an inheritance hierarchy (design notes §9).

use alloy_primitives::{Address, Bytes, U256};

use crate::types::AccessList;

/// User-supplied transaction request; any field may be absent and is filled
/// in by the pipeline (C7) before signing.
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub data: Option<Bytes>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub access_list: Option<AccessList>,
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    /// EIP-1559 is the pipeline's default pricing mode (per spec §4.7 step
    /// 3, "if EIP-1559 is requested"): a request wants it unless the caller
    /// explicitly pins a legacy `gas_price`, which is read as an opt-out.
    /// Chain support (or lack of it) then decides what the pipeline
    /// actually does with that preference.
    pub fn wants_eip1559(&self) -> bool {
        self.gas_price.is_none()
    }
}

/// A fully-filled, not-yet-signed transaction, as one of the two wire
/// variants.
#[derive(Debug, Clone)]
pub enum UnsignedTx {
    Legacy {
        nonce: u64,
        gas_price: u128,
        gas_limit: u64,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        chain_id: u64,
    },
    Eip1559 {
        chain_id: u64,
        nonce: u64,
        max_priority_fee_per_gas: u128,
        max_fee_per_gas: u128,
        gas_limit: u64,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        access_list: AccessList,
    },
}

impl UnsignedTx {
    pub fn chain_id(&self) -> u64 {
        match self {
            UnsignedTx::Legacy { chain_id, .. } => *chain_id,
            UnsignedTx::Eip1559 { chain_id, .. } => *chain_id,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            UnsignedTx::Legacy { nonce, .. } => *nonce,
            UnsignedTx::Eip1559 { nonce, .. } => *nonce,
        }
    }
}

/// A signed transaction, ready for RLP encoding and broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub unsigned: UnsignedTx,
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// The final recovery byte on the wire: EIP-155-folded for legacy
    /// (`chain_id*2 + 35 + y_parity`), bare `y_parity` (0 or 1) for
    /// EIP-1559. Computed once at signing time, per variant rule (design
    /// notes §9: "a per-variant rule, not a virtual method").
    pub v: u64,
}

/// Fold a legacy recovery bit into its EIP-155 `v` value.
pub fn eip155_v(chain_id: u64, y_parity: u8) -> u64 {
    chain_id * 2 + 35 + y_parity as u64
}
