//! RLP encoding of transaction envelopes (spec §3/§4.7 step 7), via the
//! `rlp` crate — one of the teacher pack's own dependencies
//! (`paritytech-parity-bridges-common`'s Ethereum primitives) — rather than
//! a hand-rolled encoder. Keccak hashing (for the signing hash) goes through
//! `sha3`, also already in the dependency stack.
//!
//! RLP itself and the hash function are the "primitives" spec §1 calls
//! external; this module only arranges fields into the wire shape and calls
//! through to those crates.

use alloy_primitives::{B256, U256};
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

use crate::tx::types::{eip155_v, UnsignedTx};

const EIP1559_TYPE: u8 = 0x02;

fn trimmed_be(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(i) => &bytes[i..],
        None => &[],
    }
}

fn append_u256(s: &mut RlpStream, v: U256) {
    let bytes = v.to_be_bytes::<32>();
    s.append(&trimmed_be(&bytes));
}

fn append_u128(s: &mut RlpStream, v: u128) {
    let bytes = v.to_be_bytes();
    s.append(&trimmed_be(&bytes));
}

fn append_to(s: &mut RlpStream, to: Option<alloy_primitives::Address>) {
    match to {
        Some(addr) => {
            s.append(&addr.as_slice());
        }
        None => {
            s.append_empty_data();
        }
    }
}

fn append_access_list(s: &mut RlpStream, list: &[crate::types::AccessListItem]) {
    s.begin_list(list.len());
    for item in list {
        s.begin_list(2);
        s.append(&item.address.as_slice());
        s.begin_list(item.storage_keys.len());
        for key in &item.storage_keys {
            s.append(&key.as_slice());
        }
    }
}

/// The RLP payload whose keccak256 is signed: for legacy this is the
/// EIP-155 form `(nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0)`;
/// for EIP-1559 it's the typed payload with the `0x02` prefix, *not*
/// included in the hashed bytes (the type byte is part of the signing
/// preimage per EIP-2718, so it *is* hashed — see below).
pub fn signing_hash(unsigned: &UnsignedTx) -> B256 {
    let bytes = match unsigned {
        UnsignedTx::Legacy { nonce, gas_price, gas_limit, to, value, data, chain_id } => {
            let mut s = RlpStream::new_list(9);
            s.append(nonce);
            append_u128(&mut s, *gas_price);
            s.append(gas_limit);
            append_to(&mut s, *to);
            append_u256(&mut s, *value);
            s.append(&data.as_ref());
            s.append(chain_id);
            s.append_empty_data();
            s.append_empty_data();
            s.out().to_vec()
        }
        UnsignedTx::Eip1559 { .. } => encode_eip1559(unsigned, None),
    };
    B256::from_slice(Keccak256::digest(&bytes).as_slice())
}

/// Encode a signed transaction to its final wire bytes, ready for
/// `eth_sendRawTransaction`.
pub fn encode_signed(unsigned: &UnsignedTx, v: u64, r: [u8; 32], s_: [u8; 32]) -> Vec<u8> {
    match unsigned {
        UnsignedTx::Legacy { nonce, gas_price, gas_limit, to, value, data, .. } => {
            let mut s = RlpStream::new_list(9);
            s.append(nonce);
            append_u128(&mut s, *gas_price);
            s.append(gas_limit);
            append_to(&mut s, *to);
            append_u256(&mut s, *value);
            s.append(&data.as_ref());
            s.append(&v);
            s.append(&trimmed_be(&r));
            s.append(&trimmed_be(&s_));
            s.out().to_vec()
        }
        UnsignedTx::Eip1559 { .. } => encode_eip1559(unsigned, Some((v, r, s_))),
    }
}

fn encode_eip1559(unsigned: &UnsignedTx, sig: Option<(u64, [u8; 32], [u8; 32])>) -> Vec<u8> {
    let UnsignedTx::Eip1559 {
        chain_id,
        nonce,
        max_priority_fee_per_gas,
        max_fee_per_gas,
        gas_limit,
        to,
        value,
        data,
        access_list,
    } = unsigned
    else {
        unreachable!("encode_eip1559 called with a non-1559 variant");
    };

    let field_count = if sig.is_some() { 12 } else { 9 };
    let mut s = RlpStream::new_list(field_count);
    s.append(chain_id);
    s.append(nonce);
    append_u128(&mut s, *max_priority_fee_per_gas);
    append_u128(&mut s, *max_fee_per_gas);
    s.append(gas_limit);
    append_to(&mut s, *to);
    append_u256(&mut s, *value);
    s.append(&data.as_ref());
    append_access_list(&mut s, access_list);
    if let Some((v, r, sig_s)) = sig {
        s.append(&v);
        s.append(&trimmed_be(&r));
        s.append(&trimmed_be(&sig_s));
    }

    let mut out = Vec::with_capacity(1 + s.out().len());
    out.push(EIP1559_TYPE);
    out.extend_from_slice(&s.out());
    out
}

/// Recover the EIP-155 `v` for a legacy transaction from a raw y-parity.
pub fn legacy_v(chain_id: u64, y_parity: u8) -> u64 {
    eip155_v(chain_id, y_parity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn sample_legacy() -> UnsignedTx {
        UnsignedTx::Legacy {
            nonce: 5,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(0x11)),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
            chain_id: 1,
        }
    }

    fn sample_eip1559() -> UnsignedTx {
        UnsignedTx::Eip1559 {
            chain_id: 1,
            nonce: 5,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 1_000_000_000,
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(0x11)),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
            access_list: vec![],
        }
    }

    #[test]
    fn eip1559_signed_envelope_starts_with_type_byte() {
        let tx = sample_eip1559();
        let encoded = encode_signed(&tx, 0, [1u8; 32], [2u8; 32]);
        assert_eq!(encoded[0], EIP1559_TYPE);
    }

    #[test]
    fn legacy_signing_hash_is_32_bytes_and_deterministic() {
        let tx = sample_legacy();
        let h1 = signing_hash(&tx);
        let h2 = signing_hash(&tx);
        assert_eq!(h1, h2);
        assert_eq!(h1.as_slice().len(), 32);
    }

    #[test]
    fn eip1559_signing_hash_differs_from_legacy() {
        let h_legacy = signing_hash(&sample_legacy());
        let h_1559 = signing_hash(&sample_eip1559());
        assert_ne!(h_legacy, h_1559);
    }

    #[test]
    fn legacy_v_matches_eip155() {
        assert_eq!(legacy_v(1, 1), 38);
    }
}
