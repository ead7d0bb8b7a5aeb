//! Minimal contracts for the collaborators this crate assumes but does not
//! implement: signing, ABI-aware revert decoding, chain metadata, and
//! metrics. Production code supplies real implementations (a hardware or
//! software wallet, an ABI-driven decoder, a chain registry, a metrics
//! exporter); tests supply trivial stand-ins.

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::error::{RevertInfo, Result};
use crate::tx::types::UnsignedTx;

/// A raw ECDSA signature over an unsigned transaction: `(r, s, y_parity)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub y_parity: u8,
}

/// External signer: recovers/exposes the sending address and produces
/// signatures over unsigned transaction envelopes. Key management, key
/// derivation, and the actual ECDSA math are this crate's caller's problem —
/// secp256k1 is explicitly out of scope here.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, unsigned: &UnsignedTx, chain_id: u64) -> Result<SignatureParts>;
}

/// External revert decoder: turns a `0x…` ABI-encoded revert payload into a
/// human-meaningful reason. ABI decoding itself is out of scope; this crate
/// only calls through the trait when a response carries a revert payload.
pub trait RevertDecoder: Send + Sync {
    fn decode(&self, raw_hex: &str) -> RevertInfo;
}

/// Fallback decoder used when no real one is configured: preserves the raw
/// payload without attempting to interpret it.
pub struct OpaqueRevertDecoder;

impl RevertDecoder for OpaqueRevertDecoder {
    fn decode(&self, raw_hex: &str) -> RevertInfo {
        RevertInfo {
            kind: "opaque".to_string(),
            reason: raw_hex.to_string(),
            raw_hex: raw_hex.to_string(),
        }
    }
}

/// Chain metadata the transaction pipeline needs to pick fee defaults and
/// decide legacy-vs-1559. Chain registries/profiles at large are out of
/// scope; this is the narrow slice C7 actually reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainProfile {
    pub chain_id: u64,
    pub supports_1559: bool,
    pub default_priority_fee: u128,
}

/// Observability hooks. All methods default to doing nothing, so a caller
/// that doesn't care about metrics pays nothing beyond a vtable call.
pub trait MetricsSink: Send + Sync {
    fn on_backpressure(&self) {}
    fn on_timeout(&self, _method: &str) {}
    fn on_ring_saturation(&self, _free: usize, _capacity: usize) {}
    fn on_reconnect(&self, _attempt: u32) {}
    fn on_legacy_fallback(&self, _reason: &str) {}
}

/// No-op sink, the default when a caller doesn't configure one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_decoder_passes_through() {
        let d = OpaqueRevertDecoder;
        let info = d.decode("0xdeadbeef");
        assert_eq!(info.raw_hex, "0xdeadbeef");
        assert_eq!(info.reason, "0xdeadbeef");
    }

    #[test]
    fn noop_sink_is_inert() {
        let s = NoopMetricsSink;
        s.on_backpressure();
        s.on_timeout("eth_call");
        s.on_ring_saturation(10, 100);
    }
}
