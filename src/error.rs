//! Crate-wide error type.
//!
//! One flat, `#[non_exhaustive]` enum covers every error kind named in the
//! transport/retry/transaction design: parse errors, HTTP status errors,
//! JSON-RPC domain errors, reverts, timeouts, backpressure, closed
//! transports, chain-id mismatches, and the rest. Retry classification
//! (`is_retryable`) lives here so the retry engine and the transports agree
//! on what counts as transient.

use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structured JSON-RPC error object as carried in a response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcErrorObj {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl RpcErrorObj {
    pub fn new(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self { code, message: message.into(), data }
    }

    /// The `0x…` data payload, if present and long enough to plausibly carry a
    /// revert reason (spec: length > 10 hex chars after the prefix).
    pub fn revert_data(&self) -> Option<&str> {
        let data = self.data.as_ref()?.as_str()?;
        if data.starts_with("0x") && data.len() > 10 {
            Some(data)
        } else {
            None
        }
    }
}

impl fmt::Display for RpcErrorObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(d) => write!(f, "rpc error {}: {} (data={})", self.code, self.message, d),
            None => write!(f, "rpc error {}: {}", self.code, self.message),
        }
    }
}

/// Decoded revert reason, produced by an external revert decoder (see
/// [`crate::external::RevertDecoder`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertInfo {
    pub kind: String,
    pub reason: String,
    pub raw_hex: String,
}

/// Top-level SDK error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Wire decoding failed (malformed envelope, bad hex quantity, ...).
    #[error("parse error: {0}")]
    Parse(String),

    /// Non-2xx HTTP response; body is preserved (truncated).
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    /// Underlying network/connect failure (DNS, TCP, TLS, reqwest build, ...).
    #[error("network error: {0}")]
    Network(String),

    /// WebSocket handshake/protocol/IO failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC domain error returned by the server.
    #[error("{0}")]
    Rpc(RpcErrorObj),

    /// EVM execution reverted; carries the decoded reason.
    #[error("execution reverted: {} (raw={})", .0.reason, .0.raw_hex)]
    Revert(RevertInfo),

    /// Per-request or send-and-wait deadline exceeded.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Send-and-wait deadline exceeded; carries the broadcast tx hash.
    #[error("timed out waiting for receipt of {tx_hash} after {elapsed:?}")]
    ReceiptTimeout { tx_hash: String, elapsed: std::time::Duration },

    /// In-flight request ceiling reached; publisher refused synchronously.
    #[error("backpressure: in-flight request ceiling reached")]
    Backpressure,

    /// Provider shut down (explicitly, or via an unrecoverable disconnect).
    #[error("transport closed")]
    TransportClosed,

    /// Expected chain id did not match the observed chain id.
    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainMismatch { expected: u64, got: u64 },

    /// Transaction rejected because the sender could not be recovered.
    #[error("invalid sender: {0}")]
    InvalidSender(String),

    /// Node does not implement the simulate method.
    #[error("simulate unsupported on this node")]
    SimulateUnsupported,

    /// Operation unavailable in the configured test-node dialect.
    #[error("unsupported in this test-node dialect: {0}")]
    Unsupported(&'static str),

    /// No signer configured for an operation that requires one.
    #[error("no signer configured")]
    NoSigner,

    /// Malformed or missing field in an otherwise well-formed response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("rlp error: {0}")]
    Rlp(String),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the retry engine (C4) should retry this failure (spec §4.4).
    ///
    /// Retryable: network/connect failures, timeouts, HTTP 5xx/429, the
    /// generic JSON-RPC server error `-32000`.
    /// Non-retryable: any other JSON-RPC domain error (method-not-found,
    /// invalid-params, execution reverts) and anything carrying a `0x…`
    /// revert payload.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::WebSocket(_) | Error::Timeout(_) => true,
            Error::Http { status, .. } => (500..=599).contains(status) || *status == 429,
            Error::Rpc(obj) => {
                if obj.revert_data().is_some() {
                    return false;
                }
                obj.code == -32000
            }
            _ => false,
        }
    }

    pub fn rpc(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Error::Rpc(RpcErrorObj::new(code, message, data))
    }
}

impl From<RpcErrorObj> for Error {
    fn from(e: RpcErrorObj) -> Self {
        Error::Rpc(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(std::time::Duration::from_secs(0))
        } else if let Some(status) = e.status() {
            Error::Http { status: status.as_u16(), body: e.to_string() }
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => Error::Io(io),
            other => Error::WebSocket(other.to_string()),
        }
    }
}

impl From<rlp::DecoderError> for Error {
    fn from(e: rlp::DecoderError) -> Self {
        Error::Rlp(e.to_string())
    }
}
