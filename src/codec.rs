//! Wire codec (C1): serialize request envelopes, parse response/notification
//! envelopes, and move JSON-RPC quantities to/from their canonical `0x`-hex
//! form.
//!
//! The WebSocket hot path (`encode_request_into`) writes straight into a
//! caller-supplied buffer using precomputed prefix fragments instead of
//! building an intermediate `serde_json::Value` tree; the HTTP path (which is
//! not latency-critical in the same way) goes through plain `serde` structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, RpcErrorObj};

/// JSON-RPC 2.0 request envelope (HTTP path / typed callers).
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
    pub id: u64,
}

impl<'a> Request<'a> {
    pub fn new(method: &'a str, params: Value, id: u64) -> Self {
        Self { jsonrpc: "2.0", method, params, id }
    }
}

/// JSON-RPC 2.0 response envelope, as received.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub jsonrpc: String,
    /// Per spec, `id` may legally be a number, string, or null; we only speak
    /// the integer dialect this crate produces, so anything else parses to
    /// `None` and is treated as unroutable.
    #[serde(default, deserialize_with = "de_id")]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<WireError> for RpcErrorObj {
    fn from(e: WireError) -> Self {
        RpcErrorObj::new(e.code, e.message, e.data)
    }
}

fn de_id<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    })
}

/// Subscription notification (server push, WebSocket only). Method is always
/// of the form `"<namespace>_subscription"`.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    pub params: NotificationParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: String,
    pub result: Value,
}

/// Something read off the wire: either a response correlated by id, or an
/// unsolicited subscription notification.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(ResponseEnvelope),
    Notification(Notification),
}

/// Parse one frame's worth of bytes into a response or a notification.
///
/// Unknown fields are ignored (we deserialize into a fixed shape that simply
/// doesn't name them). Anything that doesn't minimally look like either shape
/// is a parse error.
pub fn parse_incoming(bytes: &[u8]) -> Result<Incoming> {
    let v: Value = serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))?;

    let method_is_subscription = v
        .get("method")
        .and_then(Value::as_str)
        .map(|m| m.ends_with("_subscription"))
        .unwrap_or(false);

    if method_is_subscription {
        let note: Notification =
            serde_json::from_value(v).map_err(|e| Error::Parse(format!("notification: {e}")))?;
        return Ok(Incoming::Notification(note));
    }

    if v.get("id").is_some() && (v.get("result").is_some() || v.get("error").is_some()) {
        let resp: ResponseEnvelope =
            serde_json::from_value(v).map_err(|e| Error::Parse(format!("response: {e}")))?;
        return Ok(Incoming::Response(resp));
    }

    Err(Error::Parse("envelope is neither a response nor a subscription notification".into()))
}

/// Parse a plain JSON-RPC response body (HTTP path: always exactly one
/// response, never a notification).
pub fn parse_response(bytes: &[u8]) -> Result<ResponseEnvelope> {
    serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
}

// ----------------------------- Hot-path WS encode ---------------------------

const PREFIX_METHOD: &[u8] = br#"{"jsonrpc":"2.0","method":""#;
const PREFIX_PARAMS: &[u8] = br#"","params":"#;
const PREFIX_ID: &[u8] = br#","id":"#;
const SUFFIX: &[u8] = b"}";

/// Serialize a request directly into `buf`, appending to whatever is already
/// there. `params` is serialized once via `serde_json` (callers building
/// high-frequency paths should pre-serialize static shapes where possible);
/// the envelope framing and the numeric `id` are written without any
/// intermediate heap-allocated string conversion.
pub fn encode_request_into(buf: &mut Vec<u8>, method: &str, params: &Value, id: u64) -> Result<()> {
    buf.extend_from_slice(PREFIX_METHOD);
    escape_json_str_into(buf, method);
    buf.extend_from_slice(PREFIX_PARAMS);
    serde_json::to_writer(&mut *buf, params).map_err(|e| Error::Parse(e.to_string()))?;
    buf.extend_from_slice(PREFIX_ID);
    write_u64_into(buf, id);
    buf.extend_from_slice(SUFFIX);
    Ok(())
}

/// Append the decimal representation of `v` to `buf` without allocating a
/// separate `String`.
fn write_u64_into(buf: &mut Vec<u8>, v: u64) {
    if v == 0 {
        buf.push(b'0');
        return;
    }
    let start = buf.len();
    let mut n = v;
    while n > 0 {
        buf.push(b'0' + (n % 10) as u8);
        n /= 10;
    }
    buf[start..].reverse();
}

/// Append `s` to `buf` as an escaped JSON string body (no surrounding quotes;
/// callers that need quotes add them, matching the prefix fragments above
/// which already supply the opening quote and the caller supplies none for
/// the method name since `PREFIX_METHOD` ends in `"`).
fn escape_json_str_into(buf: &mut Vec<u8>, s: &str) {
    for b in s.bytes() {
        match b {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            0x08 => buf.extend_from_slice(b"\\b"),
            0x0c => buf.extend_from_slice(b"\\f"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            0x00..=0x1f => {
                buf.extend_from_slice(b"\\u00");
                const HEX: &[u8; 16] = b"0123456789abcdef";
                buf.push(HEX[(b >> 4) as usize]);
                buf.push(HEX[(b & 0x0f) as usize]);
            }
            _ => buf.push(b),
        }
    }
}

// --------------------------------- Hex quantities ---------------------------

/// Decode a canonical `0x`-prefixed hex quantity into a `u64`. A lone `0x` or
/// an empty string decodes to zero.
pub fn hex_to_u64(s: &str) -> Result<u64> {
    let digits = strip_0x(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| Error::Parse(format!("bad hex quantity {s:?}: {e}")))
}

/// Decode a canonical `0x`-prefixed hex quantity into a `u128`.
pub fn hex_to_u128(s: &str) -> Result<u128> {
    let digits = strip_0x(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| Error::Parse(format!("bad hex quantity {s:?}: {e}")))
}

/// Encode a non-negative integer as a canonical `0x`-prefixed, lowercase,
/// minimal-digit hex quantity (`0` encodes as `"0x0"`).
pub fn u64_to_hex(v: u64) -> String {
    format!("0x{v:x}")
}

pub fn u128_to_hex(v: u128) -> String {
    format!("0x{v:x}")
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_nonzero() {
        assert_eq!(hex_to_u64("0x2a").unwrap(), 42);
        assert_eq!(u64_to_hex(42), "0x2a");
    }

    #[test]
    fn hex_zero_forms() {
        assert_eq!(hex_to_u64("0x").unwrap(), 0);
        assert_eq!(hex_to_u64("").unwrap(), 0);
        assert_eq!(hex_to_u64("0x0").unwrap(), 0);
    }

    #[test]
    fn hex_u128() {
        assert_eq!(hex_to_u128("0xde0b6b3a7640000").unwrap(), 1_000_000_000_000_000_000u128);
        assert_eq!(u128_to_hex(1_000_000_000_000_000_000u128), "0xde0b6b3a7640000");
    }

    #[test]
    fn encode_request_matches_manual_json() {
        let mut buf = Vec::new();
        encode_request_into(&mut buf, "eth_chainId", &Value::Array(vec![]), 1).unwrap();
        let got: Value = serde_json::from_slice(&buf).unwrap();
        let want = serde_json::json!({"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1});
        assert_eq!(got, want);
    }

    #[test]
    fn escapes_control_chars() {
        let mut buf = Vec::new();
        encode_request_into(&mut buf, "m\u{1}x", &Value::Null, 7).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("\\u0001"));
    }

    #[test]
    fn parse_success_response() {
        let bytes = br#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#;
        match parse_incoming(bytes).unwrap() {
            Incoming::Response(r) => {
                assert_eq!(r.id, Some(1));
                assert_eq!(r.result.unwrap(), Value::String("0x1".into()));
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parse_error_response() {
        let bytes = br#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#;
        match parse_incoming(bytes).unwrap() {
            Incoming::Response(r) => {
                let err = r.error.unwrap();
                assert_eq!(err.code, -32601);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parse_subscription_notification() {
        let bytes = br#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xabc","result":{"number":"0x1"}}}"#;
        match parse_incoming(bytes).unwrap() {
            Incoming::Notification(n) => {
                assert_eq!(n.params.subscription, "0xabc");
            }
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn malformed_envelope_is_parse_error() {
        let bytes = b"not json";
        assert!(parse_incoming(bytes).is_err());
    }
}
