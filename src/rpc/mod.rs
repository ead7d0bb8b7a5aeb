//! Transport abstraction shared by the HTTP (C2) and WebSocket (C3)
//! implementations, plus the retry engine (C4) that wraps either.

pub mod http;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A single request/response JSON-RPC exchange, transport-agnostic. The read
/// client (C6) and transaction pipeline (C7) are written against this trait,
/// not against `HttpClient`/`WsClient` directly, so either can back a given
/// client instance.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Whether this transport can multiplex subscriptions (only WebSocket
    /// can); the read client uses this to give a clear error instead of a
    /// confusing transport-level failure when `eth_subscribe` is attempted
    /// over HTTP.
    fn supports_subscriptions(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        (**self).call(method, params).await
    }

    fn supports_subscriptions(&self) -> bool {
        (**self).supports_subscriptions()
    }
}
