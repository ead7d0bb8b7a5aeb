//! Subscription layer (C8): register/unregister notification callbacks and
//! dispatch them on a caller-configurable executor. Built directly on
//! [`crate::rpc::ws::WsClient`]'s dispatch table; HTTP transports never
//! support this (see [`crate::rpc::Transport::supports_subscriptions`]).
//!
//! The drop guard is grounded in the teacher's `rpc::ws::Subscription`,
//! which fires a best-effort unsubscribe on drop; the idempotence and
//! swallow-on-failure rules come from spec §4.8/§7.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::rpc::ws::WsClient;

/// A live subscription. Dropping it unsubscribes best-effort; calling
/// [`Subscription::unsubscribe`] explicitly lets the caller observe whether
/// the server-side teardown actually happened.
pub struct Subscription {
    id: String,
    ws: WsClient,
    done: Arc<AtomicBool>,
}

impl Subscription {
    /// Register `callback` for the subscription identified by `sub_id` (the
    /// result already returned by an `eth_subscribe` call).
    pub(crate) fn new(ws: WsClient, sub_id: String, callback: Arc<dyn Fn(Value) + Send + Sync>) -> Self {
        ws.register_subscription(sub_id.clone(), callback);
        Self { id: sub_id, ws, done: Arc::new(AtomicBool::new(false)) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Idempotent: the second and subsequent calls return `Ok(false)`
    /// without contacting the server. Transport failures during the actual
    /// unsubscribe call are logged and swallowed, never propagated.
    pub async fn unsubscribe(&self) -> Result<bool> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.ws.deregister_subscription(&self.id);
        match crate::rpc::Transport::call(&self.ws, "eth_unsubscribe", serde_json::json!([self.id])).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(sub_id = %self.id, error = %e, "unsubscribe call failed; already torn down locally");
                Ok(true)
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ws.deregister_subscription(&self.id);
        let ws = self.ws.clone();
        let id = self.id.clone();
        crate::executor::get_or_create().spawn(Box::pin(async move {
            if let Err(e) = crate::rpc::Transport::call(&ws, "eth_unsubscribe", serde_json::json!([id])).await {
                warn!(sub_id = %id, error = %e, "best-effort unsubscribe on drop failed");
            }
        }));
    }
}

/// Subscribe to `kind` (e.g. `"newHeads"`, `"logs"`) with the given extra
/// params, invoking `callback` for every notification.
pub async fn subscribe(
    ws: &WsClient,
    kind: &str,
    extra_params: Value,
    callback: impl Fn(Value) + Send + Sync + 'static,
) -> Result<Subscription> {
    let mut params = vec![Value::String(kind.to_string())];
    if !extra_params.is_null() {
        params.push(extra_params);
    }
    let result = crate::rpc::Transport::call(ws, "eth_subscribe", Value::Array(params)).await?;
    let sub_id = result
        .as_str()
        .ok_or_else(|| crate::error::Error::MalformedResponse("eth_subscribe result was not a string id".into()))?
        .to_string();
    Ok(Subscription::new(ws.clone(), sub_id, Arc::new(callback)))
}

#[cfg(test)]
mod tests {
    // Exercised end-to-end against a mock WS server in tests/ (no in-process
    // WS server dependency is added here to keep unit tests synchronous).
}
