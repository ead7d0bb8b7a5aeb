// Subscribe to newHeads over WebSocket.
// --------------------------------------
// Usage:
//   CHAIN_WS_URL=ws://127.0.0.1:8545 cargo run --example subscribe

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chainlink_rpc_core::config::ClientBuilder;
use chainlink_rpc_core::Client;
use serde_json::Value;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ws_url = env::var("CHAIN_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8545".to_string());
    println!("connecting: {ws_url}");

    loop {
        match run_once(&ws_url).await {
            Ok(()) => break,
            Err(e) => {
                eprintln!("subscription ended ({e}); reconnecting in 2s");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Ok(())
}

async fn run_once(ws_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientBuilder::new().ws_url(ws_url).build()?;
    let client = Client::connect(config).await?;

    let seen = Arc::new(AtomicU64::new(0));
    let seen_for_cb = seen.clone();
    let subscription = client
        .subscribe("newHeads", Value::Null, move |head| {
            seen_for_cb.fetch_add(1, Ordering::Relaxed);
            print_head_line(&head);
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    println!("closing subscription {}", subscription.id());
    subscription.unsubscribe().await?;
    Ok(())
}

fn print_head_line(v: &Value) {
    let number = v.get("number").and_then(Value::as_str).unwrap_or("<unknown>");
    let hash = v.get("hash").and_then(Value::as_str).unwrap_or("<unknown>");
    println!("newHead number={number} hash={hash}");
}
