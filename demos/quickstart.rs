// Read-client + transaction-pipeline quickstart.
// -----------------------------------------------
// Shows:
// 1) Connecting over HTTP
// 2) A few typed read calls (chain id, balance, block)
// 3) Sending a value transfer through the transaction pipeline, when a
//    signer is configured
//
// Usage:
//   CHAIN_RPC_URL=http://127.0.0.1:8545 cargo run --example quickstart

use std::env;

use alloy_primitives::{Address, U256};
use chainlink_rpc_core::config::ClientBuilder;
use chainlink_rpc_core::types::BlockTag;
use chainlink_rpc_core::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rpc_url = env::var("CHAIN_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());

    let config = ClientBuilder::new().rpc_url(&rpc_url).max_retries(3).build()?;
    let client = Client::connect(config).await?;

    let chain_id = client.read.chain_id().await?;
    println!("chain id: {chain_id}");

    let account: Address = env::var("CHAIN_ACCOUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Address::ZERO);
    let balance = client.read.balance(account, BlockTag::Latest).await?;
    println!("balance of {account}: {balance}");

    let latest = client.read.block_by_number(BlockTag::Latest).await?;
    match latest {
        Some(block) => println!(
            "latest block: number={:?} txs={}",
            block.header.number.map(|q| q.0),
            block.transactions.len()
        ),
        None => println!("latest block: not yet available"),
    }

    match &client.tx {
        Some(pipeline) => {
            let req = chainlink_rpc_core::TransactionRequest {
                to: Some(account),
                value: Some(U256::from(1u64)),
                ..Default::default()
            };
            let hash = pipeline.send(req).await?;
            println!("broadcast: {hash:#x}");
        }
        None => println!("no signer configured; skipping the send step (set one via ClientBuilder::signer)"),
    }

    Ok(())
}
