//! JSON-RPC transport and client core for Ethereum-compatible chains.
//!
//! Wires together the wire codec (`codec`), HTTP/WebSocket transports
//! (`rpc`), retry/backoff (`retry`), the typed read client (`client`), the
//! transaction pipeline (`tx`), and the subscription layer (`subscription`)
//! behind one configuration surface (`config`). ABI encoding, key
//! management, and chain registries are out of scope; see `external` for the
//! trait seams those collaborators plug into.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod external;
pub mod retry;
pub mod rpc;
pub mod subscription;
#[cfg(feature = "test-node")]
pub mod testnode;
pub mod tx;
pub mod types;

use std::sync::Arc;

use serde_json::Value;
use url::Url;

pub use client::{ClientCore, ReadClient};
pub use config::{ClientBuilder, ClientConfig, TransportChoice, WaitStrategy};
pub use error::{Error, Result};
pub use external::{ChainProfile, MetricsSink, RevertDecoder, Signer};
pub use rpc::http::HttpClient;
pub use rpc::ws::WsClient;
pub use rpc::Transport;
pub use subscription::Subscription;
pub use tx::{TransactionRequest, TxPipeline, UnsignedTx};

/// Top-level facade: resolves a [`ClientConfig`] into a connected transport
/// and the typed clients layered over it. Most users build this with
/// [`ClientBuilder`] rather than constructing [`ClientConfig`] by hand.
pub struct Client {
    pub read: ReadClient,
    pub tx: Option<TxPipeline>,
    transport: Arc<dyn Transport>,
    ws: Option<WsClient>,
}

impl Client {
    /// Resolve `config.transport` (provider wins over `ws_url`, which wins
    /// over `rpc_url`, per spec §6) and build the read client plus, when a
    /// signer is configured, the transaction pipeline.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let (transport, ws): (Arc<dyn Transport>, Option<WsClient>) = match config.transport {
            TransportChoice::RpcUrl(url) => (Arc::new(HttpClient::new(url)?), None),
            TransportChoice::WsUrl(url) => {
                let url = Url::parse(&url).map_err(Error::from)?;
                let ws = rpc::ws::WsClientBuilder::new(url)
                    .table_capacity(config.max_pending_requests as usize)
                    .ring_capacity(config.ring_buffer_size as usize)
                    .default_request_timeout(config.default_request_timeout)
                    .wait_strategy(config.wait_strategy)
                    .connect()
                    .await?;
                (Arc::new(ws.clone()), Some(ws))
            }
            TransportChoice::Provider(p) => (p, None),
        };

        let mut core = ClientCore::new(transport.clone(), config.max_retries, config.retry_config)
            .with_metrics(Arc::new(external::NoopMetricsSink));
        if let Some(chain) = config.chain {
            core = core.with_expected_chain_id(chain.chain_id);
        }
        let core = Arc::new(core);
        let read = ReadClient::new(core);

        let tx = config.signer.map(|signer| {
            let mut pipeline = TxPipeline::new(read.clone(), signer);
            if let Some(chain) = config.chain {
                pipeline = pipeline.with_chain_profile(chain);
            }
            pipeline
        });

        Ok(Self { read, tx, transport, ws })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Subscribe to a push feed (`newHeads`, `logs`, ...). Only available
    /// when the client was built over a WebSocket transport.
    pub async fn subscribe(
        &self,
        kind: &str,
        extra_params: Value,
        callback: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let ws = self.ws.as_ref().ok_or(Error::Unsupported("subscriptions require a websocket transport"))?;
        subscription::subscribe(ws, kind, extra_params, callback).await
    }
}
