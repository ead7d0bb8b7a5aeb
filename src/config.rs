//! Client configuration surface (spec §6): exactly the options named there,
//! nothing more — no env/file parsing, no CLI surface (that ergonomics layer
//! is out of scope). Builder style and `validate()` step grounded in
//! `megaeth_rpc::ClientConfig` and the teacher's `WsClientBuilder`/
//! `HttpClientBuilder`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::external::{ChainProfile, Signer};
use crate::retry::RetryConfig;
use crate::rpc::Transport;

// A production floor on the slot table size, independent of the table sizes
// used to exercise backpressure directly against `SlotTable` in its own unit
// tests (which construct a table with as few as 2 slots without going
// through this validation at all).
const MIN_TABLE_SIZE: u32 = 16;
const MAX_TABLE_SIZE: u32 = 1 << 20;

/// How a waiting task behaves while polling for work. `Yielding` trades CPU
/// for latency; `Blocking` parks the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    Blocking,
    Yielding,
}

/// Which transport a client should use. Resolution priority matches spec
/// §6: an explicit `provider` wins over `ws_url`, which wins over `rpc_url`.
pub enum TransportChoice {
    RpcUrl(String),
    WsUrl(String),
    Provider(Arc<dyn Transport>),
}

pub struct ClientConfig {
    pub transport: TransportChoice,
    pub max_retries: u32,
    pub retry_config: RetryConfig,
    pub max_pending_requests: u32,
    pub ring_buffer_size: u32,
    pub wait_strategy: WaitStrategy,
    pub default_request_timeout: Duration,
    pub chain: Option<ChainProfile>,
    pub signer: Option<Arc<dyn Signer>>,
    pub test_mode: bool,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_pending_requests.is_power_of_two() {
            return Err(Error::MalformedResponse(format!(
                "max_pending_requests must be a power of two, got {}",
                self.max_pending_requests
            )));
        }
        if !(MIN_TABLE_SIZE..=MAX_TABLE_SIZE).contains(&self.max_pending_requests) {
            return Err(Error::MalformedResponse(format!(
                "max_pending_requests must be within [{MIN_TABLE_SIZE}, {MAX_TABLE_SIZE}], got {}",
                self.max_pending_requests
            )));
        }
        if !self.ring_buffer_size.is_power_of_two() {
            return Err(Error::MalformedResponse(format!(
                "ring_buffer_size must be a power of two, got {}",
                self.ring_buffer_size
            )));
        }
        if self.retry_config.max_ms < self.retry_config.base_ms {
            return Err(Error::MalformedResponse("retry_config.max_ms must be >= base_ms".into()));
        }
        if self.retry_config.jitter_max <= self.retry_config.jitter_min {
            return Err(Error::MalformedResponse(
                "retry_config.jitter_max must be > jitter_min".into(),
            ));
        }
        Ok(())
    }
}

pub struct ClientBuilder {
    transport: Option<TransportChoice>,
    max_retries: u32,
    retry_config: RetryConfig,
    max_pending_requests: u32,
    ring_buffer_size: u32,
    wait_strategy: WaitStrategy,
    default_request_timeout: Duration,
    chain: Option<ChainProfile>,
    signer: Option<Arc<dyn Signer>>,
    test_mode: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            max_retries: 3,
            retry_config: RetryConfig::default(),
            max_pending_requests: 65_536,
            ring_buffer_size: 4_096,
            wait_strategy: WaitStrategy::Yielding,
            default_request_timeout: Duration::from_secs(30),
            chain: None,
            signer: None,
            test_mode: false,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.transport = Some(TransportChoice::RpcUrl(url.into()));
        self
    }

    #[must_use]
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.transport = Some(TransportChoice::WsUrl(url.into()));
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Transport>) -> Self {
        self.transport = Some(TransportChoice::Provider(provider));
        self
    }

    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    #[must_use]
    pub fn retry_config(mut self, cfg: RetryConfig) -> Self {
        self.retry_config = cfg;
        self
    }

    #[must_use]
    pub fn max_pending_requests(mut self, n: u32) -> Self {
        self.max_pending_requests = n;
        self
    }

    #[must_use]
    pub fn ring_buffer_size(mut self, n: u32) -> Self {
        self.ring_buffer_size = n;
        self
    }

    #[must_use]
    pub fn wait_strategy(mut self, s: WaitStrategy) -> Self {
        self.wait_strategy = s;
        self
    }

    #[must_use]
    pub fn default_request_timeout(mut self, d: Duration) -> Self {
        self.default_request_timeout = d;
        self
    }

    #[must_use]
    pub fn chain(mut self, profile: ChainProfile) -> Self {
        self.chain = Some(profile);
        self
    }

    #[must_use]
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let transport = self
            .transport
            .ok_or_else(|| Error::MalformedResponse("no transport configured: set rpc_url, ws_url, or provider".into()))?;
        let cfg = ClientConfig {
            transport,
            max_retries: self.max_retries,
            retry_config: self.retry_config,
            max_pending_requests: self.max_pending_requests,
            ring_buffer_size: self.ring_buffer_size,
            wait_strategy: self.wait_strategy,
            default_request_timeout: self.default_request_timeout,
            chain: self.chain,
            signer: self.signer,
            test_mode: self.test_mode,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_table_size() {
        let err = ClientBuilder::new()
            .rpc_url("http://localhost:8545")
            .max_pending_requests(1000)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn rejects_missing_transport() {
        let err = ClientBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn defaults_validate() {
        let cfg = ClientBuilder::new().rpc_url("http://localhost:8545").build().unwrap();
        assert_eq!(cfg.max_pending_requests, 65_536);
        assert_eq!(cfg.ring_buffer_size, 4_096);
    }
}
