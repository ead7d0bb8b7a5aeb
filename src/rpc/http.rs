//! HTTP transport (C2): one request, one response. Honors connect/read
//! timeouts; non-2xx responses become `Error::Http` with the body preserved;
//! JSON decode failures become `Error::Parse`.
//!
//! Grounded in the teacher's `rpc::http::HttpClient` (the `reqwest::Client` +
//! atomic id-counter shape, and the `batch()` helper), generalized behind the
//! [`crate::rpc::Transport`] trait instead of exposing its own bespoke API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::codec::{parse_response, Request, ResponseEnvelope};
use crate::error::{Error, Result};
use crate::rpc::Transport;

pub struct HttpClientBuilder {
    url: String,
    headers: HeaderMap,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Parse(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::Parse(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let inner = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .default_headers(self.headers)
            .build()
            .map_err(Error::from)?;
        Ok(HttpClient { url: self.url, inner, next_id: AtomicU64::new(1) })
    }
}

pub struct HttpClient {
    url: String,
    inner: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        HttpClientBuilder::new(url).build()
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    #[instrument(skip(self, params), fields(method))]
    async fn send_one(&self, method: &str, params: Value, id: u64) -> Result<ResponseEnvelope> {
        let req = Request::new(method, params, id);
        let resp = self.inner.post(&self.url).json(&req).send().await.map_err(Error::from)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(Error::from)?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        parse_response(&body)
    }

    /// Submit several method calls as one JSON-RPC batch request. Results
    /// are returned in the same order as `requests`, regardless of the order
    /// the server answered them in (matching the teacher's `batch()`).
    #[instrument(skip(self, requests))]
    pub async fn batch(&self, requests: Vec<(String, Value)>) -> Result<Vec<Result<Value>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let envelopes: Vec<(u64, Request<'_>)> = requests
            .iter()
            .map(|(m, p)| {
                let id = self.alloc_id();
                (id, Request::new(m, p.clone(), id))
            })
            .collect();
        let body: Vec<&Request<'_>> = envelopes.iter().map(|(_, r)| r).collect();

        let resp = self.inner.post(&self.url).json(&body).send().await.map_err(Error::from)?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(Error::from)?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let mut responses: Vec<ResponseEnvelope> =
            serde_json::from_slice(&bytes).map_err(|e| Error::Parse(e.to_string()))?;
        responses.sort_by_key(|r| r.id.unwrap_or(u64::MAX));

        Ok(envelopes
            .iter()
            .map(|(id, _)| {
                let pos = responses.iter().position(|r| r.id == Some(*id));
                match pos {
                    Some(i) => envelope_to_result(responses[i].clone()),
                    None => Err(Error::MalformedResponse(format!("batch response missing id {id}"))),
                }
            })
            .collect())
    }
}

fn envelope_to_result(env: ResponseEnvelope) -> Result<Value> {
    if let Some(err) = env.error {
        return Err(Error::from(crate::error::RpcErrorObj::from(err)));
    }
    Ok(env.result.unwrap_or(Value::Null))
}

#[async_trait]
impl Transport for HttpClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.alloc_id();
        debug!(method, id, "http call");
        let env = self.send_one(method, params, id).await?;
        envelope_to_result(env)
    }

    fn supports_subscriptions(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_call_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x1"
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri()).unwrap();
        let v = client.call("eth_chainId", serde_json::json!([])).await.unwrap();
        assert_eq!(v, Value::String("0x1".into()));
    }

    #[tokio::test]
    async fn non_2xx_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri()).unwrap();
        let err = client.call("eth_chainId", serde_json::json!([])).await.unwrap_err();
        match err {
            Error::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rpc_error_surfaces_as_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri()).unwrap();
        let err = client.call("nope", serde_json::json!([])).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(obj) if obj.code == -32601));
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri()).unwrap();
        let err = client.call("eth_chainId", serde_json::json!([])).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn batch_reorders_to_request_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"jsonrpc":"2.0","id":2,"result":"0x2"},
                {"jsonrpc":"2.0","id":1,"result":"0x1"},
            ])))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri()).unwrap();
        let results = client
            .batch(vec![
                ("eth_chainId".into(), serde_json::json!([])),
                ("eth_blockNumber".into(), serde_json::json!([])),
            ])
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap(), &Value::String("0x1".into()));
        assert_eq!(results[1].as_ref().unwrap(), &Value::String("0x2".into()));
    }
}
