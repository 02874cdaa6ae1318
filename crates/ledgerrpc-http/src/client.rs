//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Features:
//! - Whole-request retry with exponential backoff for transient errors
//! - Per-call cancellation and deadline through [`CallContext`]
//! - Optional CA bundle, client identity and insecure mode
//! - Problem-details extraction for node errors

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::mpsc;

use ledgerrpc_core::config::{ClientConfig, Protocol, TlsConfig};
use ledgerrpc_core::context::CallContext;
use ledgerrpc_core::error::RpcError;
use ledgerrpc_core::policy::{RetryConfig, RetryPolicy};
use ledgerrpc_core::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use ledgerrpc_core::transport::{Client, Event};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// `None` sends each request exactly once.
    pub retry: Option<RetryConfig>,
    pub tls: Option<TlsConfig>,
    pub request_timeout: Duration,
    /// Log request and response bodies at `debug` level.
    pub debug: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: None,
            tls: None,
            request_timeout: Duration::from_secs(30),
            debug: false,
        }
    }
}

impl From<&ClientConfig> for HttpClientConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            tls: config.tls.clone(),
            request_timeout: config.timeout(),
            debug: config.debug,
        }
    }
}

/// HTTP JSON-RPC client.
///
/// Stateless per call apart from the request-id counter; safe to share
/// across tasks behind an `Arc`.
pub struct HttpRpcClient {
    url: String,
    /// `None` once [`Client::close`] has released the connection pool.
    http: Mutex<Option<reqwest::Client>>,
    next_id: AtomicU64,
    retry: Option<RetryPolicy>,
    request_timeout: Duration,
    debug: bool,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, RpcError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| RpcError::Config(format!("invalid endpoint {url}: {e}")))?;

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(tls) = &config.tls {
            builder = crate::tls::apply(builder, tls)?;
        }
        let http = builder
            .build()
            .map_err(|e| RpcError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            url,
            http: Mutex::new(Some(http)),
            next_id: AtomicU64::new(1),
            retry: config.retry.map(RetryPolicy::new),
            request_timeout: config.request_timeout,
            debug: config.debug,
        })
    }

    /// Create with default configuration (no retry, 30s timeout).
    pub fn default_for(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        Self::new(config.endpoint.clone(), HttpClientConfig::from(config))
    }

    /// Replace the retry policy, e.g. to install a custom predicate or hook.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn http(&self) -> Result<reqwest::Client, RpcError> {
        self.http
            .lock()
            .clone()
            .ok_or_else(|| RpcError::network("client closed"))
    }

    /// One POST of an already-encoded envelope, decoded into a result.
    async fn send_once(&self, id: u64, body: &str) -> Result<Value, RpcError> {
        let resp = self
            .http()?
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(id, status = status.as_u16(), error = %e, "reading error body failed");
                    format!("<body unavailable: {e}>")
                }
            };
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_reqwest(e))?;
        if self.debug {
            tracing::debug!(id, body = %String::from_utf8_lossy(&bytes), "HTTP response");
        }

        let envelope: JsonRpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| RpcError::invalid_response_from("decoding response envelope", e))?;
        if envelope.id != RpcId::Null && envelope.id.as_u64() != Some(id) {
            return Err(RpcError::invalid_response(format!(
                "response id {} does not match request id {id}",
                envelope.id
            )));
        }
        envelope.into_result().map_err(RpcError::protocol)
    }

    async fn send_with_retry(&self, ctx: &CallContext, id: u64, body: &str) -> Result<Value, RpcError> {
        match &self.retry {
            Some(policy) => policy.run(ctx, || self.send_once(id, body)).await,
            None => self.send_once(id, body).await,
        }
    }

    fn map_reqwest(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            RpcError::invalid_response_from("reading response body", err)
        } else {
            let connect = err.is_connect();
            RpcError::network_from(err, connect)
        }
    }
}

#[async_trait]
impl Client for HttpRpcClient {
    async fn call(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let id = self.next_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&req)
            .map_err(|e| RpcError::InvalidRequest(format!("encoding {method}: {e}")))?;

        if self.debug {
            tracing::debug!(id, method, url = %self.url, %body, "HTTP request");
        } else {
            tracing::debug!(id, method, url = %self.url, "HTTP request");
        }

        tokio::select! {
            biased;
            done = ctx.done() => Err(done),
            result = self.send_with_retry(ctx, id, &body) => result,
        }
    }

    async fn subscribe(
        &self,
        _ctx: &CallContext,
        _filter: Value,
    ) -> Result<mpsc::Receiver<Event>, RpcError> {
        Err(RpcError::NotSupported {
            operation: "subscribe",
            transport: "http",
        })
    }

    async fn close(&self) -> Result<(), RpcError> {
        if self.http.lock().take().is_some() {
            tracing::debug!(url = %self.url, "HTTP client closed");
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient")
            .field("url", &self.url)
            .field("retry", &self.retry)
            .field("closed", &self.http.lock().is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerrpc_core::ErrorKind;

    #[test]
    fn ids_are_monotonic() {
        let client = HttpRpcClient::default_for("http://127.0.0.1:1").unwrap();
        let a = client.next_id();
        let b = client.next_id();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn rejects_unparseable_endpoint() {
        let err = HttpRpcClient::default_for("not a url").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn from_config_carries_retry() {
        let cfg = ClientConfig::new("http://127.0.0.1:8545", Protocol::Http)
            .with_retry(RetryConfig::default());
        let client = HttpRpcClient::from_config(&cfg).unwrap();
        assert!(client.retry.is_some());
        assert_eq!(client.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = HttpRpcClient::default_for("http://127.0.0.1:1").unwrap();
        client.close().await.unwrap();
        client.close().await.unwrap();
        let err = client
            .call(&CallContext::background(), "ping", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("client closed"));
    }

    #[tokio::test]
    async fn cancelled_context_fails_before_sending() {
        let client = HttpRpcClient::default_for("http://127.0.0.1:1").unwrap();
        let ctx = CallContext::background();
        ctx.cancel();
        let err = client.call(&ctx, "ping", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
        assert_eq!(client.next_id.load(Ordering::Relaxed), 1);
    }
}
