//! Client configuration shared by every transport.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::policy::RetryConfig;

/// Wire protocol used to reach the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    #[serde(alias = "ws")]
    Websocket,
    /// Accepted in configuration; no transport implements it.
    Grpc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Websocket => write!(f, "websocket"),
            Self::Grpc => write!(f, "grpc"),
        }
    }
}

impl FromStr for Protocol {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "websocket" | "ws" | "wss" => Ok(Self::Websocket),
            "grpc" => Ok(Self::Grpc),
            other => Err(RpcError::Config(format!("unknown protocol: {other}"))),
        }
    }
}

/// Optional TLS material, all paths to PEM files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Extra CA bundle trusted in addition to the built-in roots.
    pub ca_file: Option<PathBuf>,
    /// Client certificate for mutual TLS (requires `key_file`).
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Skip server certificate verification. Test networks only.
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none()
            && self.cert_file.is_none()
            && self.key_file.is_none()
            && !self.insecure_skip_verify
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node endpoint, e.g. `"https://node.example.com/rpc"`.
    pub endpoint: String,
    #[serde(default)]
    pub protocol: Protocol,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Whole-request retry (HTTP only). `None` disables retries.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Log request and response bodies at `debug` level.
    #[serde(default)]
    pub debug: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    /// Config for `endpoint` with defaults for everything else.
    pub fn new(endpoint: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocol,
            timeout_secs: default_timeout_secs(),
            tls: None,
            retry: None,
            debug: false,
        }
    }

    /// Set the per-request timeout.
    ///
    /// The timeout is stored in whole seconds: fractions round up, so the
    /// effective timeout is never shorter than `timeout` and at least 1s.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, RpcError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| RpcError::Config(format!("invalid client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no transport can use.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.endpoint.trim().is_empty() {
            return Err(RpcError::Config("endpoint must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(RpcError::Config("timeout_secs must be at least 1".into()));
        }
        if let Some(retry) = &self.retry {
            if retry.multiplier < 1.0 || !retry.multiplier.is_finite() {
                return Err(RpcError::Config(format!(
                    "retry multiplier must be >= 1, got {}",
                    retry.multiplier
                )));
            }
            if retry.initial_delay > retry.max_delay {
                return Err(RpcError::Config(
                    "retry initial delay exceeds max delay".into(),
                ));
            }
        }
        if let Some(tls) = &self.tls {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                return Err(RpcError::Config(
                    "tls cert_file and key_file must be set together".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
