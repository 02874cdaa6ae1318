//! ledgerrpc: JSON-RPC client for ledger nodes.
//!
//! Pick a transport from a [`ClientConfig`] and talk to the node through the
//! transport-agnostic [`Client`] trait.
//!
//! # Quick start
//! ```rust,no_run
//! use ledgerrpc::{CallContext, Client, ClientConfig, Protocol};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), ledgerrpc::RpcError> {
//! let config = ClientConfig::new("http://127.0.0.1:8545", Protocol::Http);
//! let client = ledgerrpc::connect(&config).await?;
//! let pong = client.call(&CallContext::background(), "ping", json!([])).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod connect;

pub use connect::connect;

pub use ledgerrpc_core::{
    policy, problem, CallContext, Client, ClientConfig, ClientExt, ErrorKind, Event,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProblemDetails, Protocol, ProtocolError,
    RetryConfig, RetryPolicy, RpcError, RpcId, TlsConfig, TxSubmission,
};
pub use ledgerrpc_http::{HttpClientConfig, HttpRpcClient};
pub use ledgerrpc_ws::{ConnectionState, WsClientConfig, WsRpcClient};
