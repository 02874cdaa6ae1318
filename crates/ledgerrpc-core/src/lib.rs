//! ledgerrpc-core: client contract, error taxonomy and retry policy.
//!
//! # Overview
//!
//! LedgerRPC lets an application talk JSON-RPC 2.0 to a ledger node over HTTP
//! or WebSocket. The core crate defines:
//!
//! - [`Client`]: the async trait every transport implements
//! - [`CallContext`]: per-call cancellation and deadline
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`RpcError`] / [`ErrorKind`]: the error taxonomy
//! - [`ProblemDetails`]: structured business errors carried in `error.data`
//! - [`policy`] module: backoff schedule and retry executor
//! - [`ClientConfig`]: endpoint, protocol, timeout, TLS and retry settings

pub mod config;
pub mod context;
pub mod error;
pub mod policy;
pub mod problem;
pub mod request;
pub mod transport;

pub use config::{ClientConfig, Protocol, TlsConfig};
pub use context::CallContext;
pub use error::{ErrorKind, ProtocolError, RpcError};
pub use policy::{RetryConfig, RetryPolicy};
pub use problem::ProblemDetails;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{Client, ClientExt, Event, TxSubmission};
