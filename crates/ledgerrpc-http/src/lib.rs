//! ledgerrpc-http: request/response JSON-RPC transport over HTTP POST.
//!
//! Each call is an independent POST; whole requests are retried through the
//! core [`RetryPolicy`](ledgerrpc_core::RetryPolicy) when one is configured.

pub mod client;
mod tls;

pub use client::{HttpClientConfig, HttpRpcClient};
