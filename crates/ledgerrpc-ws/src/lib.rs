//! ledgerrpc-ws: WebSocket JSON-RPC transport.
//!
//! # Features
//! - Request multiplexing over a single connection, matched by id
//! - Per-call cancellation, deadline and fixed request timeout
//! - Subscription streams with best-effort unsubscribe
//! - Every in-flight call fails with a network error when the connection ends

pub mod client;
mod pending;
pub mod subscriptions;

pub use client::{normalize_endpoint, ConnectionState, WsClientConfig, WsRpcClient};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
