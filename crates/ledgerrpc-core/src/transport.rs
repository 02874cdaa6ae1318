//! The `Client` trait: the only surface the service layer depends on.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Protocol;
use crate::context::CallContext;
use crate::error::RpcError;

/// Node method used by [`Client::send_raw_transaction`].
pub const SEND_RAW_TRANSACTION_METHOD: &str = "sendRawTransaction";

/// Outcome of submitting a signed transaction.
///
/// A business rejection is a value (`accepted == false`), not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmission {
    pub tx_hash: String,
    pub accepted: bool,
    pub reason: String,
}

impl TxSubmission {
    /// Interpret a `sendRawTransaction` result.
    ///
    /// A bare string is the transaction hash of an accepted submission; an
    /// object may carry `txHash` / `tx_hash` / `hash`, `accepted` and `reason`.
    pub fn from_result(result: &Value) -> Result<Self, RpcError> {
        match result {
            Value::String(hash) => Ok(Self {
                tx_hash: hash.clone(),
                accepted: true,
                reason: String::new(),
            }),
            Value::Object(map) => {
                let tx_hash = ["txHash", "tx_hash", "hash"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string();
                let accepted = map.get("accepted").and_then(Value::as_bool).unwrap_or(true);
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Self {
                    tx_hash,
                    accepted,
                    reason,
                })
            }
            other => Err(RpcError::invalid_response(format!(
                "unexpected {SEND_RAW_TRANSACTION_METHOD} result: {other}"
            ))),
        }
    }

    /// A submission the node evaluated and refused.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            tx_hash: String::new(),
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// A server-pushed subscription notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Subscription id assigned by the node.
    pub subscription: String,
    /// Notification method name as sent by the node.
    pub method: String,
    pub payload: Value,
}

/// The transport contract every protocol implements.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; concurrent calls on one instance
/// are expected.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Client>`.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Call `method` with `params` and return the untyped result.
    async fn call(&self, ctx: &CallContext, method: &str, params: Value)
        -> Result<Value, RpcError>;

    /// Submit a signed, hex-encoded transaction.
    ///
    /// Protocol errors become `accepted == false`; transport failures that
    /// kept the node from evaluating the transaction are returned as errors.
    async fn send_raw_transaction(
        &self,
        ctx: &CallContext,
        signed_tx_hex: &str,
    ) -> Result<TxSubmission, RpcError> {
        match self
            .call(ctx, SEND_RAW_TRANSACTION_METHOD, json!([signed_tx_hex]))
            .await
        {
            Ok(result) => TxSubmission::from_result(&result),
            Err(err) => match err.protocol_error() {
                Some(protocol) => {
                    let reason = match &protocol.problem {
                        Some(problem) if !problem.user_message.is_empty() => {
                            problem.user_message.clone()
                        }
                        _ => protocol.message.clone(),
                    };
                    tracing::debug!(code = protocol.code, %reason, "transaction rejected");
                    Ok(TxSubmission::rejected(reason))
                }
                None => Err(err),
            },
        }
    }

    /// Open a server-push subscription. The returned channel closes when
    /// `ctx` finishes or the transport closes.
    async fn subscribe(
        &self,
        ctx: &CallContext,
        filter: Value,
    ) -> Result<mpsc::Receiver<Event>, RpcError>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), RpcError>;

    /// The endpoint this client talks to.
    fn endpoint(&self) -> &str;

    fn protocol(&self) -> Protocol;
}

/// Typed helpers on top of [`Client`] for the service layer.
#[async_trait]
pub trait ClientExt: Client {
    /// Call `method` and deserialize the result into `T`.
    async fn call_as<T: DeserializeOwned + Send>(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let result = self.call(ctx, method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::invalid_response_from(&format!("decoding {method} result"), e))
    }
}

impl<C: Client + ?Sized> ClientExt for C {}
