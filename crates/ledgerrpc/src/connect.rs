use std::sync::Arc;

use ledgerrpc_core::{Client, ClientConfig, Protocol, RpcError};
use ledgerrpc_http::HttpRpcClient;
use ledgerrpc_ws::WsRpcClient;

/// Build a client for `config.protocol`.
///
/// HTTP clients are constructed without touching the network; WebSocket
/// clients dial and complete the handshake before returning. `grpc` is
/// recognised but not implemented.
pub async fn connect(config: &ClientConfig) -> Result<Arc<dyn Client>, RpcError> {
    config.validate()?;
    tracing::debug!(endpoint = %config.endpoint, protocol = %config.protocol, "creating client");

    match config.protocol {
        Protocol::Http => Ok(Arc::new(HttpRpcClient::from_config(config)?)),
        Protocol::Websocket => Ok(Arc::new(WsRpcClient::from_config(config).await?)),
        Protocol::Grpc => Err(RpcError::NotSupported {
            operation: "connect",
            transport: "grpc",
        }),
    }
}
