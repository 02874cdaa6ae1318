//! WebSocket JSON-RPC client with request multiplexing and subscriptions.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use ledgerrpc_core::config::{ClientConfig, Protocol};
use ledgerrpc_core::context::CallContext;
use ledgerrpc_core::error::RpcError;
use ledgerrpc_core::request::{JsonRpcRequest, JsonRpcResponse};
use ledgerrpc_core::transport::{Client, Event};

use crate::pending::{PendingGuard, PendingTable};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Bound on sending the Close frame during [`Client::close`].
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Fixed per-call timeout, independent of the caller's context.
    pub request_timeout: Duration,
    /// Bound on dialing and the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Node method that opens a subscription.
    pub subscribe_method: String,
    /// Node method that cancels a subscription.
    pub unsubscribe_method: String,
    /// Capacity of each subscription's event channel.
    pub event_buffer: usize,
    /// Log request and response bodies at `debug` level.
    pub debug: bool,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            subscribe_method: "subscribe".into(),
            unsubscribe_method: "unsubscribe".into(),
            event_buffer: 256,
            debug: false,
        }
    }
}

impl From<&ClientConfig> for WsClientConfig {
    fn from(config: &ClientConfig) -> Self {
        let timeout = config.timeout();
        Self {
            request_timeout: timeout,
            handshake_timeout: timeout,
            debug: config.debug,
            ..Self::default()
        }
    }
}

/// Connection lifecycle, `Connecting → Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Rewrite an endpoint to a WebSocket URL.
///
/// `http://` becomes `ws://`, `https://` becomes `wss://`, and a bare
/// `host:port` gets `ws://`.
pub fn normalize_endpoint(raw: &str) -> Result<String, RpcError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RpcError::Config("endpoint must not be empty".into()));
    }
    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        return Ok(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = raw.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if let Some((scheme, _)) = raw.split_once("://") {
        return Err(RpcError::Config(format!(
            "unsupported scheme {scheme:?} for a WebSocket endpoint"
        )));
    }
    Ok(format!("ws://{raw}"))
}

/// State shared between callers, the reader task and subscription watchers.
struct Shared {
    url: String,
    config: WsClientConfig,
    state: AtomicU8,
    next_id: AtomicU64,
    pending: PendingTable,
    subscriptions: SubscriptionManager,
    /// `None` once the connection has been torn down.
    writer: tokio::sync::Mutex<Option<WsSink>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_OPEN => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    /// Move to `Closed` and stop the reader. Returns `true` for the caller
    /// that performed the transition.
    fn mark_closed(&self) -> bool {
        let previous = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        self.shutdown.cancel();
        previous != STATE_CLOSED
    }

    /// Send one frame under the writer lock.
    ///
    /// Callers race this against their deadline and the shutdown token; a
    /// dropped write releases the lock. A writer that finds the transport
    /// closed drops the sink.
    async fn write(&self, msg: Message) -> Result<(), RpcError> {
        let mut writer = self.writer.lock().await;
        if self.shutdown.is_cancelled() {
            writer.take();
            return Err(RpcError::network("connection closed"));
        }
        let sink = writer
            .as_mut()
            .ok_or_else(|| RpcError::network("connection closed"))?;
        sink.send(msg).await.map_err(|e| RpcError::network_from(e, false))
    }

    async fn call(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, RpcError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.state() == ConnectionState::Closed || self.pending.is_closed() {
            return Err(RpcError::network("connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&req)
            .map_err(|e| RpcError::InvalidRequest(format!("encoding {method}: {e}")))?;

        // One deadline bounds both the write and the wait for the response.
        let timeout = self.config.request_timeout;
        let deadline = time::Instant::now() + timeout;
        let timed_out = || RpcError::Timeout {
            ms: timeout.as_millis() as u64,
        };

        let rx = self.pending.register(id)?;
        let _guard = PendingGuard::new(&self.pending, id);

        if self.config.debug {
            tracing::debug!(id, method, url = %self.url, %body, "WS request");
        } else {
            tracing::debug!(id, method, url = %self.url, "WS request");
        }
        tokio::select! {
            biased;
            written = self.write(Message::Text(body.into())) => written?,
            done = ctx.done() => return Err(done),
            _ = self.shutdown.cancelled() => return Err(RpcError::network("connection closed")),
            _ = time::sleep_until(deadline) => {
                tracing::debug!(id, method, "WS write did not complete before the deadline");
                return Err(timed_out());
            }
        }

        let delivery = tokio::select! {
            biased;
            delivered = rx => delivered
                .map_err(|_| RpcError::network("connection closed before response"))?,
            done = ctx.done() => return Err(done),
            _ = time::sleep_until(deadline) => return Err(timed_out()),
        };

        let response = delivery?;
        if self.config.debug {
            tracing::debug!(id, response = ?response, "WS response");
        }
        response.into_result().map_err(RpcError::protocol)
    }
}

/// WebSocket JSON-RPC client.
///
/// One reader task owns the receiving half of the connection and routes
/// responses to waiting callers by id; writes go through a single lock.
/// There is no reconnect: once closed, every call fails with a network error.
pub struct WsRpcClient {
    shared: Arc<Shared>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WsRpcClient {
    /// Dial `url` and start the reader task.
    pub async fn connect(url: &str, config: WsClientConfig) -> Result<Self, RpcError> {
        let url = normalize_endpoint(url)?;
        let state = AtomicU8::new(STATE_CONNECTING);
        tracing::info!(url = %url, "connecting via WebSocket");

        let handshake = config.handshake_timeout;
        let (stream, _) = time::timeout(handshake, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| RpcError::Timeout {
                ms: handshake.as_millis() as u64,
            })?
            .map_err(|e| RpcError::network_from(e, true))?;

        let (sink, source) = stream.split();
        state.store(STATE_OPEN, Ordering::Release);

        let shared = Arc::new(Shared {
            url,
            config,
            state,
            next_id: AtomicU64::new(1),
            pending: PendingTable::new(),
            subscriptions: SubscriptionManager::new(),
            writer: tokio::sync::Mutex::new(Some(sink)),
            shutdown: CancellationToken::new(),
        });
        let reader = tokio::spawn(read_loop(shared.clone(), source));
        tracing::info!(url = %shared.url, "WebSocket connected");

        Ok(Self {
            shared,
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    pub async fn from_config(config: &ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        if config.tls.as_ref().is_some_and(|tls| !tls.is_empty()) {
            tracing::warn!("TLS file options are not applied to WebSocket connections");
        }
        Self::connect(&config.endpoint, WsClientConfig::from(config)).await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of open subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.subscriptions.len()
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl Client for WsRpcClient {
    async fn call(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.shared.call(ctx, method, params).await
    }

    async fn subscribe(
        &self,
        ctx: &CallContext,
        filter: Value,
    ) -> Result<mpsc::Receiver<Event>, RpcError> {
        let shared = &self.shared;
        let result = shared
            .call(ctx, &shared.config.subscribe_method, json!([filter]))
            .await?;
        let sub_id = SubscriptionId::from_value(&result).ok_or_else(|| {
            RpcError::invalid_response(format!("subscribe result carries no subscription id: {result}"))
        })?;

        let rx = shared
            .subscriptions
            .register(sub_id.clone(), shared.config.event_buffer)
            .ok_or_else(|| RpcError::network("connection closed"))?;
        tracing::debug!(subscription = %sub_id, "subscription opened");

        tokio::spawn(watch_subscription(
            Arc::downgrade(shared),
            shared.shutdown.clone(),
            ctx.clone(),
            sub_id,
        ));
        Ok(rx)
    }

    async fn close(&self) -> Result<(), RpcError> {
        // Cancelling shutdown first makes any writer blocked in `send` give up
        // the lock.
        if self.shared.mark_closed() {
            tracing::info!(url = %self.shared.url, "closing WebSocket");
        }

        let sink = match time::timeout(CLOSE_FRAME_TIMEOUT, self.shared.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                tracing::debug!("writer still busy, skipping close frame");
                None
            }
        };
        if let Some(mut sink) = sink {
            match time::timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "close frame not sent"),
                Err(_) => tracing::debug!("close frame timed out"),
            }
        }

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "WS reader task failed");
            }
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.shared.url
    }

    fn protocol(&self) -> Protocol {
        Protocol::Websocket
    }
}

impl std::fmt::Debug for WsRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcClient")
            .field("url", &self.shared.url)
            .field("state", &self.shared.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

/// Reader task: routes frames until the connection ends, then fails every
/// waiting caller and closes every subscription.
async fn read_loop(shared: Arc<Shared>, mut source: WsSource) {
    let reason = loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break "connection closed".to_string(),
            msg = source.next() => match msg {
                None => break "connection closed by peer".to_string(),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WS receive error");
                    break format!("connection lost: {e}");
                }
                Some(Ok(Message::Text(text))) => handle_frame(&shared, text.as_bytes()),
                Some(Ok(Message::Binary(data))) => handle_frame(&shared, &data),
                Some(Ok(Message::Close(_))) => break "connection closed by peer".to_string(),
                Some(Ok(_)) => {}
            }
        }
    };

    shared.mark_closed();
    let failed = shared.pending.fail_all(&reason);
    let subscriptions = shared.subscriptions.close_all();
    // A writer still holding the lock leaves the sink to close() or drop.
    if let Ok(mut writer) = shared.writer.try_lock() {
        writer.take();
    }
    tracing::info!(
        url = %shared.url,
        %reason,
        failed_calls = failed,
        closed_subscriptions = subscriptions,
        "WebSocket closed"
    );
}

fn handle_frame(shared: &Shared, bytes: &[u8]) {
    let Ok(val) = serde_json::from_slice::<Value>(bytes) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    // Subscription notification: carries a method and params.subscription.
    if let (Some(method), Some(params)) = (val.get("method").and_then(Value::as_str), val.get("params")) {
        if let Some(sub_id) = params.get("subscription").and_then(SubscriptionId::from_value) {
            let payload = params
                .get("result")
                .cloned()
                .unwrap_or_else(|| params.clone());
            let event = Event {
                subscription: sub_id.0.clone(),
                method: method.to_string(),
                payload,
            };
            shared.subscriptions.dispatch(&sub_id, event);
            return;
        }
    }

    match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => {
            let id = resp.id.clone();
            if !shared.pending.deliver(resp) {
                tracing::debug!(%id, "discarding response with no waiting caller");
            }
        }
        Err(e) => tracing::debug!(error = %e, "ignoring unrecognised WS frame"),
    }
}

/// Close a subscription when its context finishes; the transport shutting
/// down closes it through the reader instead.
async fn watch_subscription(
    shared: Weak<Shared>,
    shutdown: CancellationToken,
    ctx: CallContext,
    sub_id: SubscriptionId,
) {
    tokio::select! {
        _ = ctx.done() => {}
        _ = shutdown.cancelled() => return,
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    if !shared.subscriptions.remove(&sub_id) {
        return;
    }
    tracing::debug!(subscription = %sub_id, "subscription closed by caller");

    let unsubscribe_ctx = CallContext::with_timeout(shared.config.request_timeout);
    let method = shared.config.unsubscribe_method.clone();
    if let Err(e) = shared
        .call(&unsubscribe_ctx, &method, json!([sub_id.0]))
        .await
    {
        tracing::debug!(subscription = %sub_id, error = %e, "unsubscribe failed");
    }
}
