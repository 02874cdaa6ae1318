//! HTTP transport integration tests against local mock nodes.
//!
//! URLs always use `127.0.0.1` with an explicit port.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerrpc_core::policy::{RetryConfig, RetryPolicy};
use ledgerrpc_core::{CallContext, Client, ClientExt, ErrorKind, RpcError};
use ledgerrpc_http::{HttpClientConfig, HttpRpcClient};
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_fraction: 0.0,
    }
}

fn client_for(url: &str, retry: Option<RetryConfig>) -> HttpRpcClient {
    HttpRpcClient::new(
        url,
        HttpClientConfig {
            retry,
            request_timeout: Duration::from_secs(5),
            ..HttpClientConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn ping_returns_pong() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "jsonrpc": "2.0",
            "method": "ping",
            "id": 1
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#)
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let result = client
        .call(&CallContext::background(), "ping", json!([]))
        .await
        .unwrap();

    assert_eq!(result, json!("pong"));
    mock.assert_async().await;
}

#[tokio::test]
async fn nested_results_stay_untyped() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"height":12,"peers":["a","b"],"ratio":0.5}}"#)
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let result = client
        .call(&CallContext::background(), "status", Value::Null)
        .await
        .unwrap();
    assert_eq!(result["height"], 12);
    assert_eq!(result["peers"][1], "b");
    assert_eq!(result["ratio"], 0.5);
}

#[tokio::test]
async fn call_as_decodes_typed_results() {
    #[derive(serde::Deserialize)]
    struct Status {
        height: u64,
    }

    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"height":13}}"#)
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let status: Status = client
        .call_as(&CallContext::background(), "status", Value::Null)
        .await
        .unwrap();
    assert_eq!(status.height, 13);
}

#[tokio::test]
async fn structured_protocol_error_is_surfaced() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {
                    "code": -32010,
                    "message": "rejected",
                    "data": {
                        "code": "STAKE_LOCKED",
                        "layer": "staking",
                        "userMessage": "Stake is still locked",
                        "detail": "unlock at height 900",
                        "traceId": "abc123",
                        "timestamp": "2024-05-01T12:00:00Z",
                        "status": 409
                    }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server.url(), Some(fast_retry(3)));
    let err = client
        .call(&CallContext::background(), "unstake", json!([1]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    let problem = err.problem().expect("structured error");
    assert_eq!(problem.code, "STAKE_LOCKED");
    assert_eq!(problem.layer, "staking");
    assert_eq!(problem.trace_id, "abc123");
}

#[tokio::test]
async fn problem_details_encoded_as_string() {
    let data = json!({"code": "BAD_NONCE", "layer": "mempool"}).to_string();
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(
            json!({"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bad","data":data}})
                .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let err = client
        .call(&CallContext::background(), "submit", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.problem().map(|p| p.code.as_str()), Some("BAD_NONCE"));
}

#[tokio::test]
async fn unstructured_protocol_error_explains_itself() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server.url(), Some(fast_retry(3)));
    let err = client
        .call(&CallContext::background(), "nope", Value::Null)
        .await
        .unwrap_err();

    assert!(err.problem().is_none());
    let msg = err.to_string();
    assert!(msg.contains("without structured problem details"), "{msg}");
    assert!(msg.contains("-32601"));
    // protocol errors are never retried
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(503)
        .with_body("overloaded")
        .expect(3)
        .create_async()
        .await;

    let retries = Arc::new(AtomicU32::new(0));
    let seen = retries.clone();
    let client = client_for(&server.url(), None).with_retry_policy(
        RetryPolicy::new(fast_retry(2)).with_on_retry(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();

    match &err {
        RpcError::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, RpcError::Http { status: 503, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limited_responses_are_retryable() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server.url(), Some(fast_retry(1)));
    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::RetriesExhausted { attempts: 2, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(400)
        .with_body("bad request body")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server.url(), Some(fast_retry(3)));
    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    match err {
        RpcError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad request body");
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn truncated_error_body_is_reported_in_the_error() {
    // Answers 400 with a Content-Length it never delivers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 100\r\n\r\npartial")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    let client = client_for(&format!("http://{addr}"), None);
    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();

    match err {
        RpcError::Http { status, body } => {
            assert_eq!(status, 400);
            assert!(body.starts_with("<body unavailable"), "{body}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let client = client_for(&server.url(), Some(fast_retry(2)));
    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
}

#[tokio::test]
async fn mismatched_response_id_is_invalid() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":99,"result":"pong"}"#)
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
}

#[tokio::test]
async fn connection_refused_is_retried_as_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let attempts = Arc::new(AtomicU32::new(0));
    let counted = attempts.clone();
    let client = client_for(&format!("http://{addr}"), None).with_retry_policy(
        RetryPolicy::new(fast_retry(1)).with_on_retry(move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let err = client
        .call(&CallContext::background(), "ping", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(matches!(err, RpcError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_deadline_aborts_a_stalled_request() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = client_for(&format!("http://{addr}"), Some(fast_retry(3)));
    let ctx = CallContext::with_timeout(Duration::from_millis(150));
    let started = std::time::Instant::now();
    let err = client.call(&ctx, "ping", Value::Null).await.unwrap_err();

    assert!(matches!(err, RpcError::DeadlineExceeded), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn subscribe_is_not_supported() {
    let client = client_for("http://127.0.0.1:9", None);
    let err = client
        .subscribe(&CallContext::background(), json!({"kind": "blocks"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

#[tokio::test]
async fn rejected_transaction_is_a_value() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "sendRawTransaction",
            "params": ["cafebabe"]
        })))
        .with_status(200)
        .with_body(
            json!({"jsonrpc":"2.0","id":1,"error":{"code":-32010,"message":"fee too low",
                "data":{"code":"FEE_TOO_LOW","layer":"mempool","userMessage":"Fee below minimum"}}})
            .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let submission = client
        .send_raw_transaction(&CallContext::background(), "cafebabe")
        .await
        .unwrap();
    assert!(!submission.accepted);
    assert_eq!(submission.reason, "Fee below minimum");
}

#[tokio::test]
async fn accepted_transaction_returns_hash() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"txHash":"0xfeed","accepted":true}}"#)
        .create_async()
        .await;

    let client = client_for(&server.url(), None);
    let submission = client
        .send_raw_transaction(&CallContext::background(), "cafebabe")
        .await
        .unwrap();
    assert!(submission.accepted);
    assert_eq!(submission.tx_hash, "0xfeed");
}

#[tokio::test]
async fn concurrent_calls_share_one_client() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":null,"result":true}"#)
        .expect(16)
        .create_async()
        .await;

    let client = Arc::new(client_for(&server.url(), None));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call(&CallContext::background(), "health", Value::Null)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), json!(true));
    }
}
