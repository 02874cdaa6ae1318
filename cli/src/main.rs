//! ledgerrpc CLI: call, ping and subscribe to a ledger node from the terminal.
//!
//! Usage:
//! ```bash
//! # Send a raw JSON-RPC call
//! ledgerrpc call --url http://127.0.0.1:8545 --method status --params '[]'
//!
//! # Check a node (latency)
//! ledgerrpc ping --url ws://127.0.0.1:8546
//!
//! # Submit a signed transaction
//! ledgerrpc submit --url http://127.0.0.1:8545 --tx 0xf86c...
//!
//! # Stream push events until Ctrl-C
//! ledgerrpc subscribe --url ws://127.0.0.1:8546 --filter '{"kind":"blocks"}'
//! ```

use std::env;
use std::fs;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use ledgerrpc::{CallContext, Client, ClientConfig, Protocol, RetryConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "ping" => cmd_ping(&args[2..]).await,
        "submit" => cmd_submit(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("ledgerrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("ledgerrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Talk JSON-RPC to a ledger node over HTTP or WebSocket\n");
    println!("USAGE:");
    println!("    ledgerrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Send a raw JSON-RPC call and print the result");
    println!("    ping       Check an endpoint (latency)");
    println!("    submit     Submit a signed transaction (sendRawTransaction)");
    println!("    subscribe  Stream push events until Ctrl-C (WebSocket only)");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>              Node endpoint  [required unless --config]");
    println!("    --config <FILE>          JSON client config; other flags override it");
    println!("    --protocol <http|websocket>");
    println!("    --timeout <SECS>         Per-request timeout (default 30)");
    println!("    --retries <N>            Retry transient failures (HTTP only)");
    println!("    --debug                  Log request and response bodies");
    println!("    --method <NAME>          [call]");
    println!("    --params <JSON>          [call] default []");
    println!("    --tx <HEX>               [submit]");
    println!("    --filter <JSON>          [subscribe] default null\n");
    println!("Logging is controlled by RUST_LOG (default: warn).");
}

async fn cmd_call(args: &[String]) -> anyhow::Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params = parse_json_flag(args, "--params")?.unwrap_or_else(|| Value::Array(Vec::new()));
    let client = connect(args).await?;

    let result = client
        .call(&CallContext::background(), &method, params)
        .await;
    client.close().await?;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_ping(args: &[String]) -> anyhow::Result<()> {
    let client = connect(args).await?;
    println!("Pinging {} ({})...", client.endpoint(), client.protocol());

    let start = Instant::now();
    let result = client
        .call(&CallContext::background(), "ping", Value::Array(Vec::new()))
        .await;
    let latency = start.elapsed();
    client.close().await?;

    let value = result?;
    println!("  Status:   OK");
    println!("  Response: {value}");
    println!("  Latency:  {}ms", latency.as_millis());
    Ok(())
}

async fn cmd_submit(args: &[String]) -> anyhow::Result<()> {
    let tx = parse_flag(args, "--tx").context("--tx is required")?;
    let client = connect(args).await?;

    let result = client
        .send_raw_transaction(&CallContext::background(), &tx)
        .await;
    client.close().await?;

    let submission = result?;
    if submission.accepted {
        println!("Accepted: {}", submission.tx_hash);
        Ok(())
    } else {
        bail!("rejected by node: {}", submission.reason)
    }
}

async fn cmd_subscribe(args: &[String]) -> anyhow::Result<()> {
    let filter = parse_json_flag(args, "--filter")?.unwrap_or(Value::Null);
    let client = connect(args).await?;

    let ctx = CallContext::background();
    let mut events = client.subscribe(&ctx, filter).await?;
    eprintln!("Subscribed; press Ctrl-C to stop");

    let stop = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    client.close().await?;
    Ok(())
}

async fn connect(args: &[String]) -> anyhow::Result<Arc<dyn Client>> {
    let config = build_config(args)?;
    tracing::debug!(endpoint = %config.endpoint, protocol = %config.protocol, "connecting");
    ledgerrpc::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", config.endpoint))
}

/// Client config from `--config`, overridden by individual flags.
fn build_config(args: &[String]) -> anyhow::Result<ClientConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            ClientConfig::from_json(&raw)?
        }
        None => {
            let url = parse_flag(args, "--url").context("--url is required")?;
            ClientConfig::new(url, Protocol::default())
        }
    };

    if let Some(url) = parse_flag(args, "--url") {
        config.endpoint = url;
    }
    match parse_flag(args, "--protocol") {
        Some(protocol) => config.protocol = Protocol::from_str(&protocol)?,
        None if !has_flag(args, "--config") => config.protocol = infer_protocol(&config.endpoint),
        None => {}
    }
    if let Some(secs) = parse_flag(args, "--timeout") {
        config.timeout_secs = secs
            .parse()
            .with_context(|| format!("invalid --timeout {secs:?}"))?;
    }
    if let Some(n) = parse_flag(args, "--retries") {
        let max_retries = n
            .parse()
            .with_context(|| format!("invalid --retries {n:?}"))?;
        let retry = config.retry.take().unwrap_or_default();
        config.retry = Some(RetryConfig { max_retries, ..retry });
    }
    if has_flag(args, "--debug") {
        config.debug = true;
    }

    config.validate()?;
    Ok(config)
}

fn infer_protocol(endpoint: &str) -> Protocol {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Protocol::Websocket
    } else {
        Protocol::Http
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_json_flag(args: &[String], flag: &str) -> anyhow::Result<Option<Value>> {
    parse_flag(args, flag)
        .map(|raw| serde_json::from_str(&raw).with_context(|| format!("{flag} is not valid JSON")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_are_found_by_name() {
        let a = args(&["--url", "http://127.0.0.1:1", "--method", "status"]);
        assert_eq!(parse_flag(&a, "--method").as_deref(), Some("status"));
        assert_eq!(parse_flag(&a, "--tx"), None);
        assert!(parse_flag(&args(&["--method"]), "--method").is_none());
    }

    #[test]
    fn websocket_urls_pick_the_websocket_transport() {
        let config = build_config(&args(&["--url", "ws://127.0.0.1:8546"])).unwrap();
        assert_eq!(config.protocol, Protocol::Websocket);

        let config = build_config(&args(&["--url", "http://127.0.0.1:8545"])).unwrap();
        assert_eq!(config.protocol, Protocol::Http);
    }

    #[test]
    fn flags_override_defaults() {
        let config = build_config(&args(&[
            "--url",
            "http://127.0.0.1:8545",
            "--protocol",
            "ws",
            "--timeout",
            "5",
            "--retries",
            "2",
            "--debug",
        ]))
        .unwrap();
        assert_eq!(config.protocol, Protocol::Websocket);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retry.unwrap().max_retries, 2);
        assert!(config.debug);
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let path = env::temp_dir().join(format!("ledgerrpc-cli-{}.json", process::id()));
        fs::write(
            &path,
            r#"{"endpoint":"http://127.0.0.1:8545","protocol":"websocket","timeout_secs":7}"#,
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config =
            build_config(&args(&["--config", &path_str, "--url", "ws://127.0.0.1:9000"])).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(config.protocol, Protocol::Websocket);
        assert_eq!(config.timeout_secs, 7);
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(build_config(&args(&[])).is_err());
        assert!(build_config(&args(&["--url", "x", "--timeout", "soon"])).is_err());
        assert!(parse_json_flag(&args(&["--params", "[1,"]), "--params").is_err());
        assert_eq!(
            parse_json_flag(&args(&["--params", "[1]"]), "--params").unwrap(),
            Some(serde_json::json!([1]))
        );
    }
}
