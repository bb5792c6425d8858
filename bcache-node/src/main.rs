// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # bcache Node
//!
//! Entry point for the `bcache-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires a libp2p mesh transport to the
//! embedded cache, and serves the HTTP administration API.
//!
//! The binary supports five subcommands:
//!
//! - `run`    — start a peer
//! - `get`    — fetch a key from a running peer
//! - `set`    — set a key on a running peer
//! - `delete` — delete a key on a running peer
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use bcache::{Bcache, BcacheConfig};
use cli::{BcacheNodeCli, Commands, DeleteArgs, GetArgs, RunArgs, SetArgs};
use logging::LogFormat;
use metrics::NodeMetrics;
use transport::LibP2pTransport;

/// A running peer wired to the libp2p-backed mesh transport. The concrete
/// transport type lives in this binary; the `bcache` core stays generic
/// over `MeshTransport`.
pub type BcachePeer = Bcache<LibP2pTransport>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BcacheNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Get(args) => get_key(args).await,
        Commands::Set(args) => set_key(args).await,
        Commands::Delete(args) => delete_key(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — peer startup sequence
// ---------------------------------------------------------------------------

/// Starts a peer: mesh transport, embedded cache, HTTP administration API,
/// and Prometheus metrics.
///
/// Startup sequence:
/// 1. Initialize logging.
/// 2. Build `BcacheConfig` from CLI args.
/// 3. Create the Prometheus metrics registry.
/// 4. Build the libp2p mesh transport and dial seed peers.
/// 5. Build the `Bcache` facade (spawns the peer's action-queue worker).
/// 6. Serve the HTTP administration API and the metrics endpoint.
/// 7. Await a shutdown signal; close the peer gracefully.
async fn run_node(args: RunArgs) -> Result<()> {
    let format = LogFormat::from_str_lossy(&args.log_format);
    logging::init_logging(&format!("bcache_node={0},bcache={0}", args.log_level), format);

    if !cli::validate_log_level(&args.log_level) {
        anyhow::bail!("invalid log level: {}", args.log_level);
    }

    let config = BcacheConfig {
        peer_id: args.peer_id,
        listen_addr: args.listen_addr.clone(),
        peers: args.peers.clone(),
        max_keys: args.max_keys,
        deletion_delay_secs: args.deletion_delay_secs,
    };

    let node_metrics = Arc::new(NodeMetrics::new());

    let mesh_transport = LibP2pTransport::new(&config.listen_addr, Arc::clone(&node_metrics))
        .context("failed to start mesh transport")?;
    tracing::info!(peer = %mesh_transport.local_peer_id(), "mesh transport identity");

    let cache = Arc::new(
        Bcache::new(config, mesh_transport)
            .await
            .context("failed to start bcache peer")?,
    );
    node_metrics.cache_size.set(cache.len() as i64);
    tracing::info!(peer_id = cache.peer_id(), "peer started");

    tokio::spawn(refresh_gauges(Arc::clone(&cache), Arc::clone(&node_metrics)));

    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: Arc::clone(&cache),
        metrics: Arc::clone(&node_metrics),
    };

    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", args.http_addr))?;
    tracing::info!("HTTP API listening on {}", args.http_addr);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", args.metrics_addr))?;
    tracing::info!("Metrics server listening on {}", args.metrics_addr);

    print_startup_banner(cache.peer_id(), &args.http_addr, &args.listen_addr, &args.peers);

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("HTTP API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    cache.close().await.ok();
    tracing::info!("bcache-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Gauge refresh
// ---------------------------------------------------------------------------

/// Periodically refreshes the `cache_size` gauge and the `evictions_total`
/// and `filler_invocations_total` counters from the peer's own accounting,
/// since none of them changes on its own schedule the way request-driven
/// counters do.
async fn refresh_gauges(cache: Arc<BcachePeer>, metrics: Arc<NodeMetrics>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
    let mut last_evictions = cache.evictions();
    let mut last_filler_invocations = cache.filler_invocations();
    loop {
        interval.tick().await;
        metrics.cache_size.set(cache.len() as i64);

        let evictions = cache.evictions();
        let evictions_delta = evictions.saturating_sub(last_evictions);
        if evictions_delta > 0 {
            metrics.evictions_total.inc_by(evictions_delta);
        }
        last_evictions = evictions;

        let filler_invocations = cache.filler_invocations();
        let filler_delta = filler_invocations.saturating_sub(last_filler_invocations);
        if filler_delta > 0 {
            metrics.filler_invocations_total.inc_by(filler_delta);
        }
        last_filler_invocations = filler_invocations;
    }
}

// ---------------------------------------------------------------------------
// get / set / delete — one-shot client subcommands
// ---------------------------------------------------------------------------

/// `get` subcommand: fetches a key from a running peer's HTTP API.
async fn get_key(args: GetArgs) -> Result<()> {
    let url = format!("{}/keys/{}", args.client.http_url.trim_end_matches('/'), args.key);
    let (status, body) = http_request("GET", &url, None).await?;
    if status == 404 {
        println!("(absent)");
        return Ok(());
    }
    if status != 200 {
        anyhow::bail!("unexpected status {status}: {body}");
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => match json.get("value").and_then(|v| v.as_str()) {
            Some(value) => println!("{value}"),
            None => println!("(absent)"),
        },
        Err(_) => println!("{body}"),
    }
    Ok(())
}

/// `set` subcommand: sets a key's value and TTL on a running peer.
async fn set_key(args: SetArgs) -> Result<()> {
    let url = format!("{}/keys/{}", args.client.http_url.trim_end_matches('/'), args.key);
    let body = serde_json::json!({ "value": args.value, "ttl_seconds": args.ttl_seconds }).to_string();
    let (status, resp) = http_request("PUT", &url, Some(body)).await?;
    if status != 204 {
        anyhow::bail!("unexpected status {status}: {resp}");
    }
    println!("ok");
    Ok(())
}

/// `delete` subcommand: tombstones a key on a running peer.
async fn delete_key(args: DeleteArgs) -> Result<()> {
    let url = format!("{}/keys/{}", args.client.http_url.trim_end_matches('/'), args.key);
    let (status, resp) = http_request("DELETE", &url, None).await?;
    if status != 204 {
        anyhow::bail!("unexpected status {status}: {resp}");
    }
    println!("ok");
    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

/// Prints version information to stdout.
fn print_version() {
    println!("bcache-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc       {}", rustc_version());
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit      {}", commit);
    }
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

/// Prints the peer startup banner with configuration summary.
fn print_startup_banner(peer_id: u64, http_addr: &str, listen_addr: &str, seeds: &[String]) {
    let seeds_str = if seeds.is_empty() {
        "(none)".to_string()
    } else {
        seeds.join(", ")
    };

    let lines = [
        format!("  Peer ID: {}", peer_id),
        format!("  HTTP:    http://{}", http_addr),
        format!("  Mesh:    /ip4/{}", listen_addr.replace(':', "/tcp/")),
        format!("  Seeds:   {}", seeds_str),
    ];

    let title = format!("  bcache-node v{}", env!("CARGO_PKG_VERSION"));

    let max_width = lines
        .iter()
        .map(|l| l.len())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(40)
        + 4;

    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{}\u{2557}", border);
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{}\u{2563}", border);
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{}\u{255D}", border);
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Minimal HTTP client
// ---------------------------------------------------------------------------

/// Minimal HTTP/1.1 request without pulling in `reqwest` as a dependency.
/// Returns `(status_code, body)`. Good enough for the one-shot client
/// subcommands talking to a single local/nearby peer.
async fn http_request(method: &str, url: &str, body: Option<String>) -> Result<(u16, String)> {
    let parsed: url::Url = url.parse().map_err(|e| anyhow::anyhow!("invalid URL: {e}"))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{host}:{port}");
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let body = body.unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let (head, rest) = response
        .split_once("\r\n\r\n")
        .unwrap_or((response.as_ref(), ""));
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);

    Ok((status, rest.to_string()))
}

/// Minimal URL parser — just enough to extract host/port/path.
/// Avoids pulling in the `url` crate for a single use.
mod url {
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> Option<&str> {
            Some(&self.host)
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let rest = s
                .strip_prefix("http://")
                .or_else(|| s.strip_prefix("https://"))
                .unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {e}"))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_cli_does_not_panic() {
        print_version();
    }

    #[test]
    fn url_parses_host_port_path() {
        let parsed: url::Url = "http://127.0.0.1:8080/keys/foo".parse().unwrap();
        assert_eq!(parsed.host_str(), Some("127.0.0.1"));
        assert_eq!(parsed.port(), Some(8080));
        assert_eq!(parsed.path(), "/keys/foo");
    }

    #[test]
    fn url_defaults_missing_port() {
        let parsed: url::Url = "http://example.com/keys/foo".parse().unwrap();
        assert_eq!(parsed.port(), None);
    }

    #[test]
    fn banner_does_not_panic_with_no_seeds() {
        print_startup_banner(1, "0.0.0.0:8080", "0.0.0.0:7946", &[]);
    }

    #[test]
    fn banner_does_not_panic_with_seeds() {
        print_startup_banner(
            1,
            "0.0.0.0:8080",
            "0.0.0.0:7946",
            &["127.0.0.1:7947".to_string()],
        );
    }
}
