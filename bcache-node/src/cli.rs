//! # CLI Interface
//!
//! Defines the command-line argument structure for `bcache-node` using
//! `clap` derive. Supports a `run` subcommand that starts a peer, one-shot
//! `get`/`set`/`delete` client commands against a running node's HTTP
//! facade, and `version`.

use clap::{Parser, Subcommand};

/// bcache peer process.
///
/// Wires a gossip mesh transport to an embedded, eventually-consistent
/// key/value cache, serves an HTTP administration API, and exposes
/// Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "bcache-node",
    about = "bcache gossiping cache peer",
    version,
    propagate_version = true
)]
pub struct BcacheNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the `bcache-node` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a peer: mesh transport, HTTP facade, metrics.
    Run(RunArgs),
    /// Fetch a key's value from a running node.
    Get(GetArgs),
    /// Set a key's value on a running node.
    Set(SetArgs),
    /// Delete a key on a running node.
    Delete(DeleteArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// This peer's cluster-unique ID. `0` derives an ID from the machine's
    /// MAC address.
    #[arg(long, env = "BCACHE_PEER_ID", default_value_t = 0)]
    pub peer_id: u64,

    /// `"host:port"` this peer listens on for mesh (libp2p) traffic.
    #[arg(long, env = "BCACHE_LISTEN_ADDR", default_value = "0.0.0.0:7946")]
    pub listen_addr: String,

    /// Seed peer addresses to dial on startup (`host:port`, comma-separated).
    #[arg(long, env = "BCACHE_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Maximum number of keys held by the LRU. Must be positive.
    #[arg(long, env = "BCACHE_MAX_KEYS", default_value_t = 100_000)]
    pub max_keys: i64,

    /// Seconds a tombstone is kept alive before it is considered safe.
    #[arg(long, env = "BCACHE_DELETION_DELAY", default_value_t = 100)]
    pub deletion_delay_secs: i64,

    /// Address the HTTP administration/demo API binds to.
    #[arg(long, env = "BCACHE_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Address the Prometheus `/metrics` endpoint binds to.
    #[arg(long, env = "BCACHE_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: String,

    /// Default `RUST_LOG` directive used when the environment variable is
    /// unset.
    #[arg(long, env = "BCACHE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "BCACHE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments shared by the `get`/`set`/`delete` client subcommands.
#[derive(Parser, Debug)]
pub struct ClientArgs {
    /// Base URL of a running node's HTTP facade.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub http_url: String,
}

/// Arguments for the `get` subcommand.
#[derive(Parser, Debug)]
pub struct GetArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    /// Key to fetch.
    pub key: String,
}

/// Arguments for the `set` subcommand.
#[derive(Parser, Debug)]
pub struct SetArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    /// Key to set.
    pub key: String,
    /// Value to associate with the key.
    pub value: String,
    /// Time-to-live in seconds. `<= 0` deletes the key instead.
    #[arg(long, default_value_t = 600)]
    pub ttl_seconds: i64,
}

/// Arguments for the `delete` subcommand.
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    /// Key to delete.
    pub key: String,
}

/// Validates a `RUST_LOG`-style level string against the levels the
/// `tracing` `EnvFilter` understands at the crate level.
pub fn validate_log_level(level: &str) -> bool {
    matches!(
        level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        BcacheNodeCli::command().debug_assert();
    }

    #[test]
    fn log_level_validation() {
        assert!(validate_log_level("info"));
        assert!(validate_log_level("DEBUG"));
        assert!(!validate_log_level("garbage"));
    }
}
