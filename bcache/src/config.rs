//! Cache configuration and its defaulting rules.

use crate::error::ConfigError;
use crate::message::PeerId;

/// Default deletion delay, in seconds: how long a tombstone is kept alive
/// before it is considered safe, giving transient network partitions time
/// to observe the delete.
pub const DEFAULT_DELETION_DELAY_SECS: i64 = 100;

/// Configuration for a `Bcache` instance.
#[derive(Debug, Clone)]
pub struct BcacheConfig {
    /// Unique ID of this peer in the cluster. `0` derives an ID from the
    /// first "up" network interface's MAC address.
    pub peer_id: PeerId,
    /// `"host:port"` this peer listens on for mesh traffic.
    pub listen_addr: String,
    /// Seed peer addresses to dial on startup. The gossip protocol
    /// discovers the rest of the cluster from there.
    pub peers: Vec<String>,
    /// Maximum number of keys held by the LRU. Must be positive.
    pub max_keys: i64,
    /// Seconds a tombstone is kept before it is considered fully
    /// propagated. `<= 0` uses `DEFAULT_DELETION_DELAY_SECS`.
    pub deletion_delay_secs: i64,
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self {
            peer_id: 0,
            listen_addr: "0.0.0.0:0".to_string(),
            peers: Vec::new(),
            max_keys: 10_000,
            deletion_delay_secs: DEFAULT_DELETION_DELAY_SECS,
        }
    }
}

impl BcacheConfig {
    /// Parses `listen_addr` into `(host, port)`.
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        split_host_port(&self.listen_addr)
    }

    /// Applies default values in place: derives `peer_id` from the
    /// machine's MAC address if zero, and falls back to
    /// `DEFAULT_DELETION_DELAY_SECS` for a non-positive delay.
    pub fn set_default(&mut self) -> Result<(), ConfigError> {
        if self.peer_id == 0 {
            self.peer_id = derive_peer_id_from_mac()?;
        }
        if self.deletion_delay_secs <= 0 {
            self.deletion_delay_secs = DEFAULT_DELETION_DELAY_SECS;
        }
        Ok(())
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16), ConfigError> {
    let (host, port_str) = addr
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidListenAddr(addr.to_string()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|e| ConfigError::InvalidPort(addr.to_string(), e))?;
    Ok((host.to_string(), port))
}

/// Derives a peer ID from the first "up" network interface's MAC address:
/// the interface's hardware address, packed into a `u64`.
fn derive_peer_id_from_mac() -> Result<PeerId, ConfigError> {
    let mac = mac_address::get_mac_address()
        .map_err(|e| ConfigError::NoMacAddress(e.to_string()))?
        .ok_or_else(|| {
            ConfigError::NoMacAddress("no up network interface has a MAC address".to_string())
        })?;
    let bytes = mac.bytes();
    let mut buf = [0u8; 8];
    buf[2..8].copy_from_slice(&bytes);
    Ok(u64::from_be_bytes(buf))
}
