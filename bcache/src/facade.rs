//! The public entry point: wires a gossip mesh transport to a [`Peer`] and
//! exposes `Set`/`Get`/`Delete`/`GetWithFiller`/`Close`.
//!
//! Generic over `T: MeshTransport` so the core crate stays free of any
//! concrete networking dependency; `bcache-node` supplies the real
//! libp2p-backed transport, while this crate's own tests use
//! [`crate::transport::LoopbackMesh`].

use std::future::Future;
use std::sync::Arc;

use crate::cache::now_ns;
use crate::config::BcacheConfig;
use crate::error::{BcacheError, FillerError};
use crate::filler::Filler;
use crate::peer::Peer;
use crate::transport::{Gossiper, MeshTransport};

/// Gossip channel name the core registers itself under on the mesh.
pub const GOSSIP_CHANNEL: &str = "bcache";

/// Wires a [`Peer`] to a gossip mesh transport and exposes the public API.
pub struct Bcache<T: MeshTransport> {
    peer: Arc<Peer>,
    filler: Filler,
    transport: T,
    deletion_delay_secs: i64,
}

impl<T: MeshTransport + 'static> Bcache<T> {
    /// Validates `config` (deriving `peer_id` from the MAC address and
    /// defaulting `deletion_delay_secs` if needed), constructs a `Peer`,
    /// registers it with `transport` under [`GOSSIP_CHANNEL`], starts the
    /// transport, and dials the configured seed peers.
    ///
    /// Must be called from within a Tokio runtime (the `Peer`'s action
    /// queue worker is spawned during construction).
    pub async fn new(mut config: BcacheConfig, transport: T) -> Result<Self, BcacheError> {
        config.set_default()?;

        let peer = Arc::new(Peer::new(config.peer_id, config.max_keys)?);

        let broadcaster = transport
            .register(GOSSIP_CHANNEL, peer.clone() as Arc<dyn Gossiper>)
            .map_err(BcacheError::Transport)?;
        peer.register(broadcaster).await;

        transport.start().map_err(BcacheError::Transport)?;
        transport.connect(&config.peers);

        Ok(Self {
            filler: Filler::new(peer.clone()),
            peer,
            transport,
            deletion_delay_secs: config.deletion_delay_secs,
        })
    }

    /// `ttl_seconds <= 0` is equivalent to [`Bcache::delete`]; otherwise
    /// writes the local cache with `expired = now + ttl_seconds` (in
    /// nanoseconds) and broadcasts the update.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl_seconds: i64) {
        if ttl_seconds <= 0 {
            self.delete(key).await;
            return;
        }
        let expired = now_ns() + ttl_seconds.saturating_mul(1_000_000_000);
        self.peer.set(key, value, expired).await;
    }

    /// Rewrites `key`'s entry with `deleted = now + deletion_delay_secs`
    /// and broadcasts the tombstone. A no-op if `key` is absent.
    pub async fn delete(&self, key: impl Into<String>) {
        let deleted = now_ns() + self.deletion_delay_secs.saturating_mul(1_000_000_000);
        self.peer.delete(key.into(), deleted).await;
    }

    /// Reads bypass the action queue and go straight to the Cache's read
    /// lock. Returns `(value, present)`.
    pub fn get(&self, key: &str) -> (String, bool) {
        self.peer.get(key)
    }

    /// `Get(key)`; on a miss, invokes `filler` with at most one concurrent
    /// invocation per key across callers in this process, then `Set`s the
    /// result with `expired = now + ttl_seconds`.
    pub async fn get_with_filler<F, Fut>(
        &self,
        key: &str,
        filler: Option<F>,
        ttl_seconds: i64,
    ) -> Result<String, FillerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, FillerError>> + Send + 'static,
    {
        self.filler.get_with_filler(key, filler, ttl_seconds).await
    }

    /// Stops the mesh transport and the `Peer`'s action queue worker.
    /// In-flight merges holding only the Cache lock are allowed to finish.
    pub async fn close(&self) -> Result<(), BcacheError> {
        self.peer.close().await;
        self.transport.stop().map_err(BcacheError::Transport)
    }

    /// The cluster-unique identifier this instance is registered under.
    pub fn peer_id(&self) -> crate::message::PeerId {
        self.peer.peer_id()
    }

    /// Number of entries currently held by the LRU, including
    /// not-yet-purged tombstones. Used to drive the `cache_size` gauge.
    pub fn len(&self) -> usize {
        self.peer.cache().len()
    }

    /// `true` if the cache currently holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.peer.cache().is_empty()
    }

    /// Total entries purged so far by LRU eviction or read-time
    /// expiry/tombstone checks. Monotonically increasing; used to drive the
    /// `evictions_total` counter.
    pub fn evictions(&self) -> u64 {
        self.peer.cache().evictions()
    }

    /// Total filler closures started so far by [`Bcache::get_with_filler`].
    /// Monotonically increasing; used to drive the
    /// `filler_invocations_total` counter.
    pub fn filler_invocations(&self) -> u64 {
        self.filler.invocations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackMesh;
    use std::time::Duration;

    fn config(peer_id: u64) -> BcacheConfig {
        BcacheConfig {
            peer_id,
            max_keys: 1_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn two_node_propagate() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        let p2 = Bcache::new(config(2), mesh.clone()).await.unwrap();

        p1.set("key1", "val1", 600).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(p2.get("key1"), ("val1".to_string(), true));
    }

    #[tokio::test]
    async fn late_join_reads_snapshot_after_mesh_wiring() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        for i in 0..15 {
            p1.set(format!("key_{i}"), format!("val_{i}"), 600).await;
        }

        // P2 joins after the keys already exist; it only sees updates
        // broadcast after registering. A real mesh periodically pulls a
        // full snapshot too; LoopbackMesh doesn't run that timer, so this
        // only exercises the broadcast path.
        let p2 = Bcache::new(config(2), mesh.clone()).await.unwrap();
        p1.set("key_7", "val_7", 600).await; // re-broadcast after P2 joined
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(p2.get("key_7"), ("val_7".to_string(), true));
    }

    #[tokio::test]
    async fn update_propagates_last_writer_wins() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        let p2 = Bcache::new(config(2), mesh.clone()).await.unwrap();
        let p3 = Bcache::new(config(3), mesh.clone()).await.unwrap();

        p1.set("k", "v1", 600).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        p2.set("k", "v2", 600).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(p1.get("k").0, "v2");
        assert_eq!(p2.get("k").0, "v2");
        assert_eq!(p3.get("k").0, "v2");
    }

    #[tokio::test]
    async fn delete_propagates_to_all_peers() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        let p2 = Bcache::new(config(2), mesh.clone()).await.unwrap();

        p1.set("k", "v1", 600).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        p1.delete("k").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(p1.get("k"), (String::new(), false));
        assert_eq!(p2.get("k"), (String::new(), false));
    }

    #[tokio::test]
    async fn filler_populates_and_broadcasts() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        let p2 = Bcache::new(config(2), mesh.clone()).await.unwrap();

        let value = p1
            .get_with_filler("x", Some(|| async { Ok("x-value".to_string()) }), 600)
            .await
            .unwrap();
        assert_eq!(value, "x-value");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(p2.get("x"), ("x-value".to_string(), true));
    }

    #[tokio::test]
    async fn ttl_leq_zero_routes_set_to_delete() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        p1.set("k", "v", 600).await;
        assert_eq!(p1.get("k"), ("v".to_string(), true));

        p1.set("k", "ignored", 0).await;
        assert_eq!(p1.get("k"), (String::new(), false));
    }

    #[tokio::test]
    async fn len_reflects_local_writes() {
        let mesh = LoopbackMesh::new();
        let p1 = Bcache::new(config(1), mesh.clone()).await.unwrap();
        assert!(p1.is_empty());
        p1.set("a", "1", 600).await;
        p1.set("b", "2", 600).await;
        assert_eq!(p1.len(), 2);
        assert!(!p1.is_empty());
    }
}
