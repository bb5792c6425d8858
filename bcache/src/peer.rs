//! The single-writer envelope around a `Cache`: serializes local mutations
//! through one action queue so that a Cache write always linearizes before
//! its corresponding outbound broadcast, while letting gossip callbacks run
//! directly against the Cache's own lock.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::message::{Message, PeerId};
use crate::transport::{GossipBroadcaster, Gossiper};

enum Action {
    Register {
        broadcaster: Arc<dyn GossipBroadcaster>,
        done: oneshot::Sender<()>,
    },
    Set {
        key: String,
        value: String,
        expired: i64,
        done: oneshot::Sender<()>,
    },
    Delete {
        key: String,
        deleted: i64,
        done: oneshot::Sender<(String, i64, bool)>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Owns one `Cache` and serializes every local mutation through a single
/// dedicated worker task, so that a Set's broadcast call to the transport
/// always happens after the local Cache write.
pub struct Peer {
    peer_id: PeerId,
    cache: Arc<Cache>,
    action_tx: mpsc::UnboundedSender<Action>,
}

impl Peer {
    /// Creates a peer with a fresh `Cache` of the given capacity and spawns
    /// its action-queue worker. Must be called from within a Tokio runtime.
    pub fn new(peer_id: PeerId, max_keys: i64) -> Result<Self, CacheError> {
        let cache = Arc::new(Cache::new(peer_id, max_keys)?);
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run(peer_id, cache.clone(), action_rx));
        Ok(Self {
            peer_id,
            cache,
            action_tx,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Registers the transport's broadcaster handle. Happens-before any
    /// broadcast that observes it, because registration itself goes
    /// through the action queue.
    pub async fn register(&self, broadcaster: Arc<dyn GossipBroadcaster>) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .action_tx
            .send(Action::Register {
                broadcaster,
                done: done_tx,
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    /// Local Set: writes the Cache with `deleted = 0`, then (if a
    /// broadcaster is registered) hands a single-entry `Message` to it.
    /// Blocks until the local write and broadcast handoff complete.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>, expired: i64) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self.action_tx.send(Action::Set {
            key: key.into(),
            value: value.into(),
            expired,
            done: done_tx,
        });
        if sent.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Local Delete: if `key` exists, rewrites it with the new `deleted`
    /// timestamp and broadcasts `(key, prev_value, prev_expired, deleted)`.
    /// Returns `(prev_value, prev_expired, existed)`.
    pub async fn delete(&self, key: impl Into<String>, deleted: i64) -> (String, i64, bool) {
        let (done_tx, done_rx) = oneshot::channel();
        let key = key.into();
        let sent = self.action_tx.send(Action::Delete {
            key,
            deleted,
            done: done_tx,
        });
        if sent.is_ok() {
            done_rx.await.unwrap_or((String::new(), 0, false))
        } else {
            (String::new(), 0, false)
        }
    }

    /// Reads bypass the action queue entirely and go straight to the
    /// Cache's read lock.
    pub fn get(&self, key: &str) -> (String, bool) {
        self.cache.get(key)
    }

    /// Direct handle to the underlying cache, used by the single-flight
    /// filler and by tests.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Stops the action-queue worker. Submitted actions after this call
    /// have no effect. Gossip callbacks remain safe to call (they only
    /// take the Cache lock) and any in-flight merge is allowed to finish.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.action_tx.send(Action::Shutdown { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn run(peer_id: PeerId, cache: Arc<Cache>, mut rx: mpsc::UnboundedReceiver<Action>) {
        let mut broadcaster: Option<Arc<dyn GossipBroadcaster>> = None;
        while let Some(action) = rx.recv().await {
            match action {
                Action::Register { broadcaster: b, done } => {
                    broadcaster = Some(b);
                    let _ = done.send(());
                }
                Action::Set {
                    key,
                    value,
                    expired,
                    done,
                } => {
                    cache.set(key.clone(), Entry::new(value.clone(), expired, 0));
                    broadcast_one(&broadcaster, peer_id, &key, Entry::new(value, expired, 0));
                    let _ = done.send(());
                }
                Action::Delete {
                    key,
                    deleted,
                    done,
                } => {
                    let (prev_value, prev_expired, existed) = cache.delete(&key, deleted);
                    if existed {
                        broadcast_one(
                            &broadcaster,
                            peer_id,
                            &key,
                            Entry::new(prev_value.clone(), prev_expired, deleted),
                        );
                    }
                    let _ = done.send((prev_value, prev_expired, existed));
                }
                Action::Shutdown { done } => {
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!(peer_id, "peer action loop stopped");
    }
}

fn broadcast_one(
    broadcaster: &Option<Arc<dyn GossipBroadcaster>>,
    peer_id: PeerId,
    key: &str,
    entry: Entry,
) {
    match broadcaster {
        Some(b) => {
            let msg = Message::single(peer_id, key.to_string(), entry);
            match msg.encode() {
                Ok(buf) => b.gossip_broadcast(buf),
                Err(err) => warn!(%err, key, "failed to encode outbound gossip message"),
            }
        }
        None => debug!(key, "no transport registered; not broadcasting update"),
    }
}

impl Gossiper for Peer {
    fn gossip(&self) -> Message {
        self.cache.messages()
    }

    fn on_gossip(&self, buf: &[u8]) -> Result<Option<Message>, crate::error::CodecError> {
        let msg = Message::decode(buf)?;
        Ok(self.cache.merge_new(&msg))
    }

    fn on_gossip_broadcast(
        &self,
        src: PeerId,
        buf: &[u8],
    ) -> Result<Message, crate::error::CodecError> {
        if src == self.peer_id {
            debug!(src, "dropping self-originated gossip broadcast");
            return Ok(Message::new(self.peer_id));
        }
        let msg = Message::decode(buf)?;
        Ok(self.cache.merge_delta(&msg))
    }

    fn on_gossip_unicast(&self, _src: PeerId, buf: &[u8]) -> Result<(), crate::error::CodecError> {
        let msg = Message::decode(buf)?;
        self.cache.merge_complete(&msg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBroadcaster {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingBroadcaster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl GossipBroadcaster for RecordingBroadcaster {
        fn gossip_broadcast(&self, data: Vec<u8>) {
            self.sent.lock().unwrap().push(data);
        }
    }

    #[tokio::test]
    async fn set_is_visible_to_local_get_immediately() {
        let peer = Peer::new(1, 100).expect("peer");
        peer.set("k1", "v1", 0).await;
        assert_eq!(peer.get("k1"), ("v1".to_string(), true));
    }

    #[tokio::test]
    async fn set_before_register_does_not_broadcast() {
        let peer = Peer::new(1, 100).expect("peer");
        peer.set("k1", "v1", 0).await;
        assert_eq!(peer.get("k1"), ("v1".to_string(), true));
    }

    #[tokio::test]
    async fn set_after_register_broadcasts_single_entry_message() {
        let peer = Peer::new(1, 100).expect("peer");
        let broadcaster = RecordingBroadcaster::new();
        peer.register(broadcaster.clone()).await;

        peer.set("k1", "v1", 0).await;

        let sent = broadcaster.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let msg = Message::decode(&sent[0]).unwrap();
        assert_eq!(msg.peer_id, 1);
        assert_eq!(msg.entries["k1"].value, "v1");
    }

    #[tokio::test]
    async fn delete_of_existing_key_broadcasts_tombstone() {
        let peer = Peer::new(1, 100).expect("peer");
        let broadcaster = RecordingBroadcaster::new();
        peer.register(broadcaster.clone()).await;

        peer.set("k1", "v1", 0).await;
        let (prev, _, existed) = peer.delete("k1", 999).await;
        assert_eq!(prev, "v1");
        assert!(existed);

        let sent = broadcaster.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let msg = Message::decode(&sent[1]).unwrap();
        assert_eq!(msg.entries["k1"].deleted, 999);
    }

    #[tokio::test]
    async fn delete_of_missing_key_does_not_broadcast() {
        let peer = Peer::new(1, 100).expect("peer");
        let broadcaster = RecordingBroadcaster::new();
        peer.register(broadcaster.clone()).await;

        let (_, _, existed) = peer.delete("missing", 1).await;
        assert!(!existed);
        assert!(broadcaster.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_gossip_broadcast_drops_self_messages() {
        let peer = Peer::new(1, 100).expect("peer");
        let msg = Message::single(1, "k1", Entry::new("v1", 100, 0));
        let buf = msg.encode().unwrap();
        let delta = peer.on_gossip_broadcast(1, &buf).unwrap();
        assert!(delta.is_empty());
        assert_eq!(peer.get("k1"), (String::new(), false));
    }

    #[tokio::test]
    async fn on_gossip_broadcast_merges_remote_messages() {
        let peer = Peer::new(1, 100).expect("peer");
        let msg = Message::single(2, "k1", Entry::new("v1", 100, 0));
        let buf = msg.encode().unwrap();
        let delta = peer.on_gossip_broadcast(2, &buf).unwrap();
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(peer.get("k1"), ("v1".to_string(), true));
    }

    #[tokio::test]
    async fn on_gossip_returns_none_when_nothing_new() {
        let peer = Peer::new(1, 100).expect("peer");
        peer.set("k1", "v1", 200).await;
        let msg = Message::single(2, "k1", Entry::new("v2", 100, 0));
        let buf = msg.encode().unwrap();
        assert!(peer.on_gossip(&buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn on_gossip_unicast_applies_full_state() {
        let peer = Peer::new(1, 100).expect("peer");
        let msg = Message::single(2, "k1", Entry::new("v1", 100, 0));
        let buf = msg.encode().unwrap();
        peer.on_gossip_unicast(2, &buf).unwrap();
        assert_eq!(peer.get("k1"), ("v1".to_string(), true));
    }

    #[tokio::test]
    async fn close_stops_accepting_new_actions() {
        let peer = Peer::new(1, 100).expect("peer");
        peer.set("k1", "v1", 0).await;
        peer.close().await;
        // The worker has exited; further sets just never complete their
        // action but must not panic.
        peer.set("k2", "v2", 0).await;
        assert_eq!(peer.get("k1"), ("v1".to_string(), true));
    }
}
