//! The contract the core requires of a gossip mesh transport.
//!
//! The mesh itself (discovery, membership, connection management, retry,
//! and the choice of when to invoke which gossip callback) is an external
//! collaborator and out of scope for this crate — see the crate-level docs.
//! What *is* in scope is the boundary: the traits below, plus an in-memory
//! `LoopbackTransport` used by this crate's own integration tests to
//! simulate a small cluster without opening a single socket.

use std::sync::Arc;

use crate::error::{CodecError, TransportError};
use crate::message::{Message, PeerId};

/// What a `Peer` calls to originate a broadcast. Non-blocking at the
/// boundary — the transport is expected to hand the buffer off to its own
/// send queue and return immediately.
pub trait GossipBroadcaster: Send + Sync {
    fn gossip_broadcast(&self, data: Vec<u8>);
}

/// The three gossip callbacks a transport invokes on a registered peer, plus
/// the periodic full-state pull. Implemented by `Peer`.
pub trait Gossiper: Send + Sync {
    /// Full snapshot of local state, for periodic anti-entropy pulls.
    fn gossip(&self) -> Message;

    /// Decode `buf`, merge it, and return "everything new I've just learnt"
    /// (`None` if nothing in `buf` was new).
    fn on_gossip(&self, buf: &[u8]) -> Result<Option<Message>, CodecError>;

    /// Decode `buf` received via epidemic broadcast from `src` and return the
    /// delta for further propagation (empty but non-`None` if nothing new).
    /// Self-originated broadcasts (`src == self`) are silently dropped.
    fn on_gossip_broadcast(&self, src: PeerId, buf: &[u8]) -> Result<Message, CodecError>;

    /// Decode `buf` received via direct unicast and merge it completely; no
    /// delta is returned.
    fn on_gossip_unicast(&self, src: PeerId, buf: &[u8]) -> Result<(), CodecError>;
}

/// What a facade needs from the underlying mesh: register a `Gossiper`
/// under a channel name, get back a broadcaster handle, start, stop, and
/// dial a set of seed addresses.
pub trait MeshTransport: Send + Sync {
    /// Registers `gossiper` under `channel` and returns a handle the
    /// caller can use to originate broadcasts on that channel.
    fn register(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipBroadcaster>, TransportError>;

    /// Starts the transport (listening socket, background tasks, ...).
    fn start(&self) -> Result<(), TransportError>;

    /// Stops the transport. In-flight merges under the `Cache` lock are
    /// allowed to finish.
    fn stop(&self) -> Result<(), TransportError>;

    /// Initiates outbound connections to the given seed addresses.
    fn connect(&self, addrs: &[String]);
}

/// An in-process, fully-connected mesh used only by this crate's own
/// integration tests to simulate a small cluster without opening a single
/// socket. Every peer registered on a channel is directly wired to every
/// other peer on that channel; a broadcast on the channel fans out to all
/// of them synchronously.
pub struct LoopbackMesh {
    channels: std::sync::Mutex<std::collections::HashMap<String, Vec<Arc<dyn Gossiper>>>>,
}

impl LoopbackMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }
}

impl MeshTransport for Arc<LoopbackMesh> {
    fn register(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipBroadcaster>, TransportError> {
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(gossiper);
        Ok(Arc::new(LoopbackBroadcaster {
            mesh: Arc::clone(self),
            channel: channel.to_string(),
        }))
    }

    fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connect(&self, _addrs: &[String]) {}
}

struct LoopbackBroadcaster {
    mesh: Arc<LoopbackMesh>,
    channel: String,
}

impl GossipBroadcaster for LoopbackBroadcaster {
    fn gossip_broadcast(&self, data: Vec<u8>) {
        let src = Message::decode(&data).map(|m| m.peer_id).unwrap_or(0);
        let targets = self
            .mesh
            .channels
            .lock()
            .unwrap()
            .get(&self.channel)
            .cloned()
            .unwrap_or_default();
        for gossiper in targets {
            if let Err(err) = gossiper.on_gossip_broadcast(src, &data) {
                tracing::warn!(%err, "loopback mesh failed to deliver broadcast");
            }
        }
    }
}
