//! Concrete `MeshTransport` implementation over `libp2p`.
//!
//! Discovery, membership, connection management, and the choice of when to
//! invoke each gossip callback all live here, outside the `bcache` core. The
//! swarm combines:
//!
//! - `gossipsub` on topic `"bcache"` for epidemic broadcast
//!   (`OnGossipBroadcast`).
//! - `identify` so peers exchange listen addresses and agent versions.
//! - `kademlia` for seed-peer bootstrap/discovery.
//! - `request_response` for direct unicast state transfer
//!   (`OnGossipUnicast`) and the periodic full-state pull
//!   (`Gossip`/`OnGossip`).
//!
//! The swarm runs on its own `tokio::spawn`-ed task, driven by a command
//! channel; `LibP2pTransport`'s `MeshTransport` methods are thin,
//! non-blocking handles onto that task.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bcache::error::TransportError;
use bcache::transport::{GossipBroadcaster, Gossiper, MeshTransport};
use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use libp2p::{
    gossipsub, identify, identity, kad,
    multiaddr::Protocol,
    request_response,
    swarm::{NetworkBehaviour, SwarmEvent},
    Multiaddr, PeerId, StreamProtocol,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::SharedMetrics;

/// Gossipsub topic / request-response protocol name, matching the core's
/// gossip channel name.
const CHANNEL: &str = "bcache";

#[derive(Clone, Default)]
struct StateTransferCodec;

/// Raw length-prefixed byte exchange for `request_response` — the state
/// transfer payload is already a self-describing JSON `Message`, so no
/// additional framing beyond a length prefix is needed.
#[async_trait::async_trait]
impl request_response::Codec for StateTransferCodec {
    type Protocol = StreamProtocol;
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    async fn read_request<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<Vec<u8>>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        read_length_prefixed(io).await
    }

    async fn read_response<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<Vec<u8>>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        read_length_prefixed(io).await
    }

    async fn write_request<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        req: Vec<u8>,
    ) -> io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        res: Vec<u8>,
    ) -> io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, &res).await
    }
}

const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

async fn read_length_prefixed<T: futures::AsyncRead + Unpin + Send>(
    io: &mut T,
) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "message too large"));
    }
    let mut buf = vec![0u8; len as usize];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_length_prefixed<T: futures::AsyncWrite + Unpin + Send>(
    io: &mut T,
    data: &[u8],
) -> io::Result<()> {
    io.write_all(&(data.len() as u32).to_be_bytes()).await?;
    io.write_all(data).await?;
    io.close().await?;
    Ok(())
}

#[derive(NetworkBehaviour)]
struct BcacheBehaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    kademlia: kad::Behaviour<kad::store::MemoryStore>,
    state_transfer: request_response::Behaviour<StateTransferCodec>,
}

enum Command {
    Publish(Vec<u8>),
    Dial(Multiaddr),
    Shutdown,
}

/// A `libp2p`-backed `MeshTransport`. Cheap to clone — every clone shares
/// the same background swarm task via the command channel.
#[derive(Clone)]
pub struct LibP2pTransport {
    cmd_tx: mpsc::UnboundedSender<Command>,
    local_peer_id: PeerId,
    gossiper: Arc<Mutex<Option<Arc<dyn Gossiper>>>>,
    metrics: SharedMetrics,
}

impl LibP2pTransport {
    /// Builds the swarm (TCP + Noise + Yamux) and spawns its event loop.
    /// `listen_addr` is `"host:port"`, matching `BcacheConfig::listen_addr`.
    pub fn new(listen_addr: &str, metrics: SharedMetrics) -> Result<Self, TransportError> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        info!(%local_peer_id, "generated mesh transport identity");

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(local_key.clone())
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| TransportError::Start(e.to_string()))?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Permissive)
                    .build()
                    .expect("valid gossipsub config");
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .expect("valid gossipsub behaviour");

                let identify = identify::Behaviour::new(identify::Config::new(
                    "/bcache/1.0.0".to_string(),
                    key.public(),
                ));

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);

                let state_transfer = request_response::Behaviour::new(
                    [(
                        StreamProtocol::new("/bcache/state/1.0.0"),
                        request_response::ProtocolSupport::Full,
                    )],
                    request_response::Config::default(),
                );

                BcacheBehaviour {
                    gossipsub,
                    identify,
                    kademlia,
                    state_transfer,
                }
            })
            .map_err(|e| TransportError::Start(e.to_string()))?
            .build();

        let topic = gossipsub::IdentTopic::new(CHANNEL);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| TransportError::Start(e.to_string()))?;

        let listen_multiaddr = host_port_to_multiaddr(listen_addr)
            .ok_or_else(|| TransportError::Start(format!("invalid listen_addr {listen_addr:?}")))?;
        swarm
            .listen_on(listen_multiaddr)
            .map_err(|e| TransportError::Start(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let gossiper: Arc<Mutex<Option<Arc<dyn Gossiper>>>> = Arc::new(Mutex::new(None));

        tokio::spawn(run_swarm(swarm, cmd_rx, gossiper.clone(), metrics.clone(), topic));

        Ok(Self {
            cmd_tx,
            local_peer_id,
            gossiper,
            metrics,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }
}

struct LibP2pBroadcaster {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl GossipBroadcaster for LibP2pBroadcaster {
    fn gossip_broadcast(&self, data: Vec<u8>) {
        let _ = self.cmd_tx.send(Command::Publish(data));
    }
}

impl MeshTransport for LibP2pTransport {
    fn register(
        &self,
        channel: &str,
        gossiper: Arc<dyn Gossiper>,
    ) -> Result<Arc<dyn GossipBroadcaster>, TransportError> {
        if channel != CHANNEL {
            return Err(TransportError::AlreadyRegistered(channel.to_string()));
        }
        let mut guard = self.gossiper.lock().unwrap();
        if guard.is_some() {
            return Err(TransportError::AlreadyRegistered(channel.to_string()));
        }
        *guard = Some(gossiper);
        Ok(Arc::new(LibP2pBroadcaster {
            cmd_tx: self.cmd_tx.clone(),
        }))
    }

    fn start(&self) -> Result<(), TransportError> {
        // The swarm task is already running (spawned in `new`); nothing
        // further to do here. Kept as an explicit lifecycle step so the
        // `MeshTransport` contract stays uniform across implementations.
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::Shutdown)
            .map_err(|e| TransportError::Stop(e.to_string()))
    }

    fn connect(&self, addrs: &[String]) {
        for addr in addrs {
            match host_port_to_multiaddr(addr) {
                Some(maddr) => {
                    let _ = self.cmd_tx.send(Command::Dial(maddr));
                }
                None => warn!(addr, "skipping unparseable seed peer address"),
            }
        }
    }
}

fn host_port_to_multiaddr(addr: &str) -> Option<Multiaddr> {
    let (host, port_str) = addr.rsplit_once(':')?;
    let port: u16 = port_str.parse().ok()?;
    let mut maddr = Multiaddr::empty();
    if let Ok(ip) = host.parse::<std::net::Ipv4Addr>() {
        maddr.push(Protocol::Ip4(ip));
    } else if let Ok(ip) = host.parse::<std::net::Ipv6Addr>() {
        maddr.push(Protocol::Ip6(ip));
    } else {
        maddr.push(Protocol::Dns(host.into()));
    }
    maddr.push(Protocol::Tcp(port));
    Some(maddr)
}

async fn run_swarm(
    mut swarm: libp2p::Swarm<BcacheBehaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    gossiper: Arc<Mutex<Option<Arc<dyn Gossiper>>>>,
    metrics: SharedMetrics,
    topic: gossipsub::IdentTopic,
) {
    let mut pull_interval = tokio::time::interval(Duration::from_secs(5));
    let mut known_peers: HashSet<PeerId> = HashSet::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Publish(data)) => {
                        if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                            warn!(%e, "gossipsub publish failed");
                        }
                    }
                    Some(Command::Dial(maddr)) => {
                        if let Err(e) = swarm.dial(maddr.clone()) {
                            warn!(%maddr, %e, "dial failed");
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
            _ = pull_interval.tick() => {
                // Periodic anti-entropy: ask every known peer for a full
                // state snapshot via unicast request-response, independent
                // of whatever gossipsub broadcasts are in flight.
                let guard = gossiper.lock().unwrap();
                if let Some(g) = guard.as_ref() {
                    if let Ok(buf) = g.gossip().encode() {
                        for peer in known_peers.iter() {
                            swarm.behaviour_mut().state_transfer.send_request(peer, buf.clone());
                        }
                    }
                }
            }
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(%address, "mesh transport listening");
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        known_peers.insert(peer_id);
                        metrics.connected_peers.set(known_peers.len() as i64);
                        debug!(%peer_id, "mesh peer connected");
                    }
                    SwarmEvent::ConnectionClosed { peer_id, .. } => {
                        known_peers.remove(&peer_id);
                        metrics.connected_peers.set(known_peers.len() as i64);
                        debug!(%peer_id, "mesh peer disconnected");
                    }
                    SwarmEvent::Behaviour(BcacheBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                        propagation_source,
                        message,
                        ..
                    })) => {
                        let guard = gossiper.lock().unwrap();
                        if let Some(g) = guard.as_ref() {
                            let src = bcache::Message::decode(&message.data)
                                .map(|m| m.peer_id)
                                .unwrap_or(0);
                            match g.on_gossip_broadcast(src, &message.data) {
                                Ok(delta) if !delta.is_empty() => {
                                    metrics.gossip_merges_applied_total.inc();
                                }
                                Ok(_) => {}
                                Err(e) => warn!(%e, %propagation_source, "failed to decode gossipsub message"),
                            }
                        }
                    }
                    SwarmEvent::Behaviour(BcacheBehaviourEvent::StateTransfer(
                        request_response::Event::Message { peer, message, .. },
                    )) => match message {
                        // A peer pushed its state to us and wants ours back:
                        // merge what it sent, then reply with our own
                        // snapshot so the exchange is a full push-pull round.
                        request_response::Message::Request { request, channel, .. } => {
                            let guard = gossiper.lock().unwrap();
                            if let Some(g) = guard.as_ref() {
                                if let Err(e) = g.on_gossip_unicast(0, &request) {
                                    warn!(%e, %peer, "failed to decode unicast state transfer");
                                } else {
                                    metrics.gossip_merges_applied_total.inc();
                                }
                                let response = g.gossip().encode().unwrap_or_default();
                                if swarm
                                    .behaviour_mut()
                                    .state_transfer
                                    .send_response(channel, response)
                                    .is_err()
                                {
                                    warn!(%peer, "state transfer peer disconnected before response");
                                }
                            }
                        }
                        request_response::Message::Response { response, .. } => {
                            let guard = gossiper.lock().unwrap();
                            if let Some(g) = guard.as_ref() {
                                if let Err(e) = g.on_gossip_unicast(0, &response) {
                                    warn!(%e, %peer, "failed to decode pulled state");
                                } else {
                                    metrics.gossip_merges_applied_total.inc();
                                }
                            }
                        }
                    },
                    SwarmEvent::Behaviour(BcacheBehaviourEvent::Identify(identify::Event::Received {
                        peer_id,
                        ..
                    })) => {
                        debug!(%peer_id, "identified mesh peer");
                    }
                    _ => {}
                }
            }
        }
    }
    debug!("mesh transport event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parses_ipv4() {
        let maddr = host_port_to_multiaddr("127.0.0.1:7946").unwrap();
        assert!(maddr.to_string().contains("127.0.0.1"));
        assert!(maddr.to_string().contains("7946"));
    }

    #[test]
    fn host_port_parses_dns_name() {
        let maddr = host_port_to_multiaddr("seed.example.com:7946").unwrap();
        assert!(maddr.to_string().contains("seed.example.com"));
    }

    #[test]
    fn host_port_rejects_missing_port() {
        assert!(host_port_to_multiaddr("127.0.0.1").is_none());
    }
}
