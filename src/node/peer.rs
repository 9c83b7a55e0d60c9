// Peer Subsystem: connection lifecycle (dial/accept, heartbeat, eviction)
// and gossip (operation/block propagation with loop suppression via a
// `blocks_published`-style dedup set), grounded on the teacher's
// `net::node::P2PNode` — the accept-loop-plus-broadcast-channel shape is
// kept, but the handshake is a single `Hello` frame instead of the
// teacher's four-stage challenge/response, and message bodies are the
// crate's own `PeerMessage` JSON frames instead of a bespoke binary wire
// format.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config;
use crate::consensus::store::InsertOutcome;
use crate::consensus::validator;
use crate::consensus::Chain;
use crate::net::protocol::{self, PeerMessage};
use crate::node::registry_client;
use crate::primitives::block::Block;
use crate::primitives::operation::Operation;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error("peer did not send the expected message")]
    UnexpectedMessage,
}

/// Shared state every connection handler and the connection-manager task
/// reach into. Owns nothing that outlives the node itself.
pub struct PeerSubsystem {
    pub chain: Arc<Mutex<Chain>>,
    pub self_pubkey: String,
    pub self_peer_addr: String,
    pub registry_addr: String,
    pub ops_to_miner: mpsc::UnboundedSender<Operation>,
    gossip_tx: broadcast::Sender<PeerMessage>,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
    /// Bounded FIFO of recently-relayed block hashes — `blocks_published` in
    /// §4.5, the sole loop-suppression mechanism for block gossip.
    seen_blocks: Mutex<(HashSet<String>, VecDeque<String>)>,
}

struct PeerHandle {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    last_heartbeat: Mutex<Instant>,
}

impl PeerSubsystem {
    pub fn new(
        chain: Arc<Mutex<Chain>>,
        self_pubkey: String,
        self_peer_addr: String,
        registry_addr: String,
        ops_to_miner: mpsc::UnboundedSender<Operation>,
    ) -> Arc<Self> {
        let (gossip_tx, _) = broadcast::channel(1024);
        Arc::new(PeerSubsystem {
            chain,
            self_pubkey,
            self_peer_addr,
            registry_addr,
            ops_to_miner,
            gossip_tx,
            peers: Mutex::new(HashMap::new()),
            seen_blocks: Mutex::new((HashSet::new(), VecDeque::new())),
        })
    }

    /// Feeds a freshly client-submitted operation to the local PoW engine
    /// and gossips it out at full TTL, so other miners' clients' shapes and
    /// this node's own both flow through the same single path into a block.
    pub fn submit_local_operation(&self, op: Operation) {
        let _ = self.ops_to_miner.send(op.clone());
        let _ = self.gossip_tx.send(PeerMessage::GossipOp { op, ttl: config::GOSSIP_TTL });
    }

    /// Feeds a block this node mined itself into the gossip pipeline. A
    /// solution is inserted into the chain before this is ever called (see
    /// miner::coordinator), so this call only needs to mark it seen and
    /// relay it — never re-validate or re-insert.
    pub async fn announce_own_block(&self, block: Block) {
        let hash = block.hash();
        {
            let mut seen = self.seen_blocks.lock().await;
            mark_seen(&mut seen, hash);
        }
        let _ = self.gossip_tx.send(PeerMessage::GossipBlock { block, ttl: config::GOSSIP_TTL });
    }

    pub async fn listen(self: &Arc<Self>, bind_addr: &str) -> Result<SocketAddr, PeerError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            if let Err(e) = this.handle_inbound(stream, addr).await {
                                eprintln!("[p2p] {addr} disconnected: {e}");
                            }
                        });
                    }
                    Err(e) => eprintln!("[p2p] accept failed: {e}"),
                }
            }
        });
        Ok(local_addr)
    }

    async fn handle_inbound(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<(), PeerError> {
        let (mut read, write) = stream.into_split();
        let write = Arc::new(Mutex::new(write));
        write_to(&write, &PeerMessage::Hello { pubkey: self.self_pubkey.clone() }).await?;
        self.run_connection(&mut read, write, addr).await
    }

    /// Dials `addr`, exchanges `Hello`, pulls the remote's full chain once,
    /// then hands the connection to the same generic message loop inbound
    /// connections use.
    pub async fn dial(self: &Arc<Self>, addr: SocketAddr) -> Result<(), PeerError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read, write) = stream.into_split();
        let write = Arc::new(Mutex::new(write));
        write_to(&write, &PeerMessage::Hello { pubkey: self.self_pubkey.clone() }).await?;
        write_to(&write, &PeerMessage::GetChain).await?;

        match protocol::read_message(&mut read).await? {
            PeerMessage::Chain { blocks } => self.absorb_remote_chain(blocks).await,
            PeerMessage::Hello { .. } => {
                // Some peers answer the handshake before the chain reply;
                // read one more frame for the chain itself.
                if let PeerMessage::Chain { blocks } = protocol::read_message(&mut read).await? {
                    self.absorb_remote_chain(blocks).await;
                }
            }
            _ => return Err(PeerError::UnexpectedMessage),
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut read = read;
            if let Err(e) = this.run_connection(&mut read, write, addr).await {
                eprintln!("[p2p] {addr} disconnected: {e}");
            }
        });
        Ok(())
    }

    async fn absorb_remote_chain(&self, blocks: Vec<Block>) {
        let mut chain = self.chain.lock().await;
        for block in blocks {
            let _ = chain.validate_and_insert(block);
        }
    }

    async fn run_connection(
        self: &Arc<Self>,
        read: &mut tokio::net::tcp::OwnedReadHalf,
        write: Arc<Mutex<OwnedWriteHalf>>,
        addr: SocketAddr,
    ) -> Result<(), PeerError> {
        self.peers.lock().await.insert(
            addr,
            PeerHandle { writer: write.clone(), last_heartbeat: Mutex::new(Instant::now()) },
        );
        let mut relay_rx = self.gossip_tx.subscribe();

        loop {
            tokio::select! {
                msg = protocol::read_message(read) => {
                    match msg {
                        Ok(m) => self.handle_message(m, &write, addr).await,
                        Err(_) => break,
                    }
                }
                relayed = relay_rx.recv() => {
                    if let Ok(m) = relayed {
                        let _ = write_to(&write, &m).await;
                    }
                }
            }
        }

        self.peers.lock().await.remove(&addr);
        Ok(())
    }

    async fn handle_message(self: &Arc<Self>, msg: PeerMessage, write: &Arc<Mutex<OwnedWriteHalf>>, addr: SocketAddr) {
        match msg {
            PeerMessage::Hello { .. } => {}
            PeerMessage::Ping => {
                let _ = write_to(write, &PeerMessage::Pong).await;
            }
            PeerMessage::Pong => {
                if let Some(peer) = self.peers.lock().await.get(&addr) {
                    *peer.last_heartbeat.lock().await = Instant::now();
                }
            }
            PeerMessage::GetChain => {
                let blocks = self.chain.lock().await.canonical_chain_no_genesis();
                let _ = write_to(write, &PeerMessage::Chain { blocks }).await;
            }
            PeerMessage::Chain { blocks } => self.absorb_remote_chain(blocks).await,
            PeerMessage::GossipOp { op, ttl } => self.handle_gossip_op(op, ttl).await,
            PeerMessage::GossipBlock { block, ttl } => self.handle_gossip_block(block, ttl).await,
        }
    }

    /// Validates a gossiped op against the canonical chain; invalid ops are
    /// dropped silently (§4.5). Valid ones feed the local PoW engine and,
    /// if `ttl` allows, are relayed onward.
    async fn handle_gossip_op(&self, op: Operation, ttl: u32) {
        let ok = {
            let chain = self.chain.lock().await;
            let mut state = chain.fold_canonical();
            let mining = chain.mining().clone();
            validator::apply_operation(&mut state, &op, &mining).is_ok()
        };
        if !ok {
            return;
        }
        let _ = self.ops_to_miner.send(op.clone());
        if ttl > 1 {
            let _ = self.gossip_tx.send(PeerMessage::GossipOp { op, ttl: ttl - 1 });
        }
    }

    /// Dedups on hash (the `blocks_published` set), validates+inserts on
    /// first sight, relays onward if `ttl` allows.
    async fn handle_gossip_block(&self, block: Block, ttl: u32) {
        let hash = block.hash();
        {
            let mut seen = self.seen_blocks.lock().await;
            if seen.0.contains(&hash) {
                return;
            }
            mark_seen(&mut seen, hash.clone());
        }

        let outcome = self.chain.lock().await.validate_and_insert(block.clone());
        match outcome {
            Ok(InsertOutcome::Inserted(_)) | Ok(InsertOutcome::AlreadyPresent) => {
                if ttl > 1 {
                    let _ = self.gossip_tx.send(PeerMessage::GossipBlock { block, ttl: ttl - 1 });
                }
            }
            Ok(InsertOutcome::Orphaned) => {
                // Parent hasn't arrived; a GetChain pull (next discovery
                // tick, or the peer that sent us this one) will catch it up.
            }
            Err(e) => eprintln!("[p2p] rejected gossiped block {hash}: {e}"),
        }
    }

    /// Connection-manager task: registry heartbeat, peer discovery below
    /// `MinPeerCount`, and eviction of peers stale for more than one full
    /// heartbeat interval. Runs for the node's lifetime.
    pub async fn run_connection_manager(self: Arc<Self>, min_peer_count: u32) {
        let tick = Duration::from_secs(config::HEARTBEAT_INTERVAL_SECS);
        loop {
            tokio::time::sleep(tick).await;

            if let Err(e) = registry_client::heartbeat(&self.registry_addr, &self.self_pubkey).await {
                eprintln!("[p2p] registry heartbeat failed: {e}");
            }

            let _ = self.gossip_tx.send(PeerMessage::Ping);
            self.evict_stale(tick * 2).await;

            let current = self.peers.lock().await.len() as u32;
            if current < min_peer_count {
                self.discover_and_dial().await;
            }
        }
    }

    async fn evict_stale(&self, max_age: Duration) {
        let mut stale = Vec::new();
        {
            let peers = self.peers.lock().await;
            for (addr, handle) in peers.iter() {
                if handle.last_heartbeat.lock().await.elapsed() > max_age {
                    stale.push(*addr);
                }
            }
        }
        if !stale.is_empty() {
            let mut peers = self.peers.lock().await;
            for addr in stale {
                eprintln!("[p2p] evicting stale peer {addr}");
                peers.remove(&addr);
            }
        }
    }

    async fn discover_and_dial(self: &Arc<Self>) {
        let addrs = match registry_client::get_nodes(&self.registry_addr, &self.self_pubkey).await {
            Ok(a) => a,
            Err(e) => {
                eprintln!("[p2p] discovery failed: {e}");
                return;
            }
        };
        let known: HashSet<SocketAddr> = self.peers.lock().await.keys().copied().collect();
        let mut dialed = 0;
        for candidate in addrs {
            if dialed >= config::MAX_PEERS_DIAL_BATCH {
                break;
            }
            if candidate == self.self_peer_addr {
                continue;
            }
            let Ok(addr) = candidate.parse::<SocketAddr>() else { continue };
            if known.contains(&addr) {
                continue;
            }
            if let Err(e) = self.dial(addr).await {
                eprintln!("[p2p] dial {addr} failed: {e}");
            } else {
                dialed += 1;
            }
        }
    }
}

fn mark_seen(seen: &mut (HashSet<String>, VecDeque<String>), hash: String) {
    seen.0.insert(hash.clone());
    seen.1.push_back(hash);
    while seen.1.len() > config::DEDUP_WINDOW {
        if let Some(oldest) = seen.1.pop_front() {
            seen.0.remove(&oldest);
        }
    }
}

async fn write_to(write: &Arc<Mutex<OwnedWriteHalf>>, msg: &PeerMessage) -> Result<(), PeerError> {
    let mut guard = write.lock().await;
    protocol::write_message(&mut *guard, msg).await?;
    Ok(())
}
