//! Orchestration: wires the consensus chain, the peer subsystem, the mining
//! coordinator, and the client API together into one running node. Mirrors
//! the shape of the teacher's top-level miner binary, which builds its
//! database, its RPC server, and its P2P listener in one place and then
//! hands off to `tokio::select!`/`join!` over their long-lived tasks.

pub mod client_api;
pub mod peer;
pub mod registry_client;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::NodeConfig;
use crate::consensus::Chain;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::miner::coordinator::MiningCoordinator;
use crate::node::client_api::ClientApiState;
use crate::node::peer::PeerSubsystem;
use crate::node::registry_client::MinerInfo;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("registry error: {0}")]
    Registry(#[from] registry_client::RegistryError),
    #[error("peer subsystem error: {0}")]
    Peer(#[from] peer::PeerError),
    #[error("client API server error: {0}")]
    ClientApi(Box<dyn std::error::Error + Send + Sync>),
    #[error("invalid key configured for this node: {0}")]
    Key(#[from] crate::crypto::keys::KeyError),
    #[error("configured privkey_hex does not correspond to pubkey_hex")]
    KeyMismatch,
}

/// Brings up one full node: registers with the registry to learn the
/// network-wide parameters and genesis hash, starts the peer listener and
/// client API server, then runs the peer connection manager and mining
/// coordinator for as long as the process lives.
pub async fn run(cfg: NodeConfig) -> Result<(), NodeError> {
    // Catch a malformed or mismatched CLI argument before it ever reaches
    // the network: the declared pubkey must actually be the one the
    // declared privkey derives.
    let pubkey = PublicKey::from_hex(&cfg.pubkey_hex)?;
    let privkey = PrivateKey::from_hex(&cfg.privkey_hex)?;
    if privkey.public_key() != pubkey {
        return Err(NodeError::KeyMismatch);
    }

    println!("[node] registering with registry at {}", cfg.registry_addr);
    let net_settings = registry_client::register(
        &cfg.registry_addr,
        &MinerInfo { address: cfg.peer_bind.clone(), pubkey: cfg.pubkey_hex.clone() },
    )
    .await?;
    println!(
        "[node] registered: genesis={} min_peers={} difficulty(op/noop)={}/{}",
        net_settings.genesis_hash, net_settings.min_peer_count, net_settings.difficulty_op, net_settings.difficulty_noop
    );

    let mining = crate::config::MiningSettings {
        pow_difficulty_no_op_block: net_settings.difficulty_noop,
        pow_difficulty_op_block: net_settings.difficulty_op,
        ink_per_no_op_block: net_settings.ink_per_noop_block,
        ink_per_op_block: net_settings.ink_per_op_block,
        ..cfg.mining
    };
    let chain = Arc::new(Mutex::new(Chain::new(
        net_settings.genesis_hash,
        mining,
        net_settings.canvas_xmax,
        net_settings.canvas_ymax,
    )));

    let (ops_tx, ops_rx) = mpsc::unbounded_channel();
    let (solved_tx, mut solved_rx) = mpsc::unbounded_channel();

    let peers = PeerSubsystem::new(
        chain.clone(),
        cfg.pubkey_hex.clone(),
        cfg.peer_bind.clone(),
        cfg.registry_addr.clone(),
        ops_tx,
    );
    let peer_addr = peers.listen(&cfg.peer_bind).await?;
    println!("[node] peer listener bound to {peer_addr}");

    tokio::spawn(peers.clone().run_connection_manager(net_settings.min_peer_count));

    // Relays the coordinator's own solutions into the gossip pipeline —
    // kept as a separate task rather than handed straight to the coordinator
    // so the mining loop never blocks on peer I/O.
    let announce_peers = peers.clone();
    tokio::spawn(async move {
        while let Some(block) = solved_rx.recv().await {
            announce_peers.announce_own_block(block).await;
        }
    });

    let coordinator = MiningCoordinator::new(chain.clone(), cfg.pubkey_hex.clone(), ops_rx, solved_tx);
    tokio::spawn(coordinator.run());

    let client_state = ClientApiState::new(chain.clone(), peers.clone());
    let rpc_addr = client_api::start_client_api_server(&cfg.rpc_bind, client_state)
        .await
        .map_err(NodeError::ClientApi)?;
    println!("[node] client API listening on {rpc_addr}");

    // Everything of consequence runs in the tasks spawned above; park here
    // for the life of the process.
    std::future::pending::<()>().await;
    Ok(())
}
