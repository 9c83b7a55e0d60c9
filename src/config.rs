// Network-wide and per-node configuration. Canvas dimensions, ink reward
// schedule, and PoW difficulties are properties of the network as a whole —
// every miner must agree on them, so they default to the registry's values
// and can only be overridden for local development/testing. Bind addresses
// and the registry address are purely local and are meant to be overridden.

pub const DEFAULT_PEER_BIND: &str = "0.0.0.0:9100";
pub const DEFAULT_RPC_BIND: &str = "127.0.0.1:9101";
pub const DEFAULT_REGISTRY_BIND: &str = "127.0.0.1:9000";

/// How often a node re-registers with the registry and refreshes its peer list.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 2;

/// Maximum hop count a gossiped op/block is relayed before being dropped.
pub const GOSSIP_TTL: u32 = 10;

/// Number of most-recently-published hashes a node remembers, to suppress
/// re-broadcasting something it has already seen.
pub const DEDUP_WINDOW: usize = 2048;

/// Upper bound on concurrent PoW searcher threads per mining round. Falls
/// back to a fixed value when the host doesn't report its core count.
pub fn max_workers() -> usize {
    std::env::var("INKMINER_MAX_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
}

/// How many newly-discovered addresses the connection manager dials per tick
/// when under `MinPeerCount` — caps the burst of outbound connection attempts
/// after a registry `GetNodes` call returns a large address list.
pub const MAX_PEERS_DIAL_BATCH: usize = 4;

#[derive(Debug, Clone)]
pub struct CanvasSettings {
    pub x_max: u32,
    pub y_max: u32,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        CanvasSettings { x_max: 1024, y_max: 1024 }
    }
}

#[derive(Debug, Clone)]
pub struct MiningSettings {
    /// Trailing hex zero-count a block's hash must have, exactly (see
    /// miner::engine — this is an "exactly N", not "at least N", difficulty).
    pub pow_difficulty_no_op_block: u32,
    pub pow_difficulty_op_block: u32,
    pub ink_per_no_op_block: u64,
    pub ink_per_op_block: u64,
    /// Confirmations (descendant blocks) required before an operation is final.
    pub default_validate_num: u32,
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            pow_difficulty_no_op_block: 4,
            pow_difficulty_op_block: 5,
            ink_per_no_op_block: 1,
            ink_per_op_block: 3,
            default_validate_num: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub peer_bind: String,
    pub rpc_bind: String,
    pub registry_addr: String,
    pub pubkey_hex: String,
    pub privkey_hex: String,
    pub canvas: CanvasSettings,
    pub mining: MiningSettings,
}

impl NodeConfig {
    /// Builds config from required positional CLI args plus env var overrides
    /// for the two bind addresses (`INKMINER_PEER_BIND`, `INKMINER_RPC_BIND`).
    pub fn from_args(registry_addr: String, pubkey_hex: String, privkey_hex: String) -> Self {
        NodeConfig {
            peer_bind: std::env::var("INKMINER_PEER_BIND").unwrap_or_else(|_| DEFAULT_PEER_BIND.to_string()),
            rpc_bind: std::env::var("INKMINER_RPC_BIND").unwrap_or_else(|_| DEFAULT_RPC_BIND.to_string()),
            registry_addr,
            pubkey_hex,
            privkey_hex,
            canvas: CanvasSettings::default(),
            mining: MiningSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_used_without_env_override() {
        std::env::remove_var("INKMINER_PEER_BIND");
        std::env::remove_var("INKMINER_RPC_BIND");
        let cfg = NodeConfig::from_args("127.0.0.1:8080".to_string(), "pk".to_string(), "sk".to_string());
        assert_eq!(cfg.peer_bind, DEFAULT_PEER_BIND);
        assert_eq!(cfg.rpc_bind, DEFAULT_RPC_BIND);
    }
}
