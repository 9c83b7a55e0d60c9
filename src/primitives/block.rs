// Data Structures: Block
//
// A block is a previous-block hash, an ordered list of operations, the
// miner's pubkey, and a nonce. Its hash is the MD5 hex of the block's
// canonical JSON encoding (field order `prev_hash, op_history, miner_pubkey,
// nonce`) — the single hash path this spec mandates, where the source had
// two competing ones. `mining_prefix`/`mining_input` build that same JSON
// byte-for-byte but split around `nonce` so the PoW search (miner::engine)
// doesn't re-serialize `op_history` on every attempt.
// The genesis block is the one exception: its hash is a fixed value agreed
// with the registry rather than anything computed from its (empty) fields.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::hash_md5_hex;
use crate::primitives::operation::Operation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub prev_hash: String,
    pub op_history: Vec<Operation>,
    pub miner_pubkey: String,
    pub nonce: u64,
    #[serde(skip)]
    genesis_hash_override: Option<String>,
}

impl Block {
    pub fn new(prev_hash: String, op_history: Vec<Operation>, miner_pubkey: String, nonce: u64) -> Self {
        Block { prev_hash, op_history, miner_pubkey, nonce, genesis_hash_override: None }
    }

    /// The genesis block: no parent, no operations, identified by a hash
    /// handed out by the registry rather than mined.
    pub fn genesis(genesis_hash: String) -> Self {
        Block {
            prev_hash: String::new(),
            op_history: Vec::new(),
            miner_pubkey: String::new(),
            nonce: 0,
            genesis_hash_override: Some(genesis_hash),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.genesis_hash_override.is_some()
    }

    /// The JSON bytes up to (and including) `"nonce":` — everything a nonce
    /// search holds fixed across attempts, built to match what
    /// `serde_json::to_vec` would produce for the whole struct so that
    /// `hash()` and an independently-deserialized peer's re-serialization
    /// always agree.
    pub fn mining_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"{\"prev_hash\":");
        buf.extend_from_slice(&serde_json::to_vec(&self.prev_hash).expect("string always serializes"));
        buf.extend_from_slice(b",\"op_history\":");
        buf.extend_from_slice(&serde_json::to_vec(&self.op_history).expect("operations always serialize"));
        buf.extend_from_slice(b",\"miner_pubkey\":");
        buf.extend_from_slice(&serde_json::to_vec(&self.miner_pubkey).expect("string always serializes"));
        buf.extend_from_slice(b",\"nonce\":");
        buf
    }

    /// The full mining input for a specific nonce: `mining_prefix() || nonce || "}"`.
    pub fn mining_input(prefix: &[u8], nonce: u64) -> Vec<u8> {
        let mut buf = prefix.to_vec();
        buf.extend_from_slice(nonce.to_string().as_bytes());
        buf.push(b'}');
        buf
    }

    pub fn hash(&self) -> String {
        if let Some(h) = &self.genesis_hash_override {
            return h.clone();
        }
        hash_md5_hex(&Self::mining_input(&self.mining_prefix(), self.nonce))
    }
}
