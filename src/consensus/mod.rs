//! Consensus: the block store, the canvas-state validator, and the `Chain`
//! facade that aggregates them behind a single PoW-gated insertion API.
//!
//! `BlockStore` alone doesn't know about mining difficulty or canvas
//! dimensions — it's a plain tree of blocks. `Chain` is where those
//! consensus parameters meet the tree: it rejects a block whose PoW or
//! operations don't check out against the parent it claims, and exposes the
//! canonical (longest, tie-broken) view the rest of the node reasons about.

pub mod genesis;
pub mod store;
pub mod validator;

use crate::config::MiningSettings;
use crate::primitives::block::Block;
use store::{BlockStore, InsertOutcome};
use validator::{validate_block, ValidatorError};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("block rejected: {0}")]
    Invalid(#[from] ValidatorError),
}

/// Owns the block tree plus the consensus parameters needed to validate
/// incoming blocks against it. One `Chain` per node; shared behind a mutex
/// by everything that needs to read or extend it (see node::Node).
pub struct Chain {
    store: BlockStore,
    mining: MiningSettings,
    x_max: u32,
    y_max: u32,
}

impl Chain {
    pub fn new(genesis_hash: String, mining: MiningSettings, x_max: u32, y_max: u32) -> Self {
        Chain { store: BlockStore::new(genesis::make_genesis(genesis_hash)), mining, x_max, y_max }
    }

    pub fn genesis_hash(&self) -> &str {
        self.store.genesis_hash()
    }

    pub fn mining(&self) -> &MiningSettings {
        &self.mining
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.store.contains(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.store.get(hash).map(|node| &node.block)
    }

    pub fn children(&self, hash: &str) -> Vec<Block> {
        self.store.children_of(hash).into_iter().cloned().collect()
    }

    pub fn longest_chain_tip(&self) -> String {
        self.store.longest_chain_tip().to_string()
    }

    /// Root-to-tip path (genesis included) ending at `hash`.
    pub fn path_to(&self, hash: &str) -> Option<Vec<Block>> {
        self.store.path_to(hash).map(|blocks| blocks.into_iter().cloned().collect())
    }

    /// The canonical chain as of right now: root-to-tip path ending at the
    /// current longest-chain tip.
    pub fn canonical_path(&self) -> Vec<Block> {
        let tip = self.store.longest_chain_tip().to_string();
        self.path_to(&tip).unwrap_or_default()
    }

    /// Every block on the canonical chain, genesis excluded — the payload
    /// peers exchange via `GetBlockChain`/`Connect`.
    pub fn canonical_chain_no_genesis(&self) -> Vec<Block> {
        let mut path = self.canonical_path();
        if !path.is_empty() {
            path.remove(0);
        }
        path
    }

    pub fn confirmations(&self, hash: &str) -> Option<u32> {
        self.store.confirmations(hash)
    }

    pub fn notify(&self) -> std::sync::Arc<tokio::sync::Notify> {
        self.store.notify.clone()
    }

    /// Validates `block` against the chain ending at its claimed parent and,
    /// on success, attaches it and adopts any blocks that were waiting on it
    /// as their parent. If the parent itself hasn't arrived yet, `block` is
    /// parked as an orphan rather than rejected; it gets validated the
    /// instant that parent is attached, not deferred to chain selection.
    pub fn validate_and_insert(&mut self, block: Block) -> Result<InsertOutcome, ChainError> {
        let hash = block.hash();
        if self.store.contains(&hash) {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let Some(parent_path) = self.store.path_to(&block.prev_hash) else {
            self.store.park_orphan(block);
            return Ok(InsertOutcome::Orphaned);
        };

        validate_block(&block, &parent_path, &self.mining, self.x_max, self.y_max)?;
        let idx = self.store.attach_validated(block);
        self.adopt_ready_orphans(&hash);
        Ok(InsertOutcome::Inserted(idx))
    }

    /// Recursively re-attempts every block parked under `hash` now that it
    /// just arrived. Each one is independently validated against its own
    /// parent path; one invalid descendant in an orphaned subtree doesn't
    /// poison its valid siblings, and doesn't stop unrelated siblings
    /// further down from being tried.
    fn adopt_ready_orphans(&mut self, hash: &str) {
        for orphan in self.store.take_orphans(hash) {
            if let Err(e) = self.validate_and_insert(orphan.clone()) {
                eprintln!("[consensus] dropping orphan {} once its parent arrived: {e}", orphan.hash());
            }
        }
    }

    /// Computes the ink balance and pixel ownership of the canonical chain
    /// as seen right now, for `GetInk`/`AddShape` validation ahead of
    /// publishing.
    pub fn fold_canonical(&self) -> validator::CanvasState {
        let path = self.canonical_path();
        let refs: Vec<&Block> = path.iter().collect();
        validator::fold_chain(&refs, &self.mining, self.x_max, self.y_max)
    }

    pub fn canvas_dims(&self) -> (u32, u32) {
        (self.x_max, self.y_max)
    }

    /// Canvas state as of a specific block, wherever it sits in the tree —
    /// used by `GetShapes`/`GetSvgString`, which are keyed by block hash
    /// rather than implicitly by "the current tip".
    pub fn fold_at(&self, hash: &str) -> Option<validator::CanvasState> {
        let path = self.path_to(hash)?;
        let refs: Vec<&Block> = path.iter().collect();
        Some(validator::fold_chain(&refs, &self.mining, self.x_max, self.y_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MiningSettings;
    use crate::primitives::block::Block;

    fn mining() -> MiningSettings {
        MiningSettings { pow_difficulty_no_op_block: 0, pow_difficulty_op_block: 0, ..MiningSettings::default() }
    }

    #[test]
    fn test_validate_and_insert_parks_unknown_parent_as_orphan() {
        let mut chain = Chain::new("g".to_string(), mining(), 100, 100);
        let orphan = Block::new("nonexistent".to_string(), vec![], "miner".to_string(), 0);
        let orphan_hash = orphan.hash();
        assert_eq!(chain.validate_and_insert(orphan).unwrap(), InsertOutcome::Orphaned);
        assert!(!chain.contains(&orphan_hash));
    }

    #[test]
    fn test_orphan_is_adopted_and_validated_once_its_parent_arrives() {
        let mut chain = Chain::new("g".to_string(), mining(), 100, 100);
        let genesis_hash = chain.genesis_hash().to_string();

        let parent = Block::new(genesis_hash, vec![], "miner".to_string(), 1);
        let parent_hash = parent.hash();
        let child = Block::new(parent_hash.clone(), vec![], "miner".to_string(), 1);
        let child_hash = child.hash();

        // Child arrives before its parent: parked, not rejected.
        assert_eq!(chain.validate_and_insert(child).unwrap(), InsertOutcome::Orphaned);
        assert!(!chain.contains(&child_hash));

        // Parent arrives: both blocks end up in the store, and the child
        // becomes the new canonical tip.
        chain.validate_and_insert(parent).unwrap();
        assert!(chain.contains(&parent_hash));
        assert!(chain.contains(&child_hash));
        assert_eq!(chain.longest_chain_tip(), child_hash);
    }

    #[test]
    fn test_invalid_orphan_is_dropped_without_poisoning_its_parent() {
        let mut chain = Chain::new("g".to_string(), mining(), 100, 100);
        let genesis_hash = chain.genesis_hash().to_string();

        let parent = Block::new(genesis_hash, vec![], "miner".to_string(), 1);
        let parent_hash = parent.hash();
        // A "child" that claims to be mined by nobody but carries an
        // operation with a bad signature — invalid once folded, even though
        // its PoW (difficulty 0 in this test) trivially passes.
        let bad_op = crate::primitives::operation::Operation {
            op_type: crate::primitives::operation::OpType::Delete,
            svg: String::new(),
            fill: String::new(),
            stroke: String::new(),
            target_hash: "deadbeef".to_string(),
            owner_pubkey: "not-a-real-hex-pubkey".to_string(),
            validate_num: 1,
            op_num: 1,
            sig_r: "00".to_string(),
            sig_s: "00".to_string(),
        };
        let child = Block::new(parent_hash.clone(), vec![bad_op], "miner".to_string(), 1);
        let child_hash = child.hash();

        assert_eq!(chain.validate_and_insert(child).unwrap(), InsertOutcome::Orphaned);
        chain.validate_and_insert(parent).unwrap();

        assert!(chain.contains(&parent_hash));
        assert!(!chain.contains(&child_hash));
        assert_eq!(chain.longest_chain_tip(), parent_hash);
    }

    #[test]
    fn test_validate_and_insert_accepts_valid_child_of_genesis() {
        let mut chain = Chain::new("g".to_string(), mining(), 100, 100);
        let genesis_hash = chain.genesis_hash().to_string();
        let child = Block::new(genesis_hash, vec![], "miner".to_string(), 0);
        let child_hash = child.hash();
        chain.validate_and_insert(child).unwrap();
        assert_eq!(chain.longest_chain_tip(), child_hash);
    }
}
