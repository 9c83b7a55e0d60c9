// Block Store: an arena of blocks plus the indices that make it a tree.
//
// Blocks are appended to a `Vec` and referenced by index everywhere inside
// the store — no `Rc<RefCell<_>>` graph of parent/child pointers, which
// would need unsafe or weak references to avoid cycles. A block whose parent
// hasn't arrived yet waits in `orphans_by_parent` until that parent is
// inserted, at which point it (and anything orphaned on top of it) is
// spliced in recursively.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::primitives::block::Block;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub block: Block,
    pub hash: String,
    pub parent_idx: Option<usize>,
    pub children: Vec<usize>,
    pub depth: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Block was attached to the tree at this index, possibly pulling
    /// previously-orphaned descendants in with it.
    Inserted(usize),
    /// Block's parent hasn't arrived yet; held until it does.
    Orphaned,
    /// Already in the store — insertion is idempotent on hash, so this is a
    /// no-op rather than an error.
    AlreadyPresent,
}

pub struct BlockStore {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<String, usize>,
    orphans_by_parent: HashMap<String, Vec<Block>>,
    genesis_idx: usize,
    /// Fires whenever a new block is attached, so RPC handlers can wait for
    /// confirmation depth without polling.
    pub notify: Arc<Notify>,
}

impl BlockStore {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let node = BlockNode { block: genesis, hash: hash.clone(), parent_idx: None, children: Vec::new(), depth: 0 };
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, 0);
        BlockStore { nodes: vec![node], by_hash, orphans_by_parent: HashMap::new(), genesis_idx: 0, notify: Arc::new(Notify::new()) }
    }

    pub fn genesis_hash(&self) -> &str {
        &self.nodes[self.genesis_idx].hash
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&BlockNode> {
        self.by_hash.get(hash).map(|&i| &self.nodes[i])
    }

    /// Inserts `block`, attaching it to its parent if present or parking it
    /// as an orphan otherwise. Idempotent: re-inserting an already-known
    /// hash observably does nothing.
    pub fn insert(&mut self, block: Block) -> InsertOutcome {
        let hash = block.hash();
        if self.by_hash.contains_key(&hash) {
            return InsertOutcome::AlreadyPresent;
        }
        match self.by_hash.get(&block.prev_hash).copied() {
            Some(parent_idx) => {
                let idx = self.attach(block, hash, parent_idx);
                self.absorb_orphans(idx);
                self.notify.notify_waiters();
                InsertOutcome::Inserted(idx)
            }
            None => {
                self.orphans_by_parent.entry(block.prev_hash.clone()).or_default().push(block);
                InsertOutcome::Orphaned
            }
        }
    }

    fn attach(&mut self, block: Block, hash: String, parent_idx: usize) -> usize {
        let depth = self.nodes[parent_idx].depth + 1;
        let idx = self.nodes.len();
        self.nodes.push(BlockNode { block, hash: hash.clone(), parent_idx: Some(parent_idx), children: Vec::new(), depth });
        self.nodes[parent_idx].children.push(idx);
        self.by_hash.insert(hash, idx);
        idx
    }

    /// Attaches a block whose parent is already confirmed present (by a
    /// prior `path_to`/`contains` check) without touching the orphan table —
    /// the caller (`consensus::Chain`) validates a block against its parent
    /// chain before ever calling this, and handles orphan adoption itself
    /// one validated generation at a time instead of letting this splice in
    /// whole unvalidated subtrees the way `insert`'s `absorb_orphans` does.
    pub fn attach_validated(&mut self, block: Block) -> usize {
        let hash = block.hash();
        let parent_idx = *self
            .by_hash
            .get(&block.prev_hash)
            .expect("attach_validated called with an unresolved parent");
        let idx = self.attach(block, hash, parent_idx);
        self.notify.notify_waiters();
        idx
    }

    /// Parks `block` under its (currently missing) parent's hash, same as
    /// `insert`'s orphan branch.
    pub fn park_orphan(&mut self, block: Block) {
        self.orphans_by_parent.entry(block.prev_hash.clone()).or_default().push(block);
    }

    /// Removes and returns every block that was waiting on `hash` as its
    /// parent — one generation, not recursive; the caller re-drives
    /// adoption for each returned block's own hash after validating and
    /// attaching it.
    pub fn take_orphans(&mut self, hash: &str) -> Vec<Block> {
        self.orphans_by_parent.remove(hash).unwrap_or_default()
    }

    fn absorb_orphans(&mut self, idx: usize) {
        let hash = self.nodes[idx].hash.clone();
        let Some(waiting) = self.orphans_by_parent.remove(&hash) else { return };
        for orphan in waiting {
            let orphan_hash = orphan.hash();
            let orphan_idx = self.attach(orphan, orphan_hash, idx);
            self.absorb_orphans(orphan_idx);
        }
    }

    /// The hash of the deepest block. Ties are broken deterministically by
    /// lexicographically-greatest hash — every honest node observing the
    /// same set of blocks picks the same tip, unlike a tie-break that favors
    /// "whichever arrived first" or peeks at the miner's identity.
    pub fn longest_chain_tip(&self) -> &str {
        let mut best = self.genesis_idx;
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.depth > self.nodes[best].depth
                || (node.depth == self.nodes[best].depth && node.hash > self.nodes[best].hash)
            {
                best = idx;
            }
        }
        &self.nodes[best].hash
    }

    /// The immediate children of `hash`, in arena order.
    pub fn children_of(&self, hash: &str) -> Vec<&Block> {
        let Some(&idx) = self.by_hash.get(hash) else { return Vec::new() };
        self.nodes[idx].children.iter().map(|&c| &self.nodes[c].block).collect()
    }

    /// Root-to-tip path of blocks ending at `hash`, inclusive of genesis.
    pub fn path_to(&self, hash: &str) -> Option<Vec<&Block>> {
        let mut idx = *self.by_hash.get(hash)?;
        let mut rev = Vec::new();
        loop {
            rev.push(&self.nodes[idx].block);
            match self.nodes[idx].parent_idx {
                Some(p) => idx = p,
                None => break,
            }
        }
        rev.reverse();
        Some(rev)
    }

    /// Longest distance from `hash` down to any leaf in its subtree — the
    /// confirmation depth used by the client API's blocking calls.
    pub fn confirmations(&self, hash: &str) -> Option<u32> {
        let idx = *self.by_hash.get(hash)?;
        Some(self.subtree_depth(idx))
    }

    fn subtree_depth(&self, idx: usize) -> u32 {
        self.nodes[idx]
            .children
            .iter()
            .map(|&c| 1 + self.subtree_depth(c))
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
