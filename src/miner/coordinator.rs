// PoW Engine coordinator: turns the one-shot nonce search in `miner::engine`
// into a long-running mining loop. A round is mined against a snapshot of
// the canonical tip plus whatever operations are currently pending; the
// round is abandoned and rebuilt — not merely continued — the instant the
// tip moves (another miner won this round) or a new operation shows up to
// include, mirroring the original miner's "cancel and re-enter Mining"
// state transition but driven by async channels/Notify instead of a polled
// shared queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::{self, MiningSettings};
use crate::consensus::store::InsertOutcome;
use crate::consensus::validator::{self, CanvasState};
use crate::consensus::Chain;
use crate::miner::engine;
use crate::primitives::block::Block;
use crate::primitives::operation::Operation;

/// Drives one miner's PoW engine against a shared `Chain`. Owns the pending
/// operation pool; everything else (peer gossip, the client API) feeds new
/// operations in through `ops_in` and otherwise only touches the chain.
pub struct MiningCoordinator {
    chain: Arc<Mutex<Chain>>,
    miner_pubkey: String,
    ops_in: mpsc::UnboundedReceiver<Operation>,
    solved_tx: mpsc::UnboundedSender<Block>,
    workers: usize,
}

impl MiningCoordinator {
    pub fn new(
        chain: Arc<Mutex<Chain>>,
        miner_pubkey: String,
        ops_in: mpsc::UnboundedReceiver<Operation>,
        solved_tx: mpsc::UnboundedSender<Block>,
    ) -> Self {
        MiningCoordinator { chain, miner_pubkey, ops_in, solved_tx, workers: config::max_workers() }
    }

    /// Runs forever, mining one block at a time. Intended to be spawned as
    /// its own task for the node's lifetime.
    pub async fn run(mut self) {
        let mut pending: Vec<Operation> = Vec::new();
        loop {
            let notify = self.chain.lock().await.notify();
            let (candidate, difficulty) = self.build_candidate(&mut pending).await;

            let prefix = Arc::new(candidate.mining_prefix());
            let stop = Arc::new(AtomicBool::new(false));
            let mut search = {
                let prefix = prefix.clone();
                let stop = stop.clone();
                let workers = self.workers;
                tokio::task::spawn_blocking(move || engine::search(prefix, difficulty, workers, stop))
            };

            let won = tokio::select! {
                result = &mut search => result.unwrap_or(None),
                _ = notify.notified() => {
                    stop.store(true, Ordering::SeqCst);
                    let _ = search.await;
                    None
                }
                maybe_op = self.ops_in.recv() => {
                    stop.store(true, Ordering::SeqCst);
                    let _ = search.await;
                    if let Some(op) = maybe_op {
                        pending.push(op);
                    }
                    None
                }
            };

            let Some(nonce) = won else {
                continue;
            };

            let mut block = candidate;
            block.nonce = nonce;

            let outcome = self.chain.lock().await.validate_and_insert(block.clone());
            match outcome {
                Ok(InsertOutcome::Inserted(_)) => {
                    let mined: std::collections::HashSet<String> =
                        block.op_history.iter().map(|op| op.hash()).collect();
                    pending.retain(|op| !mined.contains(&op.hash()));
                    println!("[miner] mined block {} ({} op(s))", block.hash(), block.op_history.len());
                    let _ = self.solved_tx.send(block);
                }
                Ok(InsertOutcome::AlreadyPresent) | Ok(InsertOutcome::Orphaned) => {
                    // A competing block for the same parent landed first;
                    // loop around and mine against the new tip.
                }
                Err(e) => {
                    eprintln!("[miner] mined block rejected by own chain: {e}");
                }
            }
        }
    }

    /// Builds the next candidate block: current canonical tip as parent,
    /// every still-valid pending operation as its body. An operation that no
    /// longer applies cleanly against the folded canvas state (another op
    /// consumed the ink or pixels it needed) is dropped from `pending`
    /// rather than retried — it already passed validation once, at
    /// submission time, so a second failure means the world moved past it.
    async fn build_candidate(&self, pending: &mut Vec<Operation>) -> (Block, u32) {
        let (tip, mining, mut state) = {
            let chain = self.chain.lock().await;
            (chain.longest_chain_tip(), chain.mining().clone(), chain.fold_canonical())
        };

        let included = filter_applicable(pending, &mut state, &mining);
        *pending = included.clone();

        let difficulty = if included.is_empty() {
            mining.pow_difficulty_no_op_block
        } else {
            mining.pow_difficulty_op_block
        };
        (Block::new(tip, included, self.miner_pubkey.clone(), 0), difficulty)
    }
}

fn filter_applicable(ops: &[Operation], state: &mut CanvasState, mining: &MiningSettings) -> Vec<Operation> {
    let mut included = Vec::with_capacity(ops.len());
    for op in ops {
        match validator::apply_operation(state, op, mining) {
            Ok(()) => included.push(op.clone()),
            Err(e) => eprintln!("[miner] dropping op {}: {e}", op.hash()),
        }
    }
    included
}
