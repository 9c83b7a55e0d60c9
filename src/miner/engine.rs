// PoW Engine: searches for a nonce making a block's hash satisfy the
// network's difficulty. The teacher's original miner ran a single sequential
// search loop against an external C++ engine, checking an `AtomicBool` stop
// flag between attempts; this engine keeps that stop-flag idiom but fans the
// search out across a worker pool, each given a disjoint nonce partition
// (`worker_id, worker_id + workers, worker_id + 2*workers, ...`) so workers
// never duplicate each other's work and any one of them can report the
// winning nonce first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::crypto::hash::hash_md5_hex;
use crate::primitives::block::Block;

/// Difficulty here is "exactly N trailing hex zero characters", not "at
/// least N" — a quirk carried over verbatim from the original PoW check:
/// the hash's last `n` hex characters must all be `0`, *and* the character
/// just before that run must not be `0` (otherwise the run is longer than
/// `n` and the block would need to be re-mined at the next difficulty step
/// down, not accepted here).
pub fn has_exact_trailing_zeros(hash: &str, n: u32) -> bool {
    let len = hash.len();
    let n = n as usize;
    if n == 0 {
        return true;
    }
    if n > len {
        return false;
    }
    let tail = &hash[len - n..];
    if !tail.bytes().all(|b| b == b'0') {
        return false;
    }
    if n == len {
        return true;
    }
    hash.as_bytes()[len - n - 1] != b'0'
}

/// Runs a blocking parallel nonce search against `prefix` (a block's
/// `mining_prefix()`) until a nonce satisfying `difficulty` is found or
/// `stop` is flipped by the caller (e.g. because a competing block for the
/// same parent just arrived over the network). Intended to be driven from
/// an async context via `tokio::task::spawn_blocking`.
pub fn search(prefix: Arc<Vec<u8>>, difficulty: u32, workers: usize, stop: Arc<AtomicBool>) -> Option<u64> {
    let workers = workers.max(1);
    let found = Arc::new(AtomicU64::new(u64::MAX));

    std::thread::scope(|scope| {
        for worker_id in 0..workers {
            let prefix = Arc::clone(&prefix);
            let stop = Arc::clone(&stop);
            let found = Arc::clone(&found);
            scope.spawn(move || {
                let mut nonce = worker_id as u64;
                loop {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let input = Block::mining_input(&prefix, nonce);
                    let hash = hash_md5_hex(&input);
                    if has_exact_trailing_zeros(&hash, difficulty) {
                        found.store(nonce, Ordering::SeqCst);
                        stop.store(true, Ordering::SeqCst);
                        return;
                    }
                    nonce = match nonce.checked_add(workers as u64) {
                        Some(n) => n,
                        None => return,
                    };
                }
            });
        }
    });

    let winner = found.load(Ordering::SeqCst);
    if winner == u64::MAX {
        None
    } else {
        Some(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_trailing_zeros() {
        assert!(has_exact_trailing_zeros("abc00", 2));
        assert!(!has_exact_trailing_zeros("abc000", 2)); // three zeros, not exactly two
        assert!(!has_exact_trailing_zeros("abc0", 2));
        assert!(has_exact_trailing_zeros("anything", 0));
    }

    #[test]
    fn test_whole_hash_all_zeros_satisfies_its_own_length() {
        assert!(has_exact_trailing_zeros("0000", 4));
    }

    #[test]
    fn test_search_finds_a_satisfying_nonce_at_low_difficulty() {
        let prefix = Arc::new(b"prevhash[]minerpubkey".to_vec());
        let stop = Arc::new(AtomicBool::new(false));
        let nonce = search(prefix.clone(), 1, 4, stop).expect("difficulty 1 should be found quickly");
        let input = Block::mining_input(&prefix, nonce);
        assert!(has_exact_trailing_zeros(&hash_md5_hex(&input), 1));
    }

    #[test]
    fn test_search_stops_immediately_when_pre_cancelled() {
        let prefix = Arc::new(b"x".to_vec());
        let stop = Arc::new(AtomicBool::new(true));
        assert_eq!(search(prefix, 10, 4, stop), None);
    }
}
