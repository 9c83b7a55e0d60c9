// Genesis block construction. The genesis hash is a value every node in the
// network must agree on in advance — it comes from the registry's
// `GetNodes` response, not from local configuration, so that nodes bootstrap
// onto the same tree.

use crate::primitives::block::Block;

pub fn make_genesis(genesis_hash: String) -> Block {
    Block::genesis(genesis_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_hash_is_preserved() {
        let b = make_genesis("cafebabe".to_string());
        assert_eq!(b.hash(), "cafebabe");
        assert!(b.op_history.is_empty());
    }
}
