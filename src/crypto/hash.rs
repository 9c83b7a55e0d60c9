// Cryptographic hashing wrappers — MD5 is used exclusively for block/op identity,
// matching the wire format mandated by the coordinating registry and peer protocol.
// It is not used anywhere a collision would be a security boundary; PoW difficulty
// and shape/block identity only need a fast, deterministic digest.

/// MD5 of arbitrary bytes, returned as lowercase hex — the block hash and the
/// `hashed_msg` field of a signed client request both use this encoding.
pub fn hash_md5_hex(data: &[u8]) -> String {
    hex::encode(hash_md5(data))
}

pub fn hash_md5(data: &[u8]) -> [u8; 16] {
    *md5::compute(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_length() {
        let h = hash_md5_hex(b"inkminer");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_md5_deterministic() {
        assert_eq!(hash_md5_hex(b"abc"), hash_md5_hex(b"abc"));
        assert_ne!(hash_md5_hex(b"abc"), hash_md5_hex(b"abd"));
    }
}
