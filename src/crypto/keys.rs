// ECDSA-P384 key management.
//
// Every identity in the network — a miner's own identity, and each art-node
// client a miner serves — is a P384 keypair. Pubkeys and signatures are
// carried over the wire as lowercase hex, matching the block/op hash
// encoding used everywhere else (see crypto::hash).

use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;

use crate::crypto::hash::hash_md5;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("malformed key bytes")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
}

#[derive(Clone)]
pub struct PrivateKey(SigningKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(p384::EncodedPoint);

/// Generates a fresh P384 keypair using the OS RNG.
pub fn generate_keypair() -> (PublicKey, PrivateKey) {
    let sk = SigningKey::random(&mut OsRng);
    let pk = PublicKey(VerifyingKey::from(&sk).to_encoded_point(true));
    (pk, PrivateKey(sk))
}

impl PrivateKey {
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
        let sk = SigningKey::from_slice(&bytes).map_err(|_| KeyError::MalformedKey)?;
        Ok(PrivateKey(sk))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(VerifyingKey::from(&self.0).to_encoded_point(true))
    }

    /// Signs the MD5 digest of `msg` — every signature in this system (op
    /// signatures, client RPC envelopes) signs a pre-hashed message rather
    /// than raw bytes, matching the registry/client wire format of §6.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let digest = hash_md5(msg);
        self.0
            .sign_prehash(&digest)
            .expect("P384 prehash signing over a fixed-size digest cannot fail")
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PublicKey {
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
        let point = p384::EncodedPoint::from_bytes(&bytes).map_err(|_| KeyError::MalformedKey)?;
        // Round-trip through VerifyingKey to reject non-curve points.
        VerifyingKey::from_encoded_point(&point).map_err(|_| KeyError::MalformedKey)?;
        Ok(PublicKey(point))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from_encoded_point(&self.0)
            .expect("PublicKey is only constructed from validated encoded points")
    }

    /// Verifies `sig` over the MD5 digest of `msg`, mirroring `PrivateKey::sign`.
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> bool {
        let digest = hash_md5(msg);
        self.verifying_key().verify(&digest, sig).is_ok()
    }
}

/// Splits a signature into its `(r, s)` scalar components, hex-encoded —
/// the wire representation `{r, s}` of §6 rather than the DER/fixed-width
/// blob `Signature::to_bytes` would give.
pub fn signature_to_rs_hex(sig: &Signature) -> (String, String) {
    let bytes = sig.to_bytes();
    let (r, s) = bytes.split_at(48);
    (hex::encode(r), hex::encode(s))
}

pub fn signature_from_rs_hex(r: &str, s: &str) -> Result<Signature, KeyError> {
    let r = hex::decode(r).map_err(|_| KeyError::InvalidHex)?;
    let s = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
    if r.len() != 48 || s.len() != 48 {
        return Err(KeyError::MalformedSignature);
    }
    let mut bytes = [0u8; 96];
    bytes[..48].copy_from_slice(&r);
    bytes[48..].copy_from_slice(&s);
    Signature::from_slice(&bytes).map_err(|_| KeyError::MalformedSignature)
}
