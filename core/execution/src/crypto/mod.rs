// tessera/core/execution/src/crypto/mod.rs

// Hashing and signature suite used for selectors and address derivation
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tessera_primitives::{Address, Hash};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Hash and signature scheme of a chain.
///
/// Signatures are 65 bytes laid out as `r || s || v` with `v` in `0..=1`.
pub trait CryptoSuite: Send + Sync {
    fn hash(&self, data: &[u8]) -> Hash;

    fn sign(&self, secret: &[u8; 32], hash: &Hash) -> Result<Vec<u8>, CryptoError>;

    /// `public` is a SEC1 encoded key, compressed or not.
    fn verify(&self, public: &[u8], hash: &Hash, signature: &[u8]) -> bool;

    fn recover(&self, hash: &Hash, signature: &[u8]) -> Result<Address, CryptoError>;
}

/// Keccak-256 with secp256k1 ECDSA, the Ethereum-compatible suite
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Secp256k1;

impl Keccak256Secp256k1 {
    fn address_of(key: &VerifyingKey) -> Address {
        let point = key.to_encoded_point(false);
        // Skip the 0x04 prefix of the uncompressed point
        let mut hasher = Keccak256::new();
        hasher.update(&point.as_bytes()[1..]);
        let digest = hasher.finalize();
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..32]);
        Address(address)
    }

    fn split_signature(signature: &[u8]) -> Result<(Signature, RecoveryId), CryptoError> {
        if signature.len() != 65 {
            return Err(CryptoError::InvalidSignature);
        }
        let sig =
            Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
        // Accept both the raw and the Ethereum-offset recovery byte
        let v = match signature[64] {
            27 | 28 => signature[64] - 27,
            v => v,
        };
        let recid = RecoveryId::from_byte(v).ok_or(CryptoError::InvalidSignature)?;
        Ok((sig, recid))
    }
}

impl CryptoSuite for Keccak256Secp256k1 {
    fn hash(&self, data: &[u8]) -> Hash {
        Hash::keccak(data)
    }

    fn sign(&self, secret: &[u8; 32], hash: &Hash) -> Result<Vec<u8>, CryptoError> {
        let key = SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        let (signature, recid) = key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let mut out = signature.to_bytes().to_vec();
        out.push(recid.to_byte());
        Ok(out)
    }

    fn verify(&self, public: &[u8], hash: &Hash, signature: &[u8]) -> bool {
        let key = match VerifyingKey::from_sec1_bytes(public) {
            Ok(key) => key,
            Err(_) => return false,
        };
        match Self::split_signature(signature) {
            Ok((sig, recid)) => VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recid)
                .map(|recovered| recovered == key)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn recover(&self, hash: &Hash, signature: &[u8]) -> Result<Address, CryptoError> {
        let (sig, recid) = Self::split_signature(signature)?;
        let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recid)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self::address_of(&key))
    }
}
