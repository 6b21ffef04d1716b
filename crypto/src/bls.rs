//! BLS12-381 signatures over the min-sig variant.
//!
//! Signatures live in G1 (48 bytes compressed) and public keys in G2
//! (96 bytes compressed), which keeps the per-commitment aggregated
//! signature small. Every signed message is prefixed with a 32-byte
//! [`Domain`] so signatures cannot be replayed across rollup deployments.

use blst::{BLST_ERROR, min_sig::*};
use rand::{CryptoRng, RngCore};
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;

/// The domain separation tag for BLS signatures.
const DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

pub const PUBLIC_KEY_LENGTH: usize = 96;
pub const SIGNATURE_LENGTH: usize = 48;
pub const DOMAIN_LENGTH: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlsError {
    #[error("invalid secret key material: {0:?}")]
    InvalidSecretKey(BLST_ERROR),
    #[error("invalid public key: {0:?}")]
    InvalidPublicKey(BLST_ERROR),
    #[error("invalid signature: {0:?}")]
    InvalidSignature(BLST_ERROR),
    #[error("failed to aggregate signatures: {0:?}")]
    AggregationFailed(BLST_ERROR),
    #[error("{messages} messages but {public_keys} public keys")]
    LengthMismatch { messages: usize, public_keys: usize },
}

pub type BlsResult<T> = Result<T, BlsError>;

/// Signing domain published by the rollup contracts.
#[derive(Archive, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Domain(pub [u8; DOMAIN_LENGTH]);

impl Domain {
    /// Prepends the domain to `message`.
    fn wrap(&self, message: &[u8]) -> Vec<u8> {
        let mut wrapped = Vec::with_capacity(DOMAIN_LENGTH + message.len());
        wrapped.extend_from_slice(&self.0);
        wrapped.extend_from_slice(message);
        wrapped
    }
}

pub struct BlsSecretKey {
    inner: SecretKey,
}

impl BlsSecretKey {
    /// Derives a secret key from at least 32 bytes of input key material.
    pub fn from_seed(seed: &[u8]) -> BlsResult<Self> {
        let inner = SecretKey::key_gen(seed, &[]).map_err(BlsError::InvalidSecretKey)?;
        Ok(Self { inner })
    }

    /// Generates a fresh secret key from a cryptographically secure RNG.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut ikm = [0u8; 32];
        loop {
            rng.fill_bytes(&mut ikm);
            // key_gen only fails for short input key material
            if let Ok(key) = Self::from_seed(&ikm) {
                return key;
            }
        }
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.inner.sk_to_pk().to_bytes())
    }

    /// Signs `message` under `domain`.
    pub fn sign(&self, message: &[u8], domain: &Domain) -> BlsSignature {
        let signature = self.inner.sign(&domain.wrap(message), DST, &[]);
        BlsSignature(signature.to_bytes())
    }
}

/// Compressed G2 public key.
#[derive(Archive, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsPublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> BlsResult<Self> {
        let key = PublicKey::from_bytes(bytes).map_err(BlsError::InvalidPublicKey)?;
        Ok(Self(key.to_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    fn decode(&self) -> BlsResult<PublicKey> {
        PublicKey::from_bytes(&self.0).map_err(BlsError::InvalidPublicKey)
    }

    /// Verifies a single signature over `message` under `domain`.
    pub fn verify(
        &self,
        message: &[u8],
        domain: &Domain,
        signature: &BlsSignature,
    ) -> BlsResult<bool> {
        let key = self.decode()?;
        let signature = signature.decode()?;
        let result = signature.verify(true, &domain.wrap(message), DST, &[], &key, true);
        Ok(result == BLST_ERROR::BLST_SUCCESS)
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey({}..)", hex::encode(&self.0[..8]))
    }
}

/// Compressed G1 signature, individual or aggregated.
#[derive(Archive, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsSignature(pub [u8; SIGNATURE_LENGTH]);

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> BlsResult<Self> {
        let signature = Signature::from_bytes(bytes).map_err(BlsError::InvalidSignature)?;
        Ok(Self(signature.to_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    fn decode(&self) -> BlsResult<Signature> {
        Signature::from_bytes(&self.0).map_err(BlsError::InvalidSignature)
    }

    /// Aggregates individual signatures into one.
    pub fn aggregate(signatures: &[BlsSignature]) -> BlsResult<Self> {
        let decoded = signatures
            .iter()
            .map(BlsSignature::decode)
            .collect::<BlsResult<Vec<_>>>()?;
        let refs: Vec<&Signature> = decoded.iter().collect();
        let aggregate =
            AggregateSignature::aggregate(&refs, true).map_err(BlsError::AggregationFailed)?;
        Ok(Self(aggregate.to_signature().to_bytes()))
    }

    /// Verifies an aggregated signature where `messages[i]` was signed by
    /// `public_keys[i]`, all under the same `domain`.
    pub fn verify_aggregated(
        &self,
        messages: &[Vec<u8>],
        public_keys: &[BlsPublicKey],
        domain: &Domain,
    ) -> BlsResult<bool> {
        if messages.len() != public_keys.len() {
            return Err(BlsError::LengthMismatch {
                messages: messages.len(),
                public_keys: public_keys.len(),
            });
        }
        let signature = self.decode()?;
        let keys = public_keys
            .iter()
            .map(BlsPublicKey::decode)
            .collect::<BlsResult<Vec<_>>>()?;
        let wrapped: Vec<Vec<u8>> = messages.iter().map(|m| domain.wrap(m)).collect();
        let message_refs: Vec<&[u8]> = wrapped.iter().map(Vec::as_slice).collect();
        let key_refs: Vec<&PublicKey> = keys.iter().collect();

        let result = signature.aggregate_verify(true, &message_refs, DST, &key_refs, true);
        Ok(result == BLST_ERROR::BLST_SUCCESS)
    }
}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsSignature({}..)", hex::encode(&self.0[..8]))
    }
}
