use rkyv::{Archive, Deserialize, Serialize};

use super::{Amount, Hash, PubKeyId, StateId, TokenId};

/// [`UserState`] is the content of a single state tree leaf.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserState {
    pub pub_key_id: PubKeyId,
    pub token_id: TokenId,
    pub balance: Amount,
    pub nonce: u64,
}

impl UserState {
    pub fn new(pub_key_id: PubKeyId, token_id: TokenId, balance: Amount, nonce: u64) -> Self {
        Self {
            pub_key_id,
            token_id,
            balance,
            nonce,
        }
    }

    /// The leaf a freshly allocated account starts from.
    pub fn empty(pub_key_id: PubKeyId, token_id: TokenId) -> Self {
        Self::new(pub_key_id, token_id, 0, 0)
    }

    /// Fixed-width big-endian leaf encoding.
    pub fn encode(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[0..4].copy_from_slice(&self.pub_key_id.to_be_bytes());
        out[4..12].copy_from_slice(&self.token_id.to_be_bytes());
        out[12..28].copy_from_slice(&self.balance.to_be_bytes());
        out[28..36].copy_from_slice(&self.nonce.to_be_bytes());
        out
    }

    pub fn leaf_hash(&self) -> Hash {
        blake3::hash(&self.encode()).into()
    }
}

/// Merkle path of sibling hashes from the leaf level up to the root.
pub type Witness = Vec<Hash>;

/// A leaf's content (or vacancy) together with its inclusion witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMerkleProof {
    pub state_id: StateId,
    pub user_state: Option<UserState>,
    pub witness: Witness,
}
