use crypto::BlsSignature;
use rkyv::{Archive, Deserialize, Serialize};

use super::{BatchId, Hash, StateId, TokenId, transaction::TxType};

/// Position of a commitment inside its batch.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitmentId {
    pub batch_id: BatchId,
    pub index_in_batch: u8,
}

impl CommitmentId {
    pub fn new(batch_id: BatchId, index_in_batch: u8) -> Self {
        Self {
            batch_id,
            index_in_batch,
        }
    }

    /// Storage key, ordered by batch then index.
    pub fn to_key(&self) -> [u8; 9] {
        let mut key = [0u8; 9];
        key[..8].copy_from_slice(&self.batch_id.to_be_bytes());
        key[8] = self.index_in_batch;
        key
    }
}

/// [`Commitment`] groups transactions of one kind under a single aggregated
/// signature and the state root reached after applying them in order.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub id: CommitmentId,
    pub tx_type: TxType,
    pub fee_receiver_state_id: StateId,
    pub combined_signature: BlsSignature,
    pub post_state_root: Hash,
    /// Compact encoding of the transactions, see [`crate::encoder`]
    pub serialized_txs: Vec<u8>,
    pub included_in_batch: Option<BatchId>,
}

impl Commitment {
    /// Hash of everything but the post state root.
    pub fn body_hash(&self, account_tree_root: &Hash) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(account_tree_root);
        hasher.update(self.combined_signature.as_bytes());
        hasher.update(&self.fee_receiver_state_id.to_be_bytes());
        hasher.update(&self.serialized_txs);
        hasher.finalize().into()
    }

    /// Leaf of the batch commitment tree.
    pub fn leaf_hash(&self, account_tree_root: &Hash) -> Hash {
        commitment_leaf(&self.post_state_root, &self.body_hash(account_tree_root))
    }
}

pub fn commitment_leaf(state_root: &Hash, body_hash: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(state_root);
    hasher.update(body_hash);
    hasher.finalize().into()
}

/// Account credited with a commitment's combined fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeReceiver {
    pub state_id: StateId,
    pub token_id: TokenId,
}
