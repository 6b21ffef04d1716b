use rkyv::{Archive, Deserialize, Serialize};

use super::{BatchId, Hash, commitment::Commitment, transaction::TxType};

#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchType {
    Genesis,
    Transfer,
    Create2Transfer,
    MassMigration,
    Deposit,
}

impl BatchType {
    /// Transaction kind carried by the batch, if it carries user transactions
    /// this node knows how to execute.
    pub fn tx_type(&self) -> Option<TxType> {
        match self {
            BatchType::Transfer => Some(TxType::Transfer),
            BatchType::Create2Transfer => Some(TxType::Create2Transfer),
            BatchType::Genesis | BatchType::MassMigration | BatchType::Deposit => None,
        }
    }
}

impl From<TxType> for BatchType {
    fn from(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Transfer => BatchType::Transfer,
            TxType::Create2Transfer => BatchType::Create2Transfer,
        }
    }
}

/// [`Batch`] is the unit submitted on-chain.
///
/// Local batches are created before submission with `prev_state_root` fixed;
/// `hash`, `finalisation_block` and `account_tree_root` are filled in once
/// the chain record is observed.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    pub batch_type: BatchType,
    pub prev_state_root: Hash,
    /// Hash of the chain transaction that submitted the batch
    pub transaction_hash: Hash,
    pub hash: Option<Hash>,
    pub finalisation_block: Option<u64>,
    pub account_tree_root: Option<Hash>,
    pub submission_time: Option<u64>,
}

impl Batch {
    pub fn is_finalised(&self) -> bool {
        self.hash.is_some()
    }
}

/// A batch as read from the chain, with its commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatch {
    pub id: BatchId,
    pub batch_type: BatchType,
    pub transaction_hash: Hash,
    pub hash: Hash,
    pub finalisation_block: u64,
    pub account_tree_root: Hash,
    pub commitments: Vec<Commitment>,
}
