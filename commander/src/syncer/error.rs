use thiserror::Error;

use crate::{
    encoder::EncodingError,
    state::{BatchId, account::StateMerkleProof},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeKind {
    Transition,
    Signature,
}

/// A remote commitment proven invalid, with the state proofs an on-chain
/// fraud claim needs.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} dispute on commitment {commitment_index:?}: {reason}")]
pub struct DisputableError {
    pub kind: DisputeKind,
    pub reason: String,
    pub proofs: Vec<StateMerkleProof>,
    pub commitment_index: Option<usize>,
}

impl DisputableError {
    pub fn transition(reason: impl Into<String>, proofs: Vec<StateMerkleProof>) -> Self {
        Self {
            kind: DisputeKind::Transition,
            reason: reason.into(),
            proofs,
            commitment_index: None,
        }
    }

    pub fn signature(reason: impl Into<String>, proofs: Vec<StateMerkleProof>) -> Self {
        Self {
            kind: DisputeKind::Signature,
            reason: reason.into(),
            proofs,
            commitment_index: None,
        }
    }

    pub fn with_commitment_index(mut self, index: usize) -> Self {
        self.commitment_index = Some(index);
        self
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Disputable(#[from] DisputableError),
    #[error("batch {0} was replaced on-chain by a batch from our own account")]
    BatchSubmissionFailed(BatchId),
    #[error("syncing {0} is not implemented")]
    NotImplemented(String),
    #[error("corrupt commitment payload: {0}")]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl SyncError {
    pub fn as_disputable(&self) -> Option<&DisputableError> {
        match self {
            SyncError::Disputable(error) => Some(error),
            _ => None,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
