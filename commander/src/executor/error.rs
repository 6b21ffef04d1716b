use thiserror::Error;

use crate::state::{Amount, Hash, StateId, TokenId};

/// Transaction-local validation failure. Invalidates one transaction,
/// never the commitment being built around it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("nonce too low: expected {expected}, got {actual}")]
    NonceTooLow { expected: u64, actual: u64 },
    #[error("nonce too high: expected {expected}, got {actual}")]
    NonceTooHigh { expected: u64, actual: u64 },
    #[error("invalid amount {0}")]
    InvalidAmount(Amount),
    #[error("balance too low: have {balance}, need {required}")]
    BalanceTooLow { balance: Amount, required: Amount },
    #[error("invalid token id: expected {expected}, got {actual}")]
    InvalidTokenId { expected: TokenId, actual: TokenId },
    #[error("transaction has no receiver")]
    NilReceiver,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

pub type ApplyResult<T> = Result<T, ApplyError>;

/// A transaction dropped from a commitment attempt, kept for persistence
/// and for removal from the mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTx {
    pub tx_hash: Hash,
    pub from_state_id: StateId,
    pub error: TxError,
}
