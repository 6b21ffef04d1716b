use thiserror::Error;

use crate::state::{Amount, StateId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("nonce too low: sender expects {expected}, got {actual}")]
    NonceTooLow { expected: u64, actual: u64 },
    #[error("replacement for nonce {nonce} must pay more than {current_fee}, offered {offered_fee}")]
    ReplacementFailed {
        nonce: u64,
        current_fee: Amount,
        offered_fee: Amount,
    },
    #[error("no pending transactions for sender {0}")]
    NoBucket(StateId),
}

pub type MempoolResult<T> = Result<T, MempoolError>;
