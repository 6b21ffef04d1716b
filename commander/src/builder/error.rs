use crypto::BlsError;
use thiserror::Error;

use crate::{encoder::EncodingError, mempool::MempoolError};

/// Failure of a commitment or batch attempt. Every variant leaves the state
/// tree at the root it had before the attempt.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("not enough valid transactions to build a commitment")]
    NotEnoughTxs,
    #[error("built {built} commitments, at least {required} required")]
    NotEnoughCommitments { built: usize, required: usize },
    #[error("batch building cancelled")]
    Cancelled,
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl BuildError {
    /// Whether the caller should simply try again later.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BuildError::Fatal(_))
    }
}

impl From<MempoolError> for BuildError {
    fn from(error: MempoolError) -> Self {
        BuildError::Fatal(anyhow::Error::new(error).context("mempool invariant violated"))
    }
}

impl From<EncodingError> for BuildError {
    fn from(error: EncodingError) -> Self {
        BuildError::Fatal(anyhow::Error::new(error).context("failed to encode commitment"))
    }
}

impl From<BlsError> for BuildError {
    fn from(error: BlsError) -> Self {
        BuildError::Fatal(anyhow::Error::new(error).context("failed to aggregate signatures"))
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
