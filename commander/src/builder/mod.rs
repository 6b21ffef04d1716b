//! Commitment Builder and Batch Assembler
//!
//! Turns executable mempool transactions into commitments and commitments
//! into a submitted batch.
//!
//! ## Data Flow
//!
//! 1. Snapshot the state root and open a batch-level speculative mempool view
//! 2. Build commitments until the per-batch maximum, or until one attempt
//!    comes up short of `min_txs_per_commitment`
//! 3. Each attempt pulls the highest-fee executable transaction from a
//!    [`TxHeap`](crate::mempool::TxHeap), applies it, and replaces it with the
//!    sender's next executable transaction; failed transactions are dropped
//!    and recorded
//! 4. A short attempt reverts the tree to its own starting root and discards
//!    its nested mempool view
//! 5. Too few commitments, cancellation or a fatal error revert the tree to
//!    the batch snapshot and discard the batch view
//! 6. Otherwise the batch is submitted and persisted, then the view commits
//!
//! Cancellation is only observed between commitments.

mod batch;
mod commitment;
mod context;
mod error;

pub use batch::SubmittedBatch;
pub use commitment::{AppliedTx, CommitmentWithTxs};
pub use context::RollupContext;
pub use error::{BuildError, BuildResult};
