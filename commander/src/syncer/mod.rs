//! Sync/Dispute Verifier
//!
//! Replays batches read from the chain against the local state tree.
//!
//! A batch unknown locally is replayed commitment by commitment: decode the
//! payload, run every transaction through the executor's replay path, credit
//! the fee receiver, compare the root with the declared `post_state_root`,
//! then verify the aggregated signature. Any divergence is a
//! [`DisputableError`] carrying the state proofs collected so far, and
//! leaves the tree where it was before the batch.
//!
//! A batch known locally is either confirmed (same submitting transaction),
//! a failed submission of our own, or a fork: local batches from that id on
//! are reverted and the remote batch is synced in their place.

mod error;
mod replay;
mod signature;
mod sync;

pub use error::{DisputableError, DisputeKind, SyncError, SyncResult};
pub use replay::{ReplayedCommitment, replay_commitment};
pub use signature::verify_commitment_signature;
pub use sync::{BatchSyncer, SyncOutcome};
