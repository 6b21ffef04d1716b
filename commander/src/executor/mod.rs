//! State Executor - the only code that mutates account leaves
//!
//! Applies a single transfer, create-to-transfer or fee credit against the
//! [`StateTree`](crate::state::tree::StateTree). Two entry points exist per
//! operation:
//!
//! - the **normal** path used while building commitments, which validates
//!   token, nonce, amount and balance before touching the tree and leaves no
//!   trace on failure;
//! - the **replay** path used while syncing remote commitments, which takes
//!   the nonce from the sender leaf, records the pre-transition state and
//!   witness of every leaf it writes, and reports failures together with the
//!   proofs gathered so far.
//!
//! Both paths share the value movement in [`transition`], so a successful
//! transaction produces the same leaves and the same root either way.

mod apply;
mod error;
mod transition;

pub use apply::{ReplayedFee, ReplayedTx, StateExecutor};
pub use error::{ApplyError, ApplyResult, FailedTx, TxError};
