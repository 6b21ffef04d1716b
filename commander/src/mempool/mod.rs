//! Mempool Scheduler - pending transactions ordered for execution
//!
//! ## Architecture
//!
//! ```text
//! API ──[rtrb queue]──► TxPool ──► Mempool (buckets per sender)
//!                                     │
//!                                     ├── executable_txs ──► TxHeap (fee order)
//!                                     │
//!                                     └── MempoolTx (speculative, nestable)
//! ```
//!
//! A sender's transactions are only executable in nonce order with no gaps.
//! The builder consumes them through a [`MempoolTx`] so a failed commitment
//! attempt leaves the pool exactly as it was.

mod bucket;
mod error;
mod heap;
mod pool;
mod scheduler;

pub use bucket::Bucket;
pub use error::{MempoolError, MempoolResult};
pub use heap::TxHeap;
pub use pool::{DEFAULT_INGEST_CAPACITY, PoolStats, TxPool};
pub use scheduler::{Mempool, MempoolTx, TxCounts};
