//! Fee-priority heap over executable transactions.
//!
//! Rebuilt from [`Mempool::executable_txs`](super::Mempool::executable_txs)
//! for every batch attempt and owned by that attempt. Holds at most one
//! transaction per sender: after the builder applies a sender's head it
//! [`replace`](TxHeap::replace)s it with the sender's next executable one.
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `new`     | O(n)       |
//! | `peek`    | O(1)       |
//! | `pop`     | O(log n)   |
//! | `push`    | O(log n)   |
//! | `replace` | O(log n)   |

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use crate::state::transaction::Transaction;

/// Higher fee first, then earlier arrival, then lower hash.
#[derive(Debug, Clone)]
struct ByFee(Arc<Transaction>);

impl Ord for ByFee {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .fee
            .cmp(&other.0.fee)
            .then_with(|| other.0.receive_time.cmp(&self.0.receive_time))
            .then_with(|| other.0.hash.cmp(&self.0.hash))
    }
}

impl PartialOrd for ByFee {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ByFee {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByFee {}

#[derive(Debug, Default)]
pub struct TxHeap {
    heap: BinaryHeap<ByFee>,
}

impl TxHeap {
    pub fn new(txs: Vec<Arc<Transaction>>) -> Self {
        Self {
            heap: txs.into_iter().map(ByFee).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek(&self) -> Option<&Arc<Transaction>> {
        self.heap.peek().map(|entry| &entry.0)
    }

    pub fn pop(&mut self) -> Option<Arc<Transaction>> {
        self.heap.pop().map(|entry| entry.0)
    }

    pub fn push(&mut self, tx: Arc<Transaction>) {
        self.heap.push(ByFee(tx));
    }

    /// Swaps the top for `tx` and returns the old top. Pushes when empty.
    pub fn replace(&mut self, tx: Arc<Transaction>) -> Option<Arc<Transaction>> {
        if let Some(mut top) = self.heap.peek_mut() {
            return Some(std::mem::replace(&mut *top, ByFee(tx)).0);
        }
        self.heap.push(ByFee(tx));
        None
    }
}
