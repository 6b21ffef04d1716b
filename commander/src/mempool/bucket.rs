use std::{collections::BTreeMap, sync::Arc};

use crate::state::{
    Hash,
    transaction::{Transaction, TxType},
};

use super::error::{MempoolError, MempoolResult};

/// Pending transactions of one sender, keyed by nonce.
///
/// Only the head can be executable, and only while its nonce equals
/// `nonce`, the next nonce the sender leaf is expected to carry.
#[derive(Debug, Clone)]
pub struct Bucket {
    txs: BTreeMap<u64, Arc<Transaction>>,
    nonce: u64,
}

impl Bucket {
    pub fn new(nonce: u64) -> Self {
        Self {
            txs: BTreeMap::new(),
            nonce,
        }
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn head(&self) -> Option<&Arc<Transaction>> {
        self.txs.first_key_value().map(|(_, tx)| tx)
    }

    /// The head, if it is of `tx_type` and carries the expected nonce.
    pub fn executable(&self, tx_type: TxType) -> Option<&Arc<Transaction>> {
        self.head()
            .filter(|tx| tx.nonce == self.nonce && tx.tx_type() == tx_type)
    }

    /// Inserts `tx` in nonce order. A transaction with an already pooled
    /// nonce replaces the pooled one only if it pays a strictly higher fee;
    /// the replaced transaction is returned.
    pub fn add_or_replace(&mut self, tx: Arc<Transaction>) -> MempoolResult<Option<Arc<Transaction>>> {
        if tx.nonce < self.nonce {
            return Err(MempoolError::NonceTooLow {
                expected: self.nonce,
                actual: tx.nonce,
            });
        }
        if let Some(current) = self.txs.get(&tx.nonce) {
            if tx.fee <= current.fee {
                return Err(MempoolError::ReplacementFailed {
                    nonce: tx.nonce,
                    current_fee: current.fee,
                    offered_fee: tx.fee,
                });
            }
        }
        Ok(self.txs.insert(tx.nonce, tx))
    }

    /// Removes the head. Advancing the expected nonce is up to the caller.
    pub fn pop_head(&mut self) -> Option<Arc<Transaction>> {
        self.txs.pop_first().map(|(_, tx)| tx)
    }

    pub fn advance_nonce(&mut self) {
        self.nonce += 1;
    }

    /// Moves the expected nonce up to `nonce`, for instance after another
    /// proposer's batch spent some of the sender's nonces. Returns the
    /// transactions whose nonce is now in the past. A lower `nonce` is
    /// ignored.
    pub fn advance_to(&mut self, nonce: u64) -> Vec<Arc<Transaction>> {
        if nonce <= self.nonce {
            return Vec::new();
        }
        self.nonce = nonce;
        let kept = self.txs.split_off(&nonce);
        std::mem::replace(&mut self.txs, kept).into_values().collect()
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Arc<Transaction>> {
        let nonce = self
            .txs
            .iter()
            .find(|(_, tx)| tx.hash == *hash)
            .map(|(nonce, _)| *nonce)?;
        self.txs.remove(&nonce)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.txs.values()
    }
}
