//! Executable-transaction scheduling with speculative consumption.
//!
//! [`Mempool`] owns one [`Bucket`] per sender. A commitment attempt consumes
//! transactions through a [`MempoolTx`], a copy-on-write overlay: a bucket is
//! cloned into the overlay the first time the attempt touches it, and
//! `commit` writes the touched buckets back. Dropping the overlay (or calling
//! `rollback`) discards everything it staged. Overlays nest, so a batch-level
//! view can host one view per commitment attempt.

use std::{collections::HashMap, sync::Arc};

use crate::{
    executor::FailedTx,
    state::{
        StateId,
        transaction::{Transaction, TxType},
    },
};

use super::{
    bucket::Bucket,
    error::{MempoolError, MempoolResult},
};

/// Pending transaction counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxCounts {
    transfer: usize,
    create2transfer: usize,
}

impl TxCounts {
    pub fn get(&self, tx_type: TxType) -> usize {
        match tx_type {
            TxType::Transfer => self.transfer,
            TxType::Create2Transfer => self.create2transfer,
        }
    }

    pub fn total(&self) -> usize {
        self.transfer + self.create2transfer
    }

    fn slot(&mut self, tx_type: TxType) -> &mut usize {
        match tx_type {
            TxType::Transfer => &mut self.transfer,
            TxType::Create2Transfer => &mut self.create2transfer,
        }
    }

    fn increment(&mut self, tx_type: TxType) {
        *self.slot(tx_type) += 1;
    }

    fn decrement(&mut self, tx_type: TxType) {
        let slot = self.slot(tx_type);
        *slot = slot.saturating_sub(1);
    }
}

/// Read and write access to buckets, implemented by the base mempool and
/// by every overlay stacked on it.
trait BucketView {
    fn bucket(&self, state_id: StateId) -> Option<&Bucket>;
    fn put_bucket(&mut self, state_id: StateId, bucket: Option<Bucket>);
    fn counts(&self) -> TxCounts;
    fn set_counts(&mut self, counts: TxCounts);
}

#[derive(Debug, Default)]
pub struct Mempool {
    buckets: HashMap<StateId, Bucket>,
    counts: TxCounts,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counts.total()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn tx_count(&self, tx_type: TxType) -> usize {
        self.counts.get(tx_type)
    }

    pub fn bucket(&self, state_id: StateId) -> Option<&Bucket> {
        self.buckets.get(&state_id)
    }

    /// Adds a transaction; `sender_nonce` seeds the bucket when the sender
    /// has none yet. Returns the transaction it replaced, if any.
    pub fn add_or_replace(
        &mut self,
        tx: Arc<Transaction>,
        sender_nonce: u64,
    ) -> MempoolResult<Option<Arc<Transaction>>> {
        let tx_type = tx.tx_type();
        let from = tx.from_state_id;
        let bucket = self
            .buckets
            .entry(from)
            .or_insert_with(|| Bucket::new(sender_nonce));

        let result = bucket.add_or_replace(tx);
        let emptied = bucket.is_empty();
        match &result {
            Ok(Some(replaced)) => {
                self.counts.decrement(replaced.tx_type());
                self.counts.increment(tx_type);
            }
            Ok(None) => self.counts.increment(tx_type),
            Err(_) if emptied => {
                self.buckets.remove(&from);
            }
            Err(_) => {}
        }
        result
    }

    /// One executable transaction per sender, in no particular order.
    pub fn executable_txs(&self, tx_type: TxType) -> Vec<Arc<Transaction>> {
        self.buckets
            .values()
            .filter_map(|bucket| bucket.executable(tx_type).cloned())
            .collect()
    }

    /// Receive time of the oldest pooled transaction of `tx_type`.
    pub fn oldest_receive_time(&self, tx_type: TxType) -> Option<u64> {
        self.transactions()
            .filter(|tx| tx.tx_type() == tx_type)
            .map(|tx| tx.receive_time)
            .min()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.buckets.values().flat_map(Bucket::iter)
    }

    /// Drops failed transactions by hash without advancing any nonce.
    /// Transactions no longer pooled are skipped.
    pub fn remove_failed_txs(&mut self, failed: &[FailedTx]) -> usize {
        let mut removed = 0;
        for failure in failed {
            let Some(bucket) = self.buckets.get_mut(&failure.from_state_id) else {
                continue;
            };
            if let Some(tx) = bucket.remove(&failure.tx_hash) {
                self.counts.decrement(tx.tx_type());
                removed += 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(&failure.from_state_id);
            }
        }
        removed
    }

    pub fn senders(&self) -> impl Iterator<Item = StateId> + '_ {
        self.buckets.keys().copied()
    }

    /// Raises the expected nonce of `state_id` and drops the transactions
    /// it makes stale. See [`Bucket::advance_to`].
    pub fn advance_sender_nonce(&mut self, state_id: StateId, nonce: u64) -> Vec<Arc<Transaction>> {
        let Some(bucket) = self.buckets.get_mut(&state_id) else {
            return Vec::new();
        };
        let stale = bucket.advance_to(nonce);
        for tx in &stale {
            self.counts.decrement(tx.tx_type());
        }
        if bucket.is_empty() {
            self.buckets.remove(&state_id);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.counts = TxCounts::default();
    }

    /// Opens a speculative view over the pool.
    pub fn begin_transaction(&mut self) -> MempoolTx<'_> {
        MempoolTx::new(self)
    }
}

impl BucketView for Mempool {
    fn bucket(&self, state_id: StateId) -> Option<&Bucket> {
        self.buckets.get(&state_id)
    }

    fn put_bucket(&mut self, state_id: StateId, bucket: Option<Bucket>) {
        match bucket {
            Some(bucket) => self.buckets.insert(state_id, bucket),
            None => self.buckets.remove(&state_id),
        };
    }

    fn counts(&self) -> TxCounts {
        self.counts
    }

    fn set_counts(&mut self, counts: TxCounts) {
        self.counts = counts;
    }
}

/// Speculative view over a [`Mempool`] or over another view.
///
/// `None` in `staged` marks a bucket deleted by this view.
pub struct MempoolTx<'a> {
    parent: &'a mut dyn BucketView,
    staged: HashMap<StateId, Option<Bucket>>,
    counts: TxCounts,
}

impl<'a> MempoolTx<'a> {
    fn new(parent: &'a mut dyn BucketView) -> Self {
        let counts = parent.counts();
        Self {
            parent,
            staged: HashMap::new(),
            counts,
        }
    }

    pub fn tx_count(&self, tx_type: TxType) -> usize {
        self.counts.get(tx_type)
    }

    /// Executable transaction of `state_id`, as seen through this view.
    pub fn executable_tx(&self, state_id: StateId, tx_type: TxType) -> Option<Arc<Transaction>> {
        BucketView::bucket(self, state_id)
            .and_then(|bucket| bucket.executable(tx_type))
            .cloned()
    }

    /// Consumes the sender's head after it was applied, advances the
    /// expected nonce and returns the sender's next executable transaction.
    pub fn next_executable_tx(
        &mut self,
        tx_type: TxType,
        state_id: StateId,
    ) -> MempoolResult<Option<Arc<Transaction>>> {
        let (removed, bucket) = self.pop_head(state_id)?;
        self.counts.decrement(removed.tx_type());
        let Some(mut bucket) = bucket else {
            self.staged.insert(state_id, None);
            return Ok(None);
        };
        bucket.advance_nonce();
        let next = bucket.executable(tx_type).cloned();
        self.staged.insert(state_id, Some(bucket));
        Ok(next)
    }

    /// Drops the sender's head after it failed. The expected nonce stays,
    /// so the sender is blocked until a transaction with that nonce arrives.
    pub fn remove_failed_tx(&mut self, state_id: StateId) -> MempoolResult<Arc<Transaction>> {
        let (removed, bucket) = self.pop_head(state_id)?;
        self.counts.decrement(removed.tx_type());
        self.staged.insert(state_id, bucket);
        Ok(removed)
    }

    /// Pops the head of a copy of the sender's bucket; the copy is `None`
    /// once empty.
    fn pop_head(&mut self, state_id: StateId) -> MempoolResult<(Arc<Transaction>, Option<Bucket>)> {
        let mut bucket = BucketView::bucket(self, state_id)
            .cloned()
            .ok_or(MempoolError::NoBucket(state_id))?;
        let removed = bucket.pop_head().ok_or(MempoolError::NoBucket(state_id))?;
        let remaining = (!bucket.is_empty()).then_some(bucket);
        Ok((removed, remaining))
    }

    /// Opens a view nested in this one.
    pub fn begin_transaction(&mut self) -> MempoolTx<'_> {
        MempoolTx::new(self)
    }

    /// Publishes staged buckets and counts to the parent.
    pub fn commit(self) {
        let MempoolTx {
            parent,
            staged,
            counts,
        } = self;
        for (state_id, bucket) in staged {
            parent.put_bucket(state_id, bucket);
        }
        parent.set_counts(counts);
    }

    /// Discards staged mutations. Equivalent to dropping the view.
    pub fn rollback(self) {}
}

impl BucketView for MempoolTx<'_> {
    fn bucket(&self, state_id: StateId) -> Option<&Bucket> {
        match self.staged.get(&state_id) {
            Some(staged) => staged.as_ref(),
            None => self.parent.bucket(state_id),
        }
    }

    fn put_bucket(&mut self, state_id: StateId, bucket: Option<Bucket>) {
        self.staged.insert(state_id, bucket);
    }

    fn counts(&self) -> TxCounts {
        self.counts
    }

    fn set_counts(&mut self, counts: TxCounts) {
        self.counts = counts;
    }
}
