//! Transaction Pool - ingestion front of the mempool
//!
//! The API layer pushes accepted (already persisted) transactions into a
//! lock-free `rtrb` ring buffer. The rollup loop calls
//! [`TxPool::update_mempool`] at the start of each iteration to absorb
//! whatever has arrived, so ingestion never blocks batch building and batch
//! building always starts from a consistent snapshot.
//!
//! ## Data Flow
//!
//! 1. Startup: pending transactions are loaded from storage, oldest first
//! 2. Ingestion: API threads push through the [`Producer`] half
//! 3. Absorption: `update_mempool` drains the queue into the [`Mempool`]
//! 4. Cleanup: failed transactions are dropped after each build attempt

use std::sync::Arc;

use anyhow::Result;
use crypto::BlsSignature;
use rtrb::{Consumer, Producer, RingBuffer};
use slog::Logger;

use crate::{
    encoder,
    executor::FailedTx,
    state::{transaction::Transaction, tree::StateTree},
    storage::record_tx_error,
    traits::TxStorage,
};

use super::{error::MempoolError, scheduler::Mempool};

/// Default capacity of the ingestion queue.
pub const DEFAULT_INGEST_CAPACITY: usize = 4096;

/// Counters over the pool's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub added: u64,
    pub replaced: u64,
    pub rejected: u64,
    pub failed: u64,
}

pub struct TxPool {
    mempool: Mempool,
    incoming: Consumer<Transaction>,
    pending_limit: usize,
    stats: PoolStats,
    logger: Logger,
}

impl TxPool {
    /// Creates the pool seeded from storage and returns the producer half
    /// of its ingestion queue.
    pub fn new<T, S>(
        tree: &T,
        storage: &S,
        pending_limit: usize,
        queue_capacity: usize,
        logger: Logger,
    ) -> Result<(Self, Producer<Transaction>)>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        let (producer, incoming) = RingBuffer::new(queue_capacity);
        let mut pool = Self {
            mempool: Mempool::new(),
            incoming,
            pending_limit,
            stats: PoolStats::default(),
            logger,
        };
        pool.seed(tree, storage)?;
        Ok((pool, producer))
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn mempool_mut(&mut self) -> &mut Mempool {
        &mut self.mempool
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Absorbs everything queued since the last call. Returns the number of
    /// transactions taken off the queue.
    pub fn update_mempool<T, S>(&mut self, tree: &T, storage: &S) -> Result<usize>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        let mut absorbed = 0;
        while let Ok(tx) = self.incoming.pop() {
            self.add(tx, tree, storage)?;
            absorbed += 1;
        }
        if absorbed > 0 {
            slog::debug!(
                self.logger,
                "Absorbed incoming transactions";
                "count" => absorbed,
                "pool_size" => self.mempool.len(),
            );
        }
        Ok(absorbed)
    }

    /// Drops transactions that failed during a build attempt. The attempt's
    /// speculative view may have been rolled back, so they can still be
    /// pooled.
    pub fn remove_failed_txs(&mut self, failed: &[FailedTx]) {
        let removed = self.mempool.remove_failed_txs(failed);
        self.stats.failed += removed as u64;
    }

    /// Brings every bucket's expected nonce up to its sender leaf, after a
    /// batch this pool did not build moved the tree forward. Transactions
    /// whose nonce was spent are dropped and, unless the synced batch
    /// included them, annotated in storage. Returns how many were dropped.
    pub fn refresh_nonces<T, S>(&mut self, tree: &T, storage: &S) -> Result<usize>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        let senders: Vec<_> = self.mempool.senders().collect();
        let mut dropped = 0;
        for state_id in senders {
            let Some(sender) = tree.leaf(state_id)? else {
                continue;
            };
            for tx in self.mempool.advance_sender_nonce(state_id, sender.nonce) {
                dropped += 1;
                let included = storage
                    .transaction(&tx.hash)?
                    .is_some_and(|stored| stored.commitment_id.is_some());
                if !included {
                    let error = MempoolError::NonceTooLow {
                        expected: sender.nonce,
                        actual: tx.nonce,
                    };
                    record_tx_error(storage, &self.logger, &tx.hash, &error.to_string());
                }
            }
        }
        if dropped > 0 {
            self.stats.failed += dropped as u64;
            slog::debug!(
                self.logger,
                "Dropped transactions with spent nonces";
                "count" => dropped,
                "pool_size" => self.mempool.len(),
            );
        }
        Ok(dropped)
    }

    /// Rebuilds the mempool from storage, for instance after a sync revert
    /// changed sender nonces. Queued transactions are kept.
    pub fn reset<T, S>(&mut self, tree: &T, storage: &S) -> Result<()>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        self.mempool.clear();
        self.seed(tree, storage)
    }

    fn seed<T, S>(&mut self, tree: &T, storage: &S) -> Result<()>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        let pending = storage.get_pending_transactions(self.pending_limit)?;
        let count = pending.len();
        for tx in pending {
            self.add(tx, tree, storage)?;
        }
        slog::info!(
            self.logger,
            "Seeded mempool from storage";
            "pending" => count,
            "pool_size" => self.mempool.len(),
        );
        Ok(())
    }

    /// Pools one transaction. Rejections are annotated in storage; only
    /// tree failures are returned.
    fn add<T, S>(&mut self, tx: Transaction, tree: &T, storage: &S) -> Result<()>
    where
        T: StateTree + ?Sized,
        S: TxStorage + ?Sized,
    {
        if !encoder::is_encodable(&tx) {
            self.reject(storage, &tx, "amount or fee is not representable in a commitment");
            return Ok(());
        }
        if BlsSignature::from_bytes(tx.signature.as_bytes()).is_err() {
            self.reject(storage, &tx, "signature is not a valid curve point");
            return Ok(());
        }
        let Some(sender) = tree.leaf(tx.from_state_id)? else {
            self.reject(storage, &tx, "sender state does not exist");
            return Ok(());
        };

        let hash = tx.hash;
        match self.mempool.add_or_replace(Arc::new(tx.clone()), sender.nonce) {
            Ok(None) => self.stats.added += 1,
            Ok(Some(replaced)) => {
                self.stats.added += 1;
                self.stats.replaced += 1;
                let message = format!("replaced by transaction {}", hex::encode(hash));
                record_tx_error(storage, &self.logger, &replaced.hash, &message);
            }
            Err(error) => self.reject(storage, &tx, &error.to_string()),
        }
        Ok(())
    }

    fn reject<S: TxStorage + ?Sized>(&mut self, storage: &S, tx: &Transaction, reason: &str) {
        self.stats.rejected += 1;
        slog::info!(
            self.logger,
            "Rejected transaction";
            "tx_hash" => hex::encode(tx.hash),
            "from_state_id" => tx.from_state_id,
            "nonce" => tx.nonce,
            "reason" => reason,
        );
        record_tx_error(storage, &self.logger, &tx.hash, reason);
    }
}
