//! Commander - drives the rollup loop and chain synchronisation
//!
//! [`Commander`] owns the state tree, storage, chain client and transaction
//! pool, and lends them to the builder, syncer and disputer one operation at
//! a time, so commitment building and batch syncing never interleave.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, bail};
use rtrb::Producer;
use slog::Logger;

use crate::{
    builder::{BuildError, RollupContext, SubmittedBatch},
    config::RollupConfig,
    disputer::Disputer,
    mempool::TxPool,
    state::{
        BatchId, Hash, PubKeyId,
        batch::RemoteBatch,
        transaction::{Transaction, TxType},
        tree::StateTree,
    },
    syncer::{BatchSyncer, DisputeKind, SyncError, SyncOutcome},
    traits::{ChainClient, Storage},
};

/// What syncing one remote batch led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBatchStatus {
    Synced(SyncOutcome),
    Disputed { kind: DisputeKind, tx_hash: Hash },
}

pub struct Commander<T, S, C>
where
    T: StateTree,
    S: Storage,
    C: ChainClient,
{
    config: RollupConfig,
    tree: T,
    storage: S,
    client: C,
    tx_pool: TxPool,
    /// Set when this node must stop proposing
    cancelled: Arc<AtomicBool>,
    next_pub_key_id: PubKeyId,
    logger: Logger,
}

impl<T, S, C> Commander<T, S, C>
where
    T: StateTree,
    S: Storage,
    C: ChainClient,
{
    /// Validates the configuration, seeds the pool from storage and returns
    /// the producer half of the ingestion queue.
    pub fn new(
        config: RollupConfig,
        tree: T,
        storage: S,
        client: C,
        logger: Logger,
    ) -> Result<(Self, Producer<Transaction>)> {
        config.validate().context("invalid rollup configuration")?;
        if tree.depth() != config.state_tree_depth {
            bail!(
                "state tree has depth {}, configuration expects {}",
                tree.depth(),
                config.state_tree_depth
            );
        }
        let (tx_pool, producer) = TxPool::new(
            &tree,
            &storage,
            config.pending_txs_limit,
            config.ingest_queue_capacity,
            logger.clone(),
        )?;
        let commander = Self {
            config,
            tree,
            storage,
            client,
            tx_pool,
            cancelled: Arc::new(AtomicBool::new(false)),
            next_pub_key_id: 0,
            logger,
        };
        Ok((commander, producer))
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn tx_pool(&self) -> &TxPool {
        &self.tx_pool
    }

    /// Flag that stops batch building at the next commitment boundary
    /// once set, for instance when the node loses proposer status.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Stores account registrations seen on-chain since the last call.
    pub fn sync_accounts(&mut self) -> Result<usize> {
        let accounts = self.client.registered_accounts(self.next_pub_key_id)?;
        for (pub_key_id, public_key) in &accounts {
            self.storage.add_account(*pub_key_id, public_key)?;
            self.next_pub_key_id = self.next_pub_key_id.max(pub_key_id + 1);
        }
        if !accounts.is_empty() {
            slog::debug!(
                self.logger,
                "Synced accounts";
                "count" => accounts.len(),
                "next_pub_key_id" => self.next_pub_key_id,
            );
        }
        Ok(accounts.len())
    }

    /// One pass of the rollup loop: absorb incoming transactions, then build
    /// and submit at most one batch per transaction kind.
    ///
    /// Too few transactions, too few commitments and cancellation are not
    /// errors; they just mean nothing was submitted for that kind.
    pub fn rollup_iteration(&mut self) -> Result<Vec<SubmittedBatch>> {
        self.tx_pool.update_mempool(&self.tree, &self.storage)?;

        let mut submitted = Vec::new();
        for tx_type in [TxType::Transfer, TxType::Create2Transfer] {
            if self.cancelled.load(Ordering::Acquire) {
                slog::debug!(self.logger, "Not proposing, skipping batch building");
                break;
            }

            let mut context = RollupContext::new(
                &self.config,
                &mut self.tree,
                &self.storage,
                &mut self.client,
                tx_type,
                self.logger.clone(),
            )
            .with_cancellation(Arc::clone(&self.cancelled));
            let result = context.create_and_submit_batch(self.tx_pool.mempool_mut());
            let failed = context.take_failed_txs();
            self.tx_pool.remove_failed_txs(&failed);

            match result {
                Ok(batch) => submitted.push(batch),
                Err(BuildError::Fatal(error)) => return Err(error),
                Err(error) => {
                    slog::debug!(
                        self.logger,
                        "No batch submitted";
                        "tx_type" => ?tx_type,
                        "reason" => %error,
                    );
                }
            }
        }
        Ok(submitted)
    }

    /// Syncs one batch read from the chain, disputing it when it is invalid.
    pub fn sync_remote_batch(&mut self, remote: &RemoteBatch) -> Result<RemoteBatchStatus> {
        let result = BatchSyncer::new(
            &self.config,
            &mut self.tree,
            &self.storage,
            &self.client,
            self.logger.clone(),
        )
        .sync_batch(remote);

        match result {
            Ok(outcome) => {
                match outcome {
                    SyncOutcome::Replaced { .. } => self.tx_pool.reset(&self.tree, &self.storage)?,
                    SyncOutcome::Synced => {
                        self.tx_pool.refresh_nonces(&self.tree, &self.storage)?;
                    }
                    SyncOutcome::Finalised => {}
                }
                self.prune_history(remote);
                Ok(RemoteBatchStatus::Synced(outcome))
            }
            Err(SyncError::Disputable(error)) => {
                // the sync may have reverted local batches before failing
                self.tx_pool.reset(&self.tree, &self.storage)?;
                let tx_hash = Disputer::new(
                    &self.config,
                    &mut self.tree,
                    &self.storage,
                    &mut self.client,
                    self.logger.clone(),
                )
                .dispute(remote, &error)?;
                Ok(RemoteBatchStatus::Disputed {
                    kind: error.kind,
                    tx_hash,
                })
            }
            Err(SyncError::Fatal(error)) => Err(error),
            Err(error) => Err(anyhow::Error::new(error)),
        }
    }

    /// Forgets tree history up to the end of a batch the chain has
    /// recorded. Local batches after it can still be reverted.
    fn prune_history(&mut self, remote: &RemoteBatch) {
        let Some(last) = remote.commitments.last() else {
            return;
        };
        if let Err(error) = self.tree.prune_history(&last.post_state_root) {
            slog::debug!(
                self.logger,
                "Kept state history";
                "batch_id" => remote.id,
                "reason" => %error,
            );
        }
    }

    /// Syncs every remote batch from `from` on, stopping after the first
    /// dispute since later batches build on the disputed one.
    pub fn sync_remote_batches(&mut self, from: BatchId) -> Result<Vec<RemoteBatchStatus>> {
        self.sync_accounts()?;
        let remotes = self.client.remote_batches(from)?;
        let mut statuses = Vec::with_capacity(remotes.len());
        for remote in &remotes {
            let status = self.sync_remote_batch(remote)?;
            let disputed = matches!(status, RemoteBatchStatus::Disputed { .. });
            statuses.push(status);
            if disputed {
                break;
            }
        }
        Ok(statuses)
    }
}
