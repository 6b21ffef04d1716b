use anyhow::Context;
use slog::Logger;

use crate::{
    config::RollupConfig,
    state::{
        Hash,
        batch::{Batch, RemoteBatch},
        commitment::{Commitment, CommitmentId},
        transaction::TxType,
        tree::StateTree,
    },
    traits::{ChainClient, Storage},
};

use super::{
    error::{SyncError, SyncResult},
    replay::{ReplayedCommitment, replay_commitment},
    signature::verify_commitment_signature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A batch unknown locally was replayed and stored
    Synced,
    /// A local batch was confirmed by its chain record
    Finalised,
    /// Local batches from the fork point were dropped and the remote batch
    /// synced in their place
    Replaced { reverted: usize },
}

/// Brings local state in line with batches read from the chain.
pub struct BatchSyncer<'a, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    config: &'a RollupConfig,
    tree: &'a mut T,
    storage: &'a S,
    client: &'a C,
    logger: Logger,
}

impl<'a, T, S, C> BatchSyncer<'a, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    pub fn new(
        config: &'a RollupConfig,
        tree: &'a mut T,
        storage: &'a S,
        client: &'a C,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            tree,
            storage,
            client,
            logger,
        }
    }

    pub fn sync_batch(&mut self, remote: &RemoteBatch) -> SyncResult<SyncOutcome> {
        let Some(local) = self.storage.batch(remote.id)? else {
            self.sync_new_batch(remote)?;
            return Ok(SyncOutcome::Synced);
        };

        if local.transaction_hash == remote.transaction_hash {
            self.finalise(local, remote)?;
            return Ok(SyncOutcome::Finalised);
        }

        let sender = self.client.transaction_sender(&remote.transaction_hash)?;
        if sender == self.client.account() {
            return Err(SyncError::BatchSubmissionFailed(remote.id));
        }

        let reverted = self.revert_batches(&local)?;
        self.sync_new_batch(remote)?;
        Ok(SyncOutcome::Replaced { reverted })
    }

    fn finalise(&self, mut local: Batch, remote: &RemoteBatch) -> SyncResult<()> {
        local.hash = Some(remote.hash);
        local.finalisation_block = Some(remote.finalisation_block);
        local.account_tree_root = Some(remote.account_tree_root);
        self.storage.put_batch(&local)?;
        slog::info!(
            self.logger,
            "Finalised local batch";
            "batch_id" => local.id,
            "finalisation_block" => remote.finalisation_block,
        );
        Ok(())
    }

    /// Drops local batches from `fork` onwards: the tree goes back to the
    /// state before `fork`, and their transactions become pending again.
    fn revert_batches(&mut self, fork: &Batch) -> SyncResult<usize> {
        let reverted = self.storage.batches_from(fork.id)?.len();
        self.tree
            .revert_to(&fork.prev_state_root)
            .with_context(|| format!("failed to revert state to before batch {}", fork.id))?;
        let hashes = self.storage.revert_batches_from(fork.id)?;
        slog::warn!(
            self.logger,
            "Reverted local batches";
            "from_batch_id" => fork.id,
            "batches" => reverted,
            "txs" => hashes.len(),
        );
        Ok(reverted)
    }

    /// Replays every commitment of `remote`. Nothing is kept unless the
    /// whole batch verifies.
    fn sync_new_batch(&mut self, remote: &RemoteBatch) -> SyncResult<()> {
        let tx_type = remote
            .batch_type
            .tx_type()
            .ok_or_else(|| SyncError::NotImplemented(format!("{:?} batches", remote.batch_type)))?;

        let prev_state_root = self.tree.root();
        let result = self
            .replay_batch(remote, tx_type)
            .and_then(|replayed| self.persist(remote, prev_state_root, replayed));
        if let Err(error) = result {
            if let Some(disputable) = error.as_disputable() {
                slog::warn!(
                    self.logger,
                    "Disputable commitment detected";
                    "batch_id" => remote.id,
                    "commitment_index" => ?disputable.commitment_index,
                    "kind" => ?disputable.kind,
                    "reason" => &disputable.reason,
                );
            }
            self.tree
                .revert_to(&prev_state_root)
                .context("failed to revert state after sync failure")?;
            return Err(error);
        }

        slog::info!(
            self.logger,
            "Synced remote batch";
            "batch_id" => remote.id,
            "batch_type" => ?remote.batch_type,
            "commitments" => remote.commitments.len(),
        );
        Ok(())
    }

    fn replay_batch(
        &mut self,
        remote: &RemoteBatch,
        tx_type: TxType,
    ) -> SyncResult<Vec<ReplayedCommitment>> {
        let domain = self.client.domain()?;
        let mut replayed = Vec::with_capacity(remote.commitments.len());
        for (index, commitment) in remote.commitments.iter().enumerate() {
            let tag = |error: SyncError| match error {
                SyncError::Disputable(disputable) => {
                    SyncError::Disputable(disputable.with_commitment_index(index))
                }
                other => other,
            };
            let commitment_txs =
                replay_commitment(&mut *self.tree, self.storage, self.config, tx_type, commitment)
                    .map_err(tag)?;
            verify_commitment_signature(
                &*self.tree,
                self.storage,
                &domain,
                commitment,
                &commitment_txs.txs,
            )
            .map_err(tag)?;
            replayed.push(commitment_txs);
        }
        Ok(replayed)
    }

    fn persist(
        &self,
        remote: &RemoteBatch,
        prev_state_root: Hash,
        replayed: Vec<ReplayedCommitment>,
    ) -> SyncResult<()> {
        let batch = Batch {
            id: remote.id,
            batch_type: remote.batch_type,
            prev_state_root,
            transaction_hash: remote.transaction_hash,
            hash: Some(remote.hash),
            finalisation_block: Some(remote.finalisation_block),
            account_tree_root: Some(remote.account_tree_root),
            submission_time: None,
        };

        let mut commitments = Vec::with_capacity(remote.commitments.len());
        let mut txs = Vec::new();
        for (index, (commitment, replayed)) in remote.commitments.iter().zip(replayed).enumerate() {
            let index = u8::try_from(index)
                .with_context(|| format!("batch {} has too many commitments", remote.id))?;
            let id = CommitmentId::new(remote.id, index);
            commitments.push(Commitment {
                id,
                included_in_batch: Some(remote.id),
                ..commitment.clone()
            });
            txs.extend(replayed.txs.into_iter().map(|mut tx| {
                tx.commitment_id = Some(id);
                tx
            }));
        }
        self.storage.put_batch_with_commitments(&batch, &commitments, &txs)?;
        Ok(())
    }
}
