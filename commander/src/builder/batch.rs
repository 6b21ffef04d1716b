use anyhow::anyhow;

use crate::{
    mempool::{Mempool, TxHeap},
    state::{
        BatchId, Hash, now,
        batch::{Batch, BatchType},
        commitment::{Commitment, CommitmentId},
        transaction::Transaction,
        tree::StateTree,
    },
    traits::{ChainClient, Storage},
};

use super::{
    commitment::CommitmentWithTxs,
    context::RollupContext,
    error::{BuildError, BuildResult},
};

/// A batch accepted by the chain client and persisted locally.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub batch: Batch,
    pub commitments: Vec<CommitmentWithTxs>,
}

impl<T, S, C> RollupContext<'_, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    /// Builds the commitments of batch `batch_id` and publishes the mempool
    /// consumption, without submitting anything.
    pub fn create_commitments(
        &mut self,
        mempool: &mut Mempool,
        batch_id: BatchId,
    ) -> BuildResult<Vec<CommitmentWithTxs>> {
        let (commitments, ()) = self.run_batch(mempool, batch_id, |_, _, _| Ok(()))?;
        Ok(commitments)
    }

    /// Builds the next batch, submits it and persists it.
    ///
    /// The mempool only loses the included transactions once submission and
    /// persistence succeeded; any failure reverts the tree to where it was.
    pub fn create_and_submit_batch(&mut self, mempool: &mut Mempool) -> BuildResult<SubmittedBatch> {
        let batch_id = self.storage.next_batch_id()?;
        let (commitments, batch) =
            self.run_batch(mempool, batch_id, |context, prev_state_root, commitments| {
                context.submit_batch(batch_id, prev_state_root, commitments)
            })?;
        Ok(SubmittedBatch { batch, commitments })
    }

    fn run_batch<R>(
        &mut self,
        mempool: &mut Mempool,
        batch_id: BatchId,
        finish: impl FnOnce(&mut Self, Hash, &mut [CommitmentWithTxs]) -> BuildResult<R>,
    ) -> BuildResult<(Vec<CommitmentWithTxs>, R)> {
        self.apply_delay_override(mempool);
        let required = self.min_commitments_per_batch.max(1);
        let min_txs = self.min_txs_per_commitment.max(1);
        if mempool.tx_count(self.tx_type) < required.saturating_mul(min_txs) {
            return Err(BuildError::NotEnoughTxs);
        }

        let initial_root = self.tree.root();
        let mut heap = TxHeap::new(mempool.executable_txs(self.tx_type));
        let mut view = mempool.begin_transaction();
        let mut commitments = Vec::new();

        for index in 0..self.config.max_commitments_per_batch {
            if self.is_cancelled() {
                slog::info!(
                    self.logger,
                    "Batch building cancelled";
                    "batch_id" => batch_id,
                    "built" => commitments.len(),
                );
                return Err(self.abort(&initial_root, BuildError::Cancelled));
            }
            let Ok(index) = u8::try_from(index) else {
                let error = anyhow!("commitment index {index} does not fit a batch");
                return Err(self.abort(&initial_root, error.into()));
            };

            let id = CommitmentId::new(batch_id, index);
            match self.create_commitment(&mut view, &mut heap, id) {
                Ok(commitment) => commitments.push(commitment),
                Err(BuildError::NotEnoughTxs) => break,
                Err(error) => return Err(self.abort(&initial_root, error)),
            }
        }

        if commitments.len() < required {
            let error = BuildError::NotEnoughCommitments {
                built: commitments.len(),
                required,
            };
            return Err(self.abort(&initial_root, error));
        }

        match finish(self, initial_root, &mut commitments) {
            Ok(output) => {
                view.commit();
                Ok((commitments, output))
            }
            Err(error) => Err(self.abort(&initial_root, error)),
        }
    }

    fn submit_batch(
        &mut self,
        batch_id: BatchId,
        prev_state_root: Hash,
        commitments: &mut [CommitmentWithTxs],
    ) -> BuildResult<Batch> {
        for built in commitments.iter_mut() {
            built.commitment.included_in_batch = Some(batch_id);
        }
        let records: Vec<Commitment> = commitments
            .iter()
            .map(|built| built.commitment.clone())
            .collect();

        let batch_type = BatchType::from(self.tx_type);
        let transaction_hash = self.client.submit_batch(batch_id, batch_type, &records)?;
        let batch = Batch {
            id: batch_id,
            batch_type,
            prev_state_root,
            transaction_hash,
            hash: None,
            finalisation_block: None,
            account_tree_root: None,
            submission_time: Some(now()),
        };

        let txs: Vec<Transaction> = commitments
            .iter()
            .flat_map(|built| {
                built.txs.iter().map(|applied| Transaction {
                    commitment_id: Some(built.commitment.id),
                    error_message: None,
                    ..applied.tx.clone()
                })
            })
            .collect();
        self.storage.put_batch_with_commitments(&batch, &records, &txs)?;

        slog::info!(
            self.logger,
            "Submitted batch";
            "batch_id" => batch_id,
            "batch_type" => ?batch_type,
            "commitments" => commitments.len(),
            "tx_hash" => hex::encode(transaction_hash),
        );
        Ok(batch)
    }
}
