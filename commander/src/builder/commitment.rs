use anyhow::anyhow;
use crypto::BlsSignature;

use crate::{
    encoder::{self, CompactTx},
    executor::{ApplyError, FailedTx, StateExecutor},
    mempool::{MempoolTx, TxHeap},
    state::{
        Amount, PubKeyId,
        commitment::{Commitment, CommitmentId, FeeReceiver},
        transaction::Transaction,
        tree::StateTree,
    },
    traits::{ChainClient, Storage},
};

use super::{
    context::RollupContext,
    error::{BuildError, BuildResult},
};

/// A transaction as it was applied, with the destination key id its
/// compact encoding needs.
#[derive(Debug, Clone)]
pub struct AppliedTx {
    pub tx: Transaction,
    pub to_pub_key_id: Option<PubKeyId>,
}

/// A built commitment together with the transactions it carries.
#[derive(Debug, Clone)]
pub struct CommitmentWithTxs {
    pub commitment: Commitment,
    pub txs: Vec<AppliedTx>,
    pub combined_fee: Amount,
}

struct ExecutedTxs {
    applied: Vec<AppliedTx>,
    combined_fee: Amount,
}

impl<T, S, C> RollupContext<'_, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    /// Builds one commitment from the heap.
    ///
    /// Mempool consumption is staged in a view nested in `mempool` and only
    /// published when the commitment is kept. A short attempt restores both
    /// the tree and `mempool` and returns [`BuildError::NotEnoughTxs`].
    pub(super) fn create_commitment(
        &mut self,
        mempool: &mut MempoolTx<'_>,
        heap: &mut TxHeap,
        id: CommitmentId,
    ) -> BuildResult<CommitmentWithTxs> {
        let min_txs = self.min_txs_per_commitment.max(1);
        if mempool.tx_count(self.tx_type) < min_txs {
            return Err(BuildError::NotEnoughTxs);
        }

        let fee_receiver = self.fee_receiver()?;
        let initial_root = self.tree.root();
        let mut view = mempool.begin_transaction();

        let executed = match self.execute_txs(&mut view, heap, fee_receiver) {
            Ok(executed) => executed,
            Err(error) => return Err(self.abort(&initial_root, error)),
        };
        if executed.applied.len() < min_txs {
            slog::debug!(
                self.logger,
                "Not enough valid transactions for commitment";
                "applied" => executed.applied.len(),
                "required" => min_txs,
            );
            return Err(self.abort(&initial_root, BuildError::NotEnoughTxs));
        }

        match self.seal_commitment(id, fee_receiver, executed) {
            Ok(built) => {
                view.commit();
                slog::info!(
                    self.logger,
                    "Created commitment";
                    "batch_id" => id.batch_id,
                    "index" => id.index_in_batch,
                    "txs" => built.txs.len(),
                    "combined_fee" => %built.combined_fee,
                    "post_state_root" => hex::encode(built.commitment.post_state_root),
                );
                Ok(built)
            }
            Err(error) => Err(self.abort(&initial_root, error)),
        }
    }

    /// Applies heap transactions in fee order until the heap runs dry or
    /// `max_txs_per_commitment` are applied.
    fn execute_txs(
        &mut self,
        view: &mut MempoolTx<'_>,
        heap: &mut TxHeap,
        fee_receiver: FeeReceiver,
    ) -> BuildResult<ExecutedTxs> {
        let mut applied = Vec::new();
        let mut combined_fee: Amount = 0;

        while let Some(tx) = heap.peek().cloned() {
            if applied.len() >= self.config.max_txs_per_commitment {
                break;
            }

            let to_pub_key_id = match tx.to_public_key() {
                Some(public_key) => Some(self.resolve_pub_key_id(public_key)?),
                None => None,
            };

            let mut executor = StateExecutor::new(&mut *self.tree);
            match executor.apply_tx(&tx, to_pub_key_id, fee_receiver.token_id) {
                Ok(applied_tx) => {
                    match view.next_executable_tx(self.tx_type, tx.from_state_id)? {
                        Some(next) => {
                            heap.replace(next);
                        }
                        None => {
                            heap.pop();
                        }
                    }
                    combined_fee = combined_fee
                        .checked_add(tx.fee)
                        .ok_or_else(|| anyhow!("combined commitment fee overflows"))?;
                    applied.push(AppliedTx {
                        tx: applied_tx,
                        to_pub_key_id,
                    });
                }
                Err(ApplyError::Tx(error)) => {
                    view.remove_failed_tx(tx.from_state_id)?;
                    heap.pop();
                    self.record_failure(FailedTx {
                        tx_hash: tx.hash,
                        from_state_id: tx.from_state_id,
                        error,
                    });
                }
                Err(ApplyError::Fatal(error)) => return Err(BuildError::Fatal(error)),
            }
        }

        Ok(ExecutedTxs {
            applied,
            combined_fee,
        })
    }

    /// Credits the combined fee and assembles the commitment record.
    fn seal_commitment(
        &mut self,
        id: CommitmentId,
        fee_receiver: FeeReceiver,
        executed: ExecutedTxs,
    ) -> BuildResult<CommitmentWithTxs> {
        StateExecutor::new(&mut *self.tree)
            .apply_fee(fee_receiver.state_id, executed.combined_fee)
            .map_err(|error| match error {
                ApplyError::Tx(error) => BuildError::Fatal(anyhow!("fee credit failed: {error}")),
                ApplyError::Fatal(error) => BuildError::Fatal(error),
            })?;

        let compact = executed
            .applied
            .iter()
            .map(|applied| CompactTx::from_transaction(&applied.tx, applied.to_pub_key_id))
            .collect::<Result<Vec<_>, _>>()?;
        let serialized_txs = encoder::encode_txs(self.tx_type, &compact)?;

        let signatures: Vec<BlsSignature> =
            executed.applied.iter().map(|applied| applied.tx.signature).collect();
        let combined_signature = BlsSignature::aggregate(&signatures)?;

        let commitment = Commitment {
            id,
            tx_type: self.tx_type,
            fee_receiver_state_id: fee_receiver.state_id,
            combined_signature,
            post_state_root: self.tree.root(),
            serialized_txs,
            included_in_batch: None,
        };
        Ok(CommitmentWithTxs {
            commitment,
            txs: executed.applied,
            combined_fee: executed.combined_fee,
        })
    }
}
