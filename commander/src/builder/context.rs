use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::anyhow;
use crypto::BlsPublicKey;
use slog::Logger;

use crate::{
    config::RollupConfig,
    executor::FailedTx,
    mempool::Mempool,
    state::{
        Hash, PubKeyId, now,
        commitment::FeeReceiver,
        transaction::TxType,
        tree::StateTree,
    },
    storage::record_tx_error,
    traits::{ChainClient, Storage},
};

use super::error::{BuildError, BuildResult};

/// Everything one batch attempt of one transaction kind works against.
///
/// The context borrows the tree, storage and chain client exclusively for
/// its lifetime, which is what serializes commitment building.
pub struct RollupContext<'a, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    pub(super) config: &'a RollupConfig,
    pub(super) tree: &'a mut T,
    pub(super) storage: &'a S,
    pub(super) client: &'a mut C,
    pub(super) tx_type: TxType,
    pub(super) min_txs_per_commitment: usize,
    pub(super) min_commitments_per_batch: usize,
    pub(super) failed: Vec<FailedTx>,
    cancelled: Arc<AtomicBool>,
    pub(super) logger: Logger,
}

impl<'a, T, S, C> RollupContext<'a, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    pub fn new(
        config: &'a RollupConfig,
        tree: &'a mut T,
        storage: &'a S,
        client: &'a mut C,
        tx_type: TxType,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            tree,
            storage,
            client,
            tx_type,
            min_txs_per_commitment: config.min_txs_per_commitment,
            min_commitments_per_batch: config.min_commitments_per_batch,
            failed: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            logger,
        }
    }

    /// Shares a flag that, once set, stops batch building at the next
    /// commitment boundary.
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Transactions dropped so far. Their error annotations are already stored.
    pub fn failed_txs(&self) -> &[FailedTx] {
        &self.failed
    }

    pub fn take_failed_txs(&mut self) -> Vec<FailedTx> {
        std::mem::take(&mut self.failed)
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Drops the minimums to one when the oldest pending transaction has
    /// waited longer than `max_txn_delay_secs`.
    pub(super) fn apply_delay_override(&mut self, mempool: &Mempool) {
        self.min_txs_per_commitment = self.config.min_txs_per_commitment;
        self.min_commitments_per_batch = self.config.min_commitments_per_batch;

        let Some(oldest) = mempool.oldest_receive_time(self.tx_type) else {
            return;
        };
        let waited = now().saturating_sub(oldest);
        if waited > self.config.max_txn_delay_secs {
            slog::info!(
                self.logger,
                "Oldest transaction exceeded max delay, lowering minimums";
                "waited_secs" => waited,
                "tx_type" => ?self.tx_type,
            );
            self.min_txs_per_commitment = 1;
            self.min_commitments_per_batch = 1;
        }
    }

    pub(super) fn fee_receiver(&self) -> BuildResult<FeeReceiver> {
        let state_id = self.config.fee_receiver_state_id;
        let state = self
            .tree
            .leaf(state_id)?
            .ok_or_else(|| anyhow!("fee receiver state {state_id} not found"))?;
        Ok(FeeReceiver {
            state_id,
            token_id: state.token_id,
        })
    }

    /// Public key id of a create2transfer destination, registering the key
    /// on-chain when it is not known yet.
    pub(super) fn resolve_pub_key_id(&mut self, public_key: &BlsPublicKey) -> BuildResult<PubKeyId> {
        if let Some(id) = self.storage.pub_key_id(public_key)? {
            return Ok(id);
        }
        let id = self.client.register_account(public_key)?;
        self.storage.add_account(id, public_key)?;
        slog::info!(
            self.logger,
            "Registered account";
            "pub_key_id" => id,
            "public_key" => ?public_key,
        );
        Ok(id)
    }

    pub(super) fn record_failure(&mut self, failure: FailedTx) {
        slog::debug!(
            self.logger,
            "Transaction failed";
            "tx_hash" => hex::encode(failure.tx_hash),
            "from_state_id" => failure.from_state_id,
            "error" => %failure.error,
        );
        record_tx_error(
            self.storage,
            &self.logger,
            &failure.tx_hash,
            &failure.error.to_string(),
        );
        self.failed.push(failure);
    }

    /// Reverts the tree to `root` and hands back `error`, or the revert
    /// failure if there was one.
    pub(super) fn abort(&mut self, root: &Hash, error: BuildError) -> BuildError {
        match self.tree.revert_to(root) {
            Ok(()) => error,
            Err(revert) => BuildError::Fatal(revert.context(format!("while handling: {error}"))),
        }
    }
}
