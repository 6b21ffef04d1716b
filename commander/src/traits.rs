use anyhow::Result;
use crypto::{BlsPublicKey, Domain};

use crate::{
    disputer::{SignatureDispute, TransitionDispute},
    state::{
        Address, BatchId, Hash, PubKeyId,
        batch::{Batch, BatchType, RemoteBatch},
        commitment::{Commitment, CommitmentId},
        transaction::Transaction,
    },
};

/// Persistence of user transactions and their inclusion state.
pub trait TxStorage {
    fn add_transaction(&self, tx: &Transaction) -> Result<()>;

    fn transaction(&self, hash: &Hash) -> Result<Option<Transaction>>;

    /// Pending transactions ordered by receive time, at most `limit`.
    fn get_pending_transactions(&self, limit: usize) -> Result<Vec<Transaction>>;

    fn set_transaction_error(&self, hash: &Hash, message: &str) -> Result<()>;

    fn mark_included(&self, hashes: &[Hash], commitment_id: CommitmentId) -> Result<()>;

    /// Clears inclusion and error state.
    fn mark_pending(&self, hashes: &[Hash]) -> Result<()>;

    /// Hashes of transactions included in batch `batch_id` or any later one.
    fn transaction_hashes_from_batch(&self, batch_id: BatchId) -> Result<Vec<Hash>>;
}

/// Persistence of batches and their commitments.
pub trait BatchStorage {
    /// Inserts or overwrites a batch.
    fn put_batch(&self, batch: &Batch) -> Result<()>;

    fn batch(&self, id: BatchId) -> Result<Option<Batch>>;

    fn latest_batch(&self) -> Result<Option<Batch>>;

    /// Batches with id `>= id`, ascending.
    fn batches_from(&self, id: BatchId) -> Result<Vec<Batch>>;

    /// Stores a batch, its commitments and the transactions they carry in a
    /// single write. `txs` are stored as given, so they should already name
    /// their commitment.
    fn put_batch_with_commitments(
        &self,
        batch: &Batch,
        commitments: &[Commitment],
        txs: &[Transaction],
    ) -> Result<()>;

    /// Deletes batches with id `>= id` together with their commitments and
    /// marks their transactions pending again, in a single write. Returns
    /// the hashes of the transactions made pending.
    fn revert_batches_from(&self, id: BatchId) -> Result<Vec<Hash>>;

    fn commitments(&self, batch_id: BatchId) -> Result<Vec<Commitment>>;

    /// Id the next locally created batch gets. Batch 0 is the genesis batch.
    fn next_batch_id(&self) -> Result<BatchId> {
        Ok(self.latest_batch()?.map_or(1, |batch| batch.id + 1))
    }
}

/// Registry of BLS public keys by account tree id.
pub trait AccountStorage {
    fn add_account(&self, pub_key_id: PubKeyId, public_key: &BlsPublicKey) -> Result<()>;

    fn public_key(&self, pub_key_id: PubKeyId) -> Result<Option<BlsPublicKey>>;

    fn pub_key_id(&self, public_key: &BlsPublicKey) -> Result<Option<PubKeyId>>;
}

pub trait Storage: TxStorage + BatchStorage + AccountStorage {}

impl<S: TxStorage + BatchStorage + AccountStorage> Storage for S {}

/// Access to the rollup contracts.
///
/// Every failure is an opaque I/O error and fatal to the calling operation.
pub trait ChainClient {
    /// Signing domain of the deployment.
    fn domain(&self) -> Result<Domain>;

    /// Address this commander submits from.
    fn account(&self) -> Address;

    /// Submits a batch and returns the submitting chain transaction hash.
    fn submit_batch(
        &mut self,
        batch_id: BatchId,
        batch_type: BatchType,
        commitments: &[Commitment],
    ) -> Result<Hash>;

    /// Sender of a chain transaction.
    fn transaction_sender(&self, tx_hash: &Hash) -> Result<Address>;

    /// Registers a public key in the account tree and returns its id.
    fn register_account(&mut self, public_key: &BlsPublicKey) -> Result<PubKeyId>;

    /// Account registrations with id `>= from`, from the registration events.
    fn registered_accounts(&self, from: PubKeyId) -> Result<Vec<(PubKeyId, BlsPublicKey)>>;

    /// Batches submitted with id `>= from`, from the submission events.
    fn remote_batches(&self, from: BatchId) -> Result<Vec<RemoteBatch>>;

    fn dispute_transition(&mut self, dispute: &TransitionDispute) -> Result<Hash>;

    fn dispute_signature(&mut self, dispute: &SignatureDispute) -> Result<Hash>;
}
