//! Disputer
//!
//! Turns a [`DisputableError`] raised while syncing a remote batch into the
//! inputs of an on-chain fraud claim and submits it.
//!
//! A transition dispute proves the target commitment and the commitment
//! before it against their batch roots, so the contracts can replay the
//! target from the previous post-state root using the carried state proofs.
//! For the first commitment of a batch the previous commitment is the last
//! one of the preceding batch. A signature dispute proves the target
//! commitment and lists the signers' public keys.

use anyhow::{Context, Result, anyhow, bail};
use crypto::BlsPublicKey;
use slog::Logger;

use crate::{
    config::RollupConfig,
    merkle::{CommitmentTree, verify_inclusion},
    state::{
        BatchId, Hash, StateId,
        account::StateMerkleProof,
        batch::RemoteBatch,
        commitment::{Commitment, commitment_leaf},
        transaction::TxType,
        tree::StateTree,
    },
    syncer::{DisputableError, DisputeKind, SyncError, replay_commitment},
    traits::{ChainClient, Storage},
};

/// Position of a commitment under its batch's commitment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentInclusionProof {
    pub state_root: Hash,
    pub body_hash: Hash,
    pub index: usize,
    pub witness: Vec<Hash>,
}

impl CommitmentInclusionProof {
    fn new(
        tree: &CommitmentTree,
        commitment: &Commitment,
        index: usize,
        account_tree_root: &Hash,
    ) -> Result<Self> {
        Ok(Self {
            state_root: commitment.post_state_root,
            body_hash: commitment.body_hash(account_tree_root),
            index,
            witness: tree.witness(index)?,
        })
    }

    pub fn leaf(&self) -> Hash {
        commitment_leaf(&self.state_root, &self.body_hash)
    }

    pub fn verify(&self, root: &Hash) -> bool {
        verify_inclusion(&self.leaf(), self.index, &self.witness, root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDispute {
    pub batch_id: BatchId,
    pub batch_hash: Hash,
    pub previous: CommitmentInclusionProof,
    pub target: CommitmentInclusionProof,
    pub fee_receiver_state_id: StateId,
    pub serialized_txs: Vec<u8>,
    pub proofs: Vec<StateMerkleProof>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDispute {
    pub batch_id: BatchId,
    pub batch_hash: Hash,
    pub target: CommitmentInclusionProof,
    pub serialized_txs: Vec<u8>,
    /// Public key of each sender, in transaction order
    pub public_keys: Vec<BlsPublicKey>,
    pub proofs: Vec<StateMerkleProof>,
}

pub struct Disputer<'a, T, S, C>
where
    T: StateTree + ?Sized,
    S: Storage + ?Sized,
    C: ChainClient + ?Sized,
{
    config: &'a RollupConfig,
    tree: &'a mut T,
    storage: &'a S,
    client: &'a mut C,
    logger: Logger,
}

impl<'a, T, S, C> Disputer<'a, T, S, C>
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

    /// Submits the dispute `error` describes and returns the chain
    /// transaction hash.
    ///
    /// Expects the tree at the state `remote` started from, which is where a
    /// failed sync leaves it.
    pub fn dispute(&mut self, remote: &RemoteBatch, error: &DisputableError) -> Result<Hash> {
        let index = error
            .commitment_index
            .ok_or_else(|| anyhow!("dispute on batch {} names no commitment", remote.id))?;

        let tx_hash = match error.kind {
            DisputeKind::Transition => {
                let dispute = self.transition_dispute(remote, index, error.proofs.clone())?;
                self.client.dispute_transition(&dispute)?
            }
            DisputeKind::Signature => {
                let dispute = self.signature_dispute(remote, index, error.proofs.clone())?;
                self.client.dispute_signature(&dispute)?
            }
        };

        slog::warn!(
            self.logger,
            "Disputed remote batch";
            "batch_id" => remote.id,
            "commitment_index" => index,
            "kind" => ?error.kind,
            "reason" => &error.reason,
            "tx_hash" => hex::encode(tx_hash),
        );
        Ok(tx_hash)
    }

    pub fn transition_dispute(
        &self,
        remote: &RemoteBatch,
        index: usize,
        proofs: Vec<StateMerkleProof>,
    ) -> Result<TransitionDispute> {
        let (tree, target) = target_commitment(remote, index)?;
        let previous = self.previous_commitment_proof(remote, &tree, index)?;
        Ok(TransitionDispute {
            batch_id: remote.id,
            batch_hash: remote.hash,
            previous,
            target: CommitmentInclusionProof::new(&tree, target, index, &remote.account_tree_root)?,
            fee_receiver_state_id: target.fee_receiver_state_id,
            serialized_txs: target.serialized_txs.clone(),
            proofs,
        })
    }

    pub fn signature_dispute(
        &self,
        remote: &RemoteBatch,
        index: usize,
        proofs: Vec<StateMerkleProof>,
    ) -> Result<SignatureDispute> {
        let (tree, target) = target_commitment(remote, index)?;
        let public_keys = proofs
            .iter()
            .map(|proof| {
                let state = proof
                    .user_state
                    .ok_or_else(|| anyhow!("signature proof for vacant state {}", proof.state_id))?;
                self.storage
                    .public_key(state.pub_key_id)?
                    .ok_or_else(|| {
                        anyhow!("public key {} is not registered locally", state.pub_key_id)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SignatureDispute {
            batch_id: remote.id,
            batch_hash: remote.hash,
            target: CommitmentInclusionProof::new(&tree, target, index, &remote.account_tree_root)?,
            serialized_txs: target.serialized_txs.clone(),
            public_keys,
            proofs,
        })
    }

    /// Inclusion proof of the commitment whose post-state root the target
    /// commitment starts from.
    fn previous_commitment_proof(
        &self,
        remote: &RemoteBatch,
        tree: &CommitmentTree,
        index: usize,
    ) -> Result<CommitmentInclusionProof> {
        if let Some(previous_index) = index.checked_sub(1) {
            let previous = &remote.commitments[previous_index];
            return CommitmentInclusionProof::new(
                tree,
                previous,
                previous_index,
                &remote.account_tree_root,
            );
        }

        let previous_batch = match remote.id.checked_sub(1) {
            Some(id) => self.storage.batch(id)?,
            None => None,
        };
        if let Some(batch) = previous_batch {
            let commitments = self.storage.commitments(batch.id)?;
            if let (Some(last), Some(account_tree_root)) =
                (commitments.last(), batch.account_tree_root)
            {
                let tree = CommitmentTree::from_commitments(&commitments, &account_tree_root)?;
                return CommitmentInclusionProof::new(
                    &tree,
                    last,
                    commitments.len() - 1,
                    &account_tree_root,
                );
            }
        }

        // no commitment precedes the batch, it starts from the genesis state
        Ok(CommitmentInclusionProof {
            state_root: self.tree.root(),
            body_hash: [0; blake3::OUT_LEN],
            index: 0,
            witness: Vec::new(),
        })
    }

    /// Reconstructs the state proofs of a transition dispute on commitment
    /// `index` by replaying the batch from `prev_state_root`.
    ///
    /// Commitments before `index` must replay cleanly. The tree is left at
    /// `prev_state_root`.
    pub fn rebuild_transition_proofs(
        &mut self,
        remote: &RemoteBatch,
        index: usize,
        prev_state_root: &Hash,
    ) -> Result<Vec<StateMerkleProof>> {
        let tx_type = remote
            .batch_type
            .tx_type()
            .ok_or_else(|| anyhow!("{:?} batches carry no disputable transitions", remote.batch_type))?;
        if index >= remote.commitments.len() {
            bail!("batch {} has no commitment {index}", remote.id);
        }

        self.tree
            .revert_to(prev_state_root)
            .context("failed to revert state to the start of the disputed batch")?;
        let proofs = self.replay_until_dispute(remote, index, tx_type);
        self.tree
            .revert_to(prev_state_root)
            .context("failed to restore state after rebuilding proofs")?;
        proofs
    }

    fn replay_until_dispute(
        &mut self,
        remote: &RemoteBatch,
        index: usize,
        tx_type: TxType,
    ) -> Result<Vec<StateMerkleProof>> {
        for (position, commitment) in remote.commitments[..index].iter().enumerate() {
            replay_commitment(&mut *self.tree, self.storage, self.config, tx_type, commitment)
                .map_err(|error| anyhow!("commitment {position} does not replay cleanly: {error}"))?;
        }

        let target = &remote.commitments[index];
        match replay_commitment(&mut *self.tree, self.storage, self.config, tx_type, target) {
            Err(SyncError::Disputable(error)) => Ok(error.proofs),
            Err(error) => Err(anyhow::Error::new(error).context("failed to replay disputed commitment")),
            Ok(_) => bail!("commitment {index} of batch {} replays cleanly", remote.id),
        }
    }
}

fn target_commitment(remote: &RemoteBatch, index: usize) -> Result<(CommitmentTree, &Commitment)> {
    let target = remote
        .commitments
        .get(index)
        .ok_or_else(|| anyhow!("batch {} has no commitment {index}", remote.id))?;
    let tree = CommitmentTree::from_commitments(&remote.commitments, &remote.account_tree_root)?;
    Ok((tree, target))
}
