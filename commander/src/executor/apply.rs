use anyhow::{Context, anyhow};

use crate::state::{
    Amount, PubKeyId, StateId, TokenId,
    account::{StateMerkleProof, UserState, Witness},
    transaction::{Transaction, TxType},
    tree::StateTree,
};

use super::{
    error::{ApplyResult, TxError},
    transition::{credit, debit, validate_nonce, validate_token_id},
};

/// Outcome of replaying one transaction.
///
/// Proofs carry the leaf content *before* the write together with the
/// witness against the tree at the moment of the write, which is what an
/// on-chain fraud proof checks step by step. On failure the proofs gathered
/// up to the failing step are kept.
#[derive(Debug, Clone)]
pub struct ReplayedTx {
    /// The transaction with its nonce (and create2transfer destination) filled in
    pub tx: Transaction,
    pub sender_proof: StateMerkleProof,
    pub receiver_proof: Option<StateMerkleProof>,
    pub error: Option<TxError>,
}

impl ReplayedTx {
    pub fn proofs(&self) -> impl Iterator<Item = &StateMerkleProof> {
        std::iter::once(&self.sender_proof).chain(self.receiver_proof.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ReplayedFee {
    pub proof: StateMerkleProof,
    pub error: Option<TxError>,
}

/// Applies transactions to a borrowed state tree.
pub struct StateExecutor<'a, T: StateTree + ?Sized> {
    tree: &'a mut T,
}

impl<'a, T: StateTree + ?Sized> StateExecutor<'a, T> {
    pub fn new(tree: &'a mut T) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &T {
        &*self.tree
    }

    /// Moves `tx.amount` from sender to receiver and charges `tx.fee`.
    ///
    /// Both leaves must hold `token_id`. Nothing is written unless every
    /// check passes.
    pub fn apply_transfer(&mut self, tx: &Transaction, token_id: TokenId) -> ApplyResult<()> {
        let to = tx.to_state_id().ok_or(TxError::NilReceiver)?;
        let receiver = self.tree.leaf(to)?.ok_or(TxError::NilReceiver)?;
        self.move_value(tx, to, receiver, token_id)
    }

    /// Like [`apply_transfer`](Self::apply_transfer), into a fresh zero-balance
    /// leaf owned by `pub_key_id`. Returns the destination state id, which is
    /// the next vacant leaf unless the transaction already names one.
    pub fn apply_create2_transfer(
        &mut self,
        tx: &Transaction,
        pub_key_id: PubKeyId,
        token_id: TokenId,
    ) -> ApplyResult<StateId> {
        let to = match tx.to_state_id() {
            Some(to) => to,
            None => self.tree.next_vacant_subtree(0)?,
        };
        self.move_value(tx, to, UserState::empty(pub_key_id, token_id), token_id)?;
        Ok(to)
    }

    /// Dispatches on the transaction kind and returns the transaction as
    /// applied, with any assigned destination filled in.
    pub fn apply_tx(
        &mut self,
        tx: &Transaction,
        to_pub_key_id: Option<PubKeyId>,
        token_id: TokenId,
    ) -> ApplyResult<Transaction> {
        let mut applied = tx.clone();
        match tx.tx_type() {
            TxType::Transfer => self.apply_transfer(tx, token_id)?,
            TxType::Create2Transfer => {
                let pub_key_id = to_pub_key_id.ok_or_else(|| {
                    anyhow!("create2transfer {} has no resolved public key id", hex::encode(tx.hash))
                })?;
                let to = self.apply_create2_transfer(tx, pub_key_id, token_id)?;
                applied.assign_to_state_id(to);
            }
        }
        Ok(applied)
    }

    /// Credits the fee receiver without any nonce or token check and returns
    /// its witness.
    pub fn apply_fee(&mut self, fee_receiver: StateId, amount: Amount) -> ApplyResult<Witness> {
        let state = self
            .tree
            .leaf(fee_receiver)?
            .ok_or_else(|| anyhow!("fee receiver state {fee_receiver} not found"))?;
        let credited = credit(&state, amount)
            .map_err(|e| anyhow!("cannot credit fee receiver {fee_receiver}: {e}"))?;
        Ok(self.tree.set_leaf(fee_receiver, &credited)?)
    }

    fn move_value(
        &mut self,
        tx: &Transaction,
        to: StateId,
        receiver: UserState,
        token_id: TokenId,
    ) -> ApplyResult<()> {
        let sender = self
            .tree
            .leaf(tx.from_state_id)?
            .ok_or_else(|| anyhow!("sender state {} not found", tx.from_state_id))?;

        validate_token_id(&sender, token_id)?;
        validate_token_id(&receiver, token_id)?;
        validate_nonce(&sender, tx.nonce)?;

        let new_sender = debit(&sender, tx)?;
        // a self-transfer credits the already debited leaf
        let receiver = if to == tx.from_state_id {
            new_sender
        } else {
            receiver
        };
        let new_receiver = credit(&receiver, tx.amount)?;

        self.tree.set_leaf(tx.from_state_id, &new_sender)?;
        self.tree.set_leaf(to, &new_receiver)?;
        Ok(())
    }

    /// Replays a decoded transfer. The nonce is taken from the sender leaf.
    pub fn replay_transfer(
        &mut self,
        tx: Transaction,
        token_id: TokenId,
    ) -> anyhow::Result<ReplayedTx> {
        self.replay_value_movement(tx, None, token_id)
    }

    /// Replays a decoded create2transfer into its recorded destination.
    pub fn replay_create2_transfer(
        &mut self,
        tx: Transaction,
        pub_key_id: PubKeyId,
        token_id: TokenId,
    ) -> anyhow::Result<ReplayedTx> {
        self.replay_value_movement(tx, Some(pub_key_id), token_id)
    }

    /// Credits the fee receiver of a replayed commitment and checks it holds
    /// the commitment token.
    pub fn replay_fee(
        &mut self,
        fee_receiver: StateId,
        token_id: TokenId,
        amount: Amount,
    ) -> anyhow::Result<ReplayedFee> {
        let before = self.tree.leaf(fee_receiver)?;
        let state = before.unwrap_or(UserState::empty(0, 0));
        let witness = self.tree.witness(fee_receiver)?;
        let proof = StateMerkleProof {
            state_id: fee_receiver,
            user_state: before,
            witness,
        };

        let credited = match credit(&state, amount) {
            Ok(credited) => credited,
            Err(error) => return Ok(ReplayedFee { proof, error: Some(error) }),
        };
        self.tree
            .set_leaf(fee_receiver, &credited)
            .context("failed to credit replayed fee")?;

        let error = validate_token_id(&state, token_id).err();
        Ok(ReplayedFee { proof, error })
    }

    fn replay_value_movement(
        &mut self,
        mut tx: Transaction,
        new_receiver: Option<PubKeyId>,
        token_id: TokenId,
    ) -> anyhow::Result<ReplayedTx> {
        let from = tx.from_state_id;
        let to = tx
            .to_state_id()
            .ok_or_else(|| anyhow!("replayed transaction from {from} has no destination"))?;

        let sender_before = self.tree.leaf(from)?;
        let sender = sender_before.unwrap_or(UserState::empty(0, 0));
        tx.nonce = sender.nonce;
        tx.rehash();

        let mut sender_proof = StateMerkleProof {
            state_id: from,
            user_state: sender_before,
            witness: Vec::new(),
        };
        let new_sender = match debit(&sender, &tx) {
            Ok(state) => state,
            Err(error) => {
                sender_proof.witness = self.tree.witness(from)?;
                return failed(tx, sender_proof, None, error);
            }
        };
        sender_proof.witness = self.tree.set_leaf(from, &new_sender)?;
        if let Err(error) = validate_token_id(&sender, token_id) {
            return failed(tx, sender_proof, None, error);
        }

        let receiver_before = match new_receiver {
            Some(_) => None,
            None => self.tree.leaf(to)?,
        };
        let receiver = match new_receiver {
            Some(pub_key_id) => UserState::empty(pub_key_id, token_id),
            None => receiver_before.unwrap_or(UserState::empty(0, 0)),
        };
        let mut receiver_proof = StateMerkleProof {
            state_id: to,
            user_state: receiver_before,
            witness: self.tree.witness(to)?,
        };
        let new_receiver = match credit(&receiver, tx.amount) {
            Ok(state) => state,
            Err(error) => return failed(tx, sender_proof, Some(receiver_proof), error),
        };
        receiver_proof.witness = self.tree.set_leaf(to, &new_receiver)?;
        if let Err(error) = validate_token_id(&receiver, token_id) {
            return failed(tx, sender_proof, Some(receiver_proof), error);
        }

        Ok(ReplayedTx {
            tx,
            sender_proof,
            receiver_proof: Some(receiver_proof),
            error: None,
        })
    }
}

fn failed(
    tx: Transaction,
    sender_proof: StateMerkleProof,
    receiver_proof: Option<StateMerkleProof>,
    error: TxError,
) -> anyhow::Result<ReplayedTx> {
    Ok(ReplayedTx {
        tx,
        sender_proof,
        receiver_proof,
        error: Some(error),
    })
}
