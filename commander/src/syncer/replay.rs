use anyhow::anyhow;

use crate::{
    config::RollupConfig,
    encoder::{self, CompactTx},
    executor::{ReplayedTx, StateExecutor},
    state::{
        Amount, StateId, TokenId,
        account::StateMerkleProof,
        commitment::Commitment,
        transaction::{Transaction, TxType},
        tree::StateTree,
    },
    traits::AccountStorage,
};

use super::error::{DisputableError, SyncResult};

/// A remote commitment that replayed to its declared root.
#[derive(Debug, Clone)]
pub struct ReplayedCommitment {
    /// Decoded transactions with nonces and destinations filled in
    pub txs: Vec<Transaction>,
    pub combined_fee: Amount,
    pub proofs: Vec<StateMerkleProof>,
}

/// Re-executes one remote commitment on `tree`.
///
/// Proofs are gathered transaction by transaction, so a dispute raised
/// midway carries everything replayed up to and including the failing step.
/// The tree is left wherever replay stopped; reverting it is up to the
/// caller. The aggregated signature is not checked here.
pub fn replay_commitment<T, S>(
    tree: &mut T,
    storage: &S,
    config: &RollupConfig,
    tx_type: TxType,
    commitment: &Commitment,
) -> SyncResult<ReplayedCommitment>
where
    T: StateTree + ?Sized,
    S: AccountStorage + ?Sized,
{
    let count = encoder::tx_count(tx_type, &commitment.serialized_txs)?;
    if count > config.max_txs_per_commitment {
        let reason = format!(
            "commitment carries {count} transactions, at most {} allowed",
            config.max_txs_per_commitment
        );
        return Err(DisputableError::transition(reason, Vec::new()).into());
    }

    let records = encoder::decode_txs(tx_type, &commitment.serialized_txs)?;
    let token_id = commitment_token(tree, records.first(), commitment.fee_receiver_state_id)?;

    let mut proofs = Vec::with_capacity(2 * count + 1);
    let mut txs = Vec::with_capacity(count);
    let mut combined_fee: Amount = 0;

    for record in &records {
        let replayed = match tx_type {
            TxType::Transfer => {
                let tx = Transaction::transfer(
                    record.from_state_id,
                    record.to_state_id,
                    record.amount,
                    record.fee,
                    0,
                );
                StateExecutor::new(&mut *tree).replay_transfer(tx, token_id)?
            }
            TxType::Create2Transfer => {
                if tree.leaf(record.to_state_id)?.is_some() {
                    proofs.push(tree.proof(record.to_state_id)?);
                    let reason = format!("create2transfer into occupied state {}", record.to_state_id);
                    return Err(DisputableError::transition(reason, proofs).into());
                }
                replay_create2_transfer(tree, storage, record, token_id)?
            }
        };

        proofs.extend(replayed.proofs().cloned());
        if let Some(error) = replayed.error {
            let reason = format!("transaction from {} invalid: {error}", record.from_state_id);
            return Err(DisputableError::transition(reason, proofs).into());
        }
        combined_fee = match combined_fee.checked_add(record.fee) {
            Some(fee) => fee,
            None => return Err(DisputableError::transition("combined fee overflows", proofs).into()),
        };
        txs.push(replayed.tx);
    }

    let fee = StateExecutor::new(&mut *tree).replay_fee(
        commitment.fee_receiver_state_id,
        token_id,
        combined_fee,
    )?;
    proofs.push(fee.proof);
    if let Some(error) = fee.error {
        let reason = format!(
            "fee receiver {} invalid: {error}",
            commitment.fee_receiver_state_id
        );
        return Err(DisputableError::transition(reason, proofs).into());
    }

    let root = tree.root();
    if root != commitment.post_state_root {
        let reason = format!(
            "post state root mismatch: declared {}, replayed {}",
            hex::encode(commitment.post_state_root),
            hex::encode(root)
        );
        return Err(DisputableError::transition(reason, proofs).into());
    }

    Ok(ReplayedCommitment {
        txs,
        combined_fee,
        proofs,
    })
}

fn replay_create2_transfer<T, S>(
    tree: &mut T,
    storage: &S,
    record: &CompactTx,
    token_id: TokenId,
) -> SyncResult<ReplayedTx>
where
    T: StateTree + ?Sized,
    S: AccountStorage + ?Sized,
{
    let pub_key_id = record.to_pub_key_id.ok_or_else(|| {
        anyhow!("create2transfer record from {} has no public key id", record.from_state_id)
    })?;
    let public_key = storage
        .public_key(pub_key_id)?
        .ok_or_else(|| anyhow!("public key {pub_key_id} is not registered locally"))?;

    let mut tx = Transaction::create2transfer(
        record.from_state_id,
        public_key,
        record.amount,
        record.fee,
        0,
    );
    tx.assign_to_state_id(record.to_state_id);
    Ok(StateExecutor::new(tree).replay_create2_transfer(tx, pub_key_id, token_id)?)
}

/// Token of the first sender, or of the fee receiver for an empty
/// commitment. Zero when neither leaf exists, which replay then rejects.
fn commitment_token<T: StateTree + ?Sized>(
    tree: &T,
    first: Option<&CompactTx>,
    fee_receiver: StateId,
) -> anyhow::Result<TokenId> {
    let sender = match first {
        Some(record) => tree.leaf(record.from_state_id)?,
        None => None,
    };
    let state = match sender {
        Some(state) => Some(state),
        None => tree.leaf(fee_receiver)?,
    };
    Ok(state.map_or(0, |state| state.token_id))
}
