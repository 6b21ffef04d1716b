use anyhow::anyhow;
use crypto::Domain;

use crate::{
    encoder,
    state::{commitment::Commitment, transaction::Transaction, tree::StateTree},
    traits::AccountStorage,
};

use super::error::{DisputableError, SyncResult};

/// Checks the aggregated signature of a replayed commitment against the
/// public keys of its senders. Empty commitments carry no signature to check.
///
/// Undecodable signature bytes and failed verification are both signature
/// disputes, carrying a state proof per sender.
pub fn verify_commitment_signature<T, S>(
    tree: &T,
    storage: &S,
    domain: &Domain,
    commitment: &Commitment,
    txs: &[Transaction],
) -> SyncResult<()>
where
    T: StateTree + ?Sized,
    S: AccountStorage + ?Sized,
{
    if txs.is_empty() {
        return Ok(());
    }

    let mut messages = Vec::with_capacity(txs.len());
    let mut public_keys = Vec::with_capacity(txs.len());
    for tx in txs {
        let sender = tree
            .leaf(tx.from_state_id)?
            .ok_or_else(|| anyhow!("sender state {} vanished after replay", tx.from_state_id))?;
        let public_key = storage
            .public_key(sender.pub_key_id)?
            .ok_or_else(|| anyhow!("public key {} is not registered locally", sender.pub_key_id))?;
        messages.push(encoder::encode_for_signing(tx));
        public_keys.push(public_key);
    }

    let reason = match commitment
        .combined_signature
        .verify_aggregated(&messages, &public_keys, domain)
    {
        Ok(true) => return Ok(()),
        Ok(false) => "aggregated signature does not verify".to_string(),
        Err(error) => format!("aggregated signature unusable: {error}"),
    };

    let proofs = txs
        .iter()
        .map(|tx| tree.proof(tx.from_state_id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Err(DisputableError::signature(reason, proofs).into())
}
