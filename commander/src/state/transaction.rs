use crypto::{BlsPublicKey, BlsSecretKey, BlsSignature, Domain};
use rkyv::{Archive, Deserialize, Serialize};

use super::{Amount, Hash, StateId, commitment::CommitmentId, now};
use crate::encoder;

/// Kind of a pooled transaction. Commitments and batches carry exactly one kind.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TxType {
    Transfer,
    Create2Transfer,
}

/// Per-kind fields of a [`Transaction`].
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum TxBody {
    Transfer {
        to_state_id: StateId,
    },
    /// Transfer into a leaf created for `to_public_key`. The state id is
    /// assigned when the transaction is applied, unless already known (replay).
    Create2Transfer {
        to_state_id: Option<StateId>,
        to_public_key: BlsPublicKey,
    },
}

/// [`Transaction`] is a user-signed value movement between two state leaves.
///
/// Transactions are never deleted: inclusion attaches a [`CommitmentId`],
/// rejection attaches an `error_message`, and a reverted batch clears both.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// blake3 of the signing encoding
    pub hash: Hash,
    pub from_state_id: StateId,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: u64,
    pub signature: BlsSignature,
    /// Seconds since the unix epoch at which the API layer accepted it
    pub receive_time: u64,
    pub commitment_id: Option<CommitmentId>,
    pub error_message: Option<String>,
    pub body: TxBody,
}

impl Transaction {
    /// Builds an unsigned transfer. Call [`Transaction::sign`] before pooling it.
    pub fn transfer(from: StateId, to: StateId, amount: Amount, fee: Amount, nonce: u64) -> Self {
        Self::unsigned(from, amount, fee, nonce, TxBody::Transfer { to_state_id: to })
    }

    /// Builds an unsigned create-to-transfer addressed by public key.
    pub fn create2transfer(
        from: StateId,
        to_public_key: BlsPublicKey,
        amount: Amount,
        fee: Amount,
        nonce: u64,
    ) -> Self {
        let body = TxBody::Create2Transfer {
            to_state_id: None,
            to_public_key,
        };
        Self::unsigned(from, amount, fee, nonce, body)
    }

    fn unsigned(from: StateId, amount: Amount, fee: Amount, nonce: u64, body: TxBody) -> Self {
        let mut tx = Self {
            hash: [0; blake3::OUT_LEN],
            from_state_id: from,
            amount,
            fee,
            nonce,
            signature: BlsSignature([0; crypto::bls::SIGNATURE_LENGTH]),
            receive_time: now(),
            commitment_id: None,
            error_message: None,
            body,
        };
        tx.rehash();
        tx
    }

    /// Signs the transaction under `domain` and refreshes its hash.
    pub fn sign(mut self, secret_key: &BlsSecretKey, domain: &Domain) -> Self {
        self.rehash();
        self.signature = secret_key.sign(&encoder::encode_for_signing(&self), domain);
        self
    }

    pub fn rehash(&mut self) {
        self.hash = blake3::hash(&encoder::encode_for_signing(self)).into();
    }

    pub fn tx_type(&self) -> TxType {
        match self.body {
            TxBody::Transfer { .. } => TxType::Transfer,
            TxBody::Create2Transfer { .. } => TxType::Create2Transfer,
        }
    }

    /// Destination leaf, if known.
    pub fn to_state_id(&self) -> Option<StateId> {
        match self.body {
            TxBody::Transfer { to_state_id } => Some(to_state_id),
            TxBody::Create2Transfer { to_state_id, .. } => to_state_id,
        }
    }

    /// Destination public key; `None` for plain transfers.
    pub fn to_public_key(&self) -> Option<&BlsPublicKey> {
        match &self.body {
            TxBody::Transfer { .. } => None,
            TxBody::Create2Transfer { to_public_key, .. } => Some(to_public_key),
        }
    }

    /// Pins the destination of a create-to-transfer. No-op for transfers.
    pub fn assign_to_state_id(&mut self, state_id: StateId) {
        if let TxBody::Create2Transfer { to_state_id, .. } = &mut self.body {
            *to_state_id = Some(state_id);
        }
    }

    /// Amount plus fee, the total debited from the sender.
    pub fn total(&self) -> Option<Amount> {
        self.amount.checked_add(self.fee)
    }

    pub fn is_pending(&self) -> bool {
        self.commitment_id.is_none() && self.error_message.is_none()
    }
}
