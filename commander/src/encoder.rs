//! Commitment payload and signing encodings.
//!
//! Commitments carry transactions in a compact fixed-width form:
//!
//! | Kind            | Layout (big-endian)                                  | Bytes |
//! |-----------------|------------------------------------------------------|-------|
//! | Transfer        | from u32, to u32, amount u16, fee u16                 | 12    |
//! | Create2Transfer | from u32, to u32, to_pub_key_id u32, amount u16, fee u16 | 16 |
//!
//! Amounts and fees use a 16-bit decimal float: the top 4 bits hold a base-10
//! exponent and the low 12 bits a mantissa. Nonces are not part of the
//! payload; a replaying node takes them from the sender leaves.

use thiserror::Error;

use crate::state::{
    Amount, PubKeyId, StateId,
    transaction::{Transaction, TxBody, TxType},
};

pub const TRANSFER_LENGTH: usize = 12;
pub const CREATE2TRANSFER_LENGTH: usize = 16;

const MANTISSA_MAX: u128 = 0xfff;
const EXPONENT_MAX: u32 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("invalid data length {len}, expected a multiple of {record}")]
    InvalidDataLength { len: usize, record: usize },
    #[error("value {0} is not representable as a 16-bit decimal")]
    NotEncodableDecimal(Amount),
    #[error("create2transfer from state {0} is missing its destination state id or public key id")]
    IncompleteCreate2Transfer(StateId),
}

pub type EncodingResult<T> = Result<T, EncodingError>;

pub fn encode_decimal(value: Amount) -> EncodingResult<u16> {
    let mut mantissa = value;
    let mut exponent = 0u32;
    while exponent < EXPONENT_MAX && mantissa != 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    if mantissa > MANTISSA_MAX {
        return Err(EncodingError::NotEncodableDecimal(value));
    }
    Ok(((exponent as u16) << 12) | mantissa as u16)
}

pub fn decode_decimal(encoded: u16) -> Amount {
    let exponent = (encoded >> 12) as u32;
    let mantissa = (encoded & 0x0fff) as Amount;
    mantissa * 10u128.pow(exponent)
}

/// Whether both amount and fee survive the compact encoding unchanged.
pub fn is_encodable(tx: &Transaction) -> bool {
    encode_decimal(tx.amount).is_ok() && encode_decimal(tx.fee).is_ok()
}

/// Record length for a transaction kind.
pub fn record_length(tx_type: TxType) -> usize {
    match tx_type {
        TxType::Transfer => TRANSFER_LENGTH,
        TxType::Create2Transfer => CREATE2TRANSFER_LENGTH,
    }
}

/// One transaction as carried in a commitment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTx {
    pub from_state_id: StateId,
    pub to_state_id: StateId,
    /// Present for create2transfers only
    pub to_pub_key_id: Option<PubKeyId>,
    pub amount: Amount,
    pub fee: Amount,
}

impl CompactTx {
    /// Projects an applied transaction. Create2transfers need their assigned
    /// destination and the public key id of the new leaf.
    pub fn from_transaction(
        tx: &Transaction,
        to_pub_key_id: Option<PubKeyId>,
    ) -> EncodingResult<Self> {
        let incomplete = || EncodingError::IncompleteCreate2Transfer(tx.from_state_id);
        let (to_state_id, to_pub_key_id) = match tx.body {
            TxBody::Transfer { to_state_id } => (to_state_id, None),
            TxBody::Create2Transfer { to_state_id, .. } => (
                to_state_id.ok_or_else(incomplete)?,
                Some(to_pub_key_id.ok_or_else(incomplete)?),
            ),
        };
        Ok(Self {
            from_state_id: tx.from_state_id,
            to_state_id,
            to_pub_key_id,
            amount: tx.amount,
            fee: tx.fee,
        })
    }
}

/// Serializes a commitment payload. Every entry must be of `tx_type`.
pub fn encode_txs(tx_type: TxType, txs: &[CompactTx]) -> EncodingResult<Vec<u8>> {
    let mut out = Vec::with_capacity(txs.len() * record_length(tx_type));
    for tx in txs {
        out.extend_from_slice(&tx.from_state_id.to_be_bytes());
        out.extend_from_slice(&tx.to_state_id.to_be_bytes());
        if tx_type == TxType::Create2Transfer {
            let pub_key_id = tx
                .to_pub_key_id
                .ok_or(EncodingError::IncompleteCreate2Transfer(tx.from_state_id))?;
            out.extend_from_slice(&pub_key_id.to_be_bytes());
        }
        out.extend_from_slice(&encode_decimal(tx.amount)?.to_be_bytes());
        out.extend_from_slice(&encode_decimal(tx.fee)?.to_be_bytes());
    }
    Ok(out)
}

/// Number of records in a payload, or `InvalidDataLength`.
pub fn tx_count(tx_type: TxType, data: &[u8]) -> EncodingResult<usize> {
    let record = record_length(tx_type);
    if data.len() % record != 0 {
        return Err(EncodingError::InvalidDataLength {
            len: data.len(),
            record,
        });
    }
    Ok(data.len() / record)
}

pub fn decode_txs(tx_type: TxType, data: &[u8]) -> EncodingResult<Vec<CompactTx>> {
    tx_count(tx_type, data)?;
    let record = record_length(tx_type);

    let txs = data
        .chunks_exact(record)
        .map(|chunk| {
            let u32_at = |at: usize| {
                u32::from_be_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
            };
            let u16_at = |at: usize| u16::from_be_bytes([chunk[at], chunk[at + 1]]);
            let (to_pub_key_id, values_at) = match tx_type {
                TxType::Transfer => (None, 8),
                TxType::Create2Transfer => (Some(u32_at(8)), 12),
            };
            CompactTx {
                from_state_id: u32_at(0),
                to_state_id: u32_at(4),
                to_pub_key_id,
                amount: decode_decimal(u16_at(values_at)),
                fee: decode_decimal(u16_at(values_at + 2)),
            }
        })
        .collect();
    Ok(txs)
}

/// Message a sender signs, and the preimage of the transaction hash.
pub fn encode_for_signing(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 96 + 8 + 16 + 16);
    match &tx.body {
        TxBody::Transfer { to_state_id } => {
            out.push(0);
            out.extend_from_slice(&tx.from_state_id.to_be_bytes());
            out.extend_from_slice(&to_state_id.to_be_bytes());
        }
        TxBody::Create2Transfer { to_public_key, .. } => {
            out.push(1);
            out.extend_from_slice(&tx.from_state_id.to_be_bytes());
            out.extend_from_slice(to_public_key.as_bytes());
        }
    }
    out.extend_from_slice(&tx.nonce.to_be_bytes());
    out.extend_from_slice(&tx.amount.to_be_bytes());
    out.extend_from_slice(&tx.fee.to_be_bytes());
    out
}
