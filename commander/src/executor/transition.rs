use crate::state::{Amount, TokenId, account::UserState, transaction::Transaction};

use super::error::TxError;

pub(super) fn validate_token_id(state: &UserState, token_id: TokenId) -> Result<(), TxError> {
    if state.token_id != token_id {
        return Err(TxError::InvalidTokenId {
            expected: token_id,
            actual: state.token_id,
        });
    }
    Ok(())
}

pub(super) fn validate_nonce(sender: &UserState, nonce: u64) -> Result<(), TxError> {
    if nonce > sender.nonce {
        return Err(TxError::NonceTooHigh {
            expected: sender.nonce,
            actual: nonce,
        });
    }
    if nonce < sender.nonce {
        return Err(TxError::NonceTooLow {
            expected: sender.nonce,
            actual: nonce,
        });
    }
    Ok(())
}

/// Sender leaf after paying `amount + fee`.
pub(super) fn debit(sender: &UserState, tx: &Transaction) -> Result<UserState, TxError> {
    if tx.amount == 0 {
        return Err(TxError::InvalidAmount(tx.amount));
    }
    let required = tx.total().ok_or(TxError::InvalidAmount(tx.amount))?;
    if sender.balance < required {
        return Err(TxError::BalanceTooLow {
            balance: sender.balance,
            required,
        });
    }
    Ok(UserState {
        balance: sender.balance - required,
        nonce: sender.nonce + 1,
        ..*sender
    })
}

pub(super) fn credit(receiver: &UserState, amount: Amount) -> Result<UserState, TxError> {
    let balance = receiver
        .balance
        .checked_add(amount)
        .ok_or(TxError::InvalidAmount(amount))?;
    Ok(UserState {
        balance,
        ..*receiver
    })
}
