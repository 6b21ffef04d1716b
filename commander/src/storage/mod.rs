use slog::Logger;

use crate::{state::Hash, traits::TxStorage};

pub mod config;
pub mod conversions;
pub mod store;
pub mod tables;

pub use store::CommanderStore;

/// Stores a transaction's error annotation. Failures are logged and
/// otherwise ignored; the annotation is informational.
pub fn record_tx_error<S: TxStorage + ?Sized>(
    storage: &S,
    logger: &Logger,
    hash: &Hash,
    message: &str,
) {
    if let Err(error) = storage.set_transaction_error(hash, message) {
        slog::warn!(
            logger,
            "Failed to store transaction error";
            "tx_hash" => hex::encode(hash),
            "error" => %error,
        );
    }
}
