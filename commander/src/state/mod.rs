use std::time::{SystemTime, UNIX_EPOCH};

pub mod account;
pub mod batch;
pub mod commitment;
pub mod transaction;
pub mod tree;

/// 32-byte blake3 digest used for state roots, transaction and batch hashes.
pub type Hash = [u8; blake3::OUT_LEN];

pub type StateId = u32;
pub type PubKeyId = u32;
pub type TokenId = u64;
pub type BatchId = u64;
pub type Amount = u128;

/// Ethereum-style account address of a batch submitter.
pub type Address = [u8; 20];

/// Seconds since the unix epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
