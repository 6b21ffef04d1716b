use redb::TableDefinition;

/// Transaction hash -> archived [`Transaction`](crate::state::transaction::Transaction)
pub const TRANSACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("transactions");
/// Batch id -> archived [`Batch`](crate::state::batch::Batch)
pub const BATCHES: TableDefinition<u64, &[u8]> = TableDefinition::new("batches");
/// [`CommitmentId::to_key`](crate::state::commitment::CommitmentId::to_key) -> archived commitment
pub const COMMITMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("commitments");
/// Public key id -> compressed public key
pub const ACCOUNTS: TableDefinition<u32, &[u8]> = TableDefinition::new("accounts");
/// Compressed public key -> public key id
pub const PUBLIC_KEYS: TableDefinition<&[u8], u32> = TableDefinition::new("public_keys");
