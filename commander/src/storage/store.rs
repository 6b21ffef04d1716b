use std::path::Path;

use anyhow::{Context, Result, bail};
use crypto::BlsPublicKey;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};

use crate::{
    state::{
        BatchId, Hash, PubKeyId,
        batch::Batch,
        commitment::{Commitment, CommitmentId},
        transaction::{Transaction, TxBody},
    },
    storage::config::StorageConfig,
    traits::{AccountStorage, BatchStorage, TxStorage},
};

use super::{
    conversions::{deserialize_from_db, serialize_for_db},
    tables::{ACCOUNTS, BATCHES, COMMITMENTS, PUBLIC_KEYS, TRANSACTIONS},
};

/// redb-backed persistence for transactions, batches, commitments and
/// account public keys.
pub struct CommanderStore {
    db: Database,
}

impl CommanderStore {
    /// Opens a database from a path to the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = if path.as_ref().exists() {
            Database::open(path).context("Failed to open database")?
        } else {
            Database::create(path).context("Failed to create database")?
        };
        let store = Self { db };
        store.init_tables()?;
        Ok(store)
    }

    /// Opens a database from a configuration path.
    pub fn from_config_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config = StorageConfig::from_path(config_path)?;
        Self::open(config.path)
    }

    fn init_tables(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            write_txn
                .open_table(TRANSACTIONS)
                .context("Failed to open transactions table")?;
            write_txn
                .open_table(BATCHES)
                .context("Failed to open batches table")?;
            write_txn
                .open_table(COMMITMENTS)
                .context("Failed to open commitments table")?;
            write_txn
                .open_table(ACCOUNTS)
                .context("Failed to open accounts table")?;
            write_txn
                .open_table(PUBLIC_KEYS)
                .context("Failed to open public keys table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    fn put_blob(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8], value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn.open_table(table).context("Failed to open table")?;
            table.insert(key, value).context("Failed to insert value")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    /// Rewrites the stored transactions with the given hashes in a single
    /// write transaction. Fails without writing anything if one is missing.
    fn update_transactions<F>(&self, hashes: &[Hash], update: F) -> Result<()>
    where
        F: Fn(&mut Transaction),
    {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        rewrite_transactions(&write_txn, hashes, update)?;
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(TRANSACTIONS)?;
        let mut txs = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            txs.push(deserialize_from_db::<Transaction>(value.value())?);
        }
        Ok(txs)
    }
}

impl TxStorage for CommanderStore {
    fn add_transaction(&self, tx: &Transaction) -> Result<()> {
        let bytes = serialize_for_db(tx)?;
        self.put_blob(TRANSACTIONS, &tx.hash, &bytes)
    }

    fn transaction(&self, hash: &Hash) -> Result<Option<Transaction>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(TRANSACTIONS)?;
        match table.get(hash.as_slice())? {
            Some(row) => Ok(Some(deserialize_from_db(row.value())?)),
            None => Ok(None),
        }
    }

    fn get_pending_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        let mut pending: Vec<_> = self
            .all_transactions()?
            .into_iter()
            .filter(Transaction::is_pending)
            .collect();
        pending.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    fn set_transaction_error(&self, hash: &Hash, message: &str) -> Result<()> {
        self.update_transactions(std::slice::from_ref(hash), |tx| {
            tx.error_message = Some(message.to_string());
        })
    }

    fn mark_included(&self, hashes: &[Hash], commitment_id: CommitmentId) -> Result<()> {
        self.update_transactions(hashes, |tx| {
            tx.commitment_id = Some(commitment_id);
            tx.error_message = None;
        })
    }

    fn mark_pending(&self, hashes: &[Hash]) -> Result<()> {
        self.update_transactions(hashes, reset_to_pending)
    }

    fn transaction_hashes_from_batch(&self, batch_id: BatchId) -> Result<Vec<Hash>> {
        Ok(self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.commitment_id.is_some_and(|id| id.batch_id >= batch_id))
            .map(|tx| tx.hash)
            .collect())
    }
}

impl BatchStorage for CommanderStore {
    fn put_batch(&self, batch: &Batch) -> Result<()> {
        let bytes = serialize_for_db(batch)?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(BATCHES)
                .context("Failed to open batches table")?;
            table
                .insert(batch.id, bytes.as_ref())
                .context("Failed to insert batch")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    fn batch(&self, id: BatchId) -> Result<Option<Batch>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(BATCHES)?;
        match table.get(id)? {
            Some(row) => Ok(Some(deserialize_from_db(row.value())?)),
            None => Ok(None),
        }
    }

    fn latest_batch(&self) -> Result<Option<Batch>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(BATCHES)?;
        match table.last()? {
            Some((_, row)) => Ok(Some(deserialize_from_db(row.value())?)),
            None => Ok(None),
        }
    }

    fn batches_from(&self, id: BatchId) -> Result<Vec<Batch>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(BATCHES)?;
        let mut batches = Vec::new();
        for row in table.range(id..)? {
            let (_, value) = row?;
            batches.push(deserialize_from_db::<Batch>(value.value())?);
        }
        Ok(batches)
    }

    fn put_batch_with_commitments(
        &self,
        batch: &Batch,
        commitments: &[Commitment],
        txs: &[Transaction],
    ) -> Result<()> {
        let batch_bytes = serialize_for_db(batch)?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut batches = write_txn
                .open_table(BATCHES)
                .context("Failed to open batches table")?;
            batches
                .insert(batch.id, batch_bytes.as_ref())
                .context("Failed to insert batch")?;

            let mut table = write_txn
                .open_table(COMMITMENTS)
                .context("Failed to open commitments table")?;
            for commitment in commitments {
                let bytes = serialize_for_db(commitment)?;
                table
                    .insert(commitment.id.to_key().as_slice(), bytes.as_ref())
                    .context("Failed to insert commitment")?;
            }

            let mut table = write_txn
                .open_table(TRANSACTIONS)
                .context("Failed to open transactions table")?;
            for tx in txs {
                let bytes = serialize_for_db(tx)?;
                table
                    .insert(tx.hash.as_slice(), bytes.as_ref())
                    .context("Failed to insert transaction")?;
            }
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    fn revert_batches_from(&self, id: BatchId) -> Result<Vec<Hash>> {
        let hashes = self.transaction_hashes_from_batch(id)?;
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        remove_batches_from(&write_txn, id)?;
        rewrite_transactions(&write_txn, &hashes, reset_to_pending)?;
        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        Ok(hashes)
    }

    fn commitments(&self, batch_id: BatchId) -> Result<Vec<Commitment>> {
        let first = CommitmentId::new(batch_id, 0).to_key();
        let last = CommitmentId::new(batch_id, u8::MAX).to_key();
        let read = self.db.begin_read()?;
        let table = read.open_table(COMMITMENTS)?;
        let mut commitments = Vec::new();
        for row in table.range(first.as_slice()..=last.as_slice())? {
            let (_, value) = row?;
            commitments.push(deserialize_from_db::<Commitment>(value.value())?);
        }
        Ok(commitments)
    }
}

impl AccountStorage for CommanderStore {
    fn add_account(&self, pub_key_id: PubKeyId, public_key: &BlsPublicKey) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut accounts = write_txn
                .open_table(ACCOUNTS)
                .context("Failed to open accounts table")?;
            accounts.insert(pub_key_id, public_key.as_bytes().as_slice())?;
            let mut keys = write_txn
                .open_table(PUBLIC_KEYS)
                .context("Failed to open public keys table")?;
            keys.insert(public_key.as_bytes().as_slice(), pub_key_id)?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    fn public_key(&self, pub_key_id: PubKeyId) -> Result<Option<BlsPublicKey>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(ACCOUNTS)?;
        match table.get(pub_key_id)? {
            Some(row) => Ok(Some(BlsPublicKey::from_bytes(row.value())?)),
            None => Ok(None),
        }
    }

    fn pub_key_id(&self, public_key: &BlsPublicKey) -> Result<Option<PubKeyId>> {
        let read = self.db.begin_read()?;
        let table = read.open_table(PUBLIC_KEYS)?;
        Ok(table
            .get(public_key.as_bytes().as_slice())?
            .map(|row| row.value()))
    }
}

fn rewrite_transactions<F>(write_txn: &WriteTransaction, hashes: &[Hash], update: F) -> Result<()>
where
    F: Fn(&mut Transaction),
{
    let mut table = write_txn
        .open_table(TRANSACTIONS)
        .context("Failed to open transactions table")?;
    for hash in hashes {
        let mut tx = match table.get(hash.as_slice())? {
            Some(row) => deserialize_from_db::<Transaction>(row.value())?,
            None => bail!("transaction {} not found", hex::encode(hash)),
        };
        update(&mut tx);
        let bytes = serialize_for_db(&tx)?;
        table.insert(hash.as_slice(), bytes.as_ref())?;
    }
    Ok(())
}

fn reset_to_pending(tx: &mut Transaction) {
    tx.commitment_id = None;
    tx.error_message = None;
    // the destination leaf is reassigned on the next application
    if let TxBody::Create2Transfer { to_state_id, .. } = &mut tx.body {
        *to_state_id = None;
    }
}

/// Removes batches with id `>= id` and their commitments.
fn remove_batches_from(write_txn: &WriteTransaction, id: BatchId) -> Result<()> {
    let mut batches = write_txn
        .open_table(BATCHES)
        .context("Failed to open batches table")?;
    let ids = batches
        .range(id..)?
        .map(|row| row.map(|(key, _)| key.value()))
        .collect::<Result<Vec<_>, _>>()?;
    for id in ids {
        batches.remove(id)?;
    }

    let first_commitment = CommitmentId::new(id, 0).to_key();
    let mut commitments = write_txn
        .open_table(COMMITMENTS)
        .context("Failed to open commitments table")?;
    let keys = commitments
        .range(first_commitment.as_slice()..)?
        .map(|row| row.map(|(key, _)| key.value().to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    for key in keys {
        commitments.remove(key.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crypto::{BlsSecretKey, BlsSignature};
    use tempfile::TempDir;

    use super::*;
    use crate::state::{batch::BatchType, transaction::TxType};

    fn temp_store() -> (TempDir, CommanderStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CommanderStore::open(dir.path().join("commander.redb")).unwrap();
        (dir, store)
    }

    fn tx(from: u32, nonce: u64, receive_time: u64) -> Transaction {
        let mut tx = Transaction::transfer(from, 9, 10, 1, nonce);
        tx.receive_time = receive_time;
        tx
    }

    fn batch(id: BatchId) -> Batch {
        Batch {
            id,
            batch_type: BatchType::Transfer,
            prev_state_root: [id as u8; 32],
            transaction_hash: [0xaa; 32],
            hash: None,
            finalisation_block: None,
            account_tree_root: None,
            submission_time: Some(1),
        }
    }

    fn commitment(batch_id: BatchId, index: u8) -> Commitment {
        Commitment {
            id: CommitmentId::new(batch_id, index),
            tx_type: TxType::Transfer,
            fee_receiver_state_id: 0,
            combined_signature: BlsSignature([0; 48]),
            post_state_root: [index; 32],
            serialized_txs: vec![1, 2, 3],
            included_in_batch: Some(batch_id),
        }
    }

    #[test]
    fn test_transaction_lifecycle() {
        let (_dir, store) = temp_store();
        let a = tx(1, 0, 20);
        let b = tx(2, 0, 10);
        store.add_transaction(&a).unwrap();
        store.add_transaction(&b).unwrap();

        let pending = store.get_pending_transactions(10).unwrap();
        assert_eq!(pending, vec![b.clone(), a.clone()]);
        assert_eq!(store.get_pending_transactions(1).unwrap(), vec![b.clone()]);

        let id = CommitmentId::new(3, 0);
        store.mark_included(&[a.hash], id).unwrap();
        store.set_transaction_error(&b.hash, "balance too low").unwrap();
        assert!(store.get_pending_transactions(10).unwrap().is_empty());
        assert_eq!(store.transaction(&a.hash).unwrap().unwrap().commitment_id, Some(id));
        assert_eq!(store.transaction_hashes_from_batch(3).unwrap(), vec![a.hash]);
        assert!(store.transaction_hashes_from_batch(4).unwrap().is_empty());

        store.mark_pending(&[a.hash, b.hash]).unwrap();
        assert_eq!(store.get_pending_transactions(10).unwrap().len(), 2);
    }

    #[test]
    fn test_update_missing_transaction_fails() {
        let (_dir, store) = temp_store();
        assert!(store.set_transaction_error(&[1; 32], "x").is_err());
    }

    #[test]
    fn test_batches_and_commitments() {
        let (_dir, store) = temp_store();
        assert_eq!(store.next_batch_id().unwrap(), 1);

        for id in 1..=3 {
            store
                .put_batch_with_commitments(&batch(id), &[commitment(id, 0), commitment(id, 1)], &[])
                .unwrap();
        }
        assert_eq!(store.next_batch_id().unwrap(), 4);
        assert_eq!(store.batch(2).unwrap(), Some(batch(2)));
        assert_eq!(store.commitments(2).unwrap(), vec![commitment(2, 0), commitment(2, 1)]);

        assert!(store.revert_batches_from(2).unwrap().is_empty());
        assert_eq!(store.latest_batch().unwrap(), Some(batch(1)));
        assert!(store.batches_from(2).unwrap().is_empty());
        assert!(store.commitments(3).unwrap().is_empty());
        assert_eq!(store.commitments(1).unwrap().len(), 2);
    }

    #[test]
    fn test_batch_lands_with_commitments_and_txs() {
        let (_dir, store) = temp_store();
        let id = CommitmentId::new(1, 0);
        let mut included = tx(1, 0, 5);
        included.commitment_id = Some(id);

        let commitments = [commitment(1, 0), commitment(1, 1)];
        store
            .put_batch_with_commitments(&batch(1), &commitments, &[included.clone()])
            .unwrap();

        assert_eq!(store.latest_batch().unwrap(), Some(batch(1)));
        assert_eq!(store.commitments(1).unwrap().len(), 2);
        assert_eq!(store.transaction(&included.hash).unwrap(), Some(included.clone()));
        assert!(store.get_pending_transactions(10).unwrap().is_empty());
        assert_eq!(store.transaction_hashes_from_batch(1).unwrap(), vec![included.hash]);
    }

    #[test]
    fn test_revert_batches_makes_txs_pending() {
        let (_dir, store) = temp_store();
        let kept = Transaction {
            commitment_id: Some(CommitmentId::new(1, 0)),
            ..tx(1, 0, 1)
        };
        let receiver = BlsSecretKey::from_seed(&[3; 32]).unwrap().public_key();
        let mut c2t = Transaction::create2transfer(2, receiver, 10, 1, 0);
        if let TxBody::Create2Transfer { to_state_id, .. } = &mut c2t.body {
            *to_state_id = Some(40);
        }
        c2t.commitment_id = Some(CommitmentId::new(2, 0));
        store
            .put_batch_with_commitments(&batch(1), &[commitment(1, 0)], &[kept.clone()])
            .unwrap();
        store
            .put_batch_with_commitments(&batch(2), &[commitment(2, 0)], &[c2t.clone()])
            .unwrap();

        let reverted = store.revert_batches_from(2).unwrap();
        assert_eq!(reverted, vec![c2t.hash]);
        assert_eq!(store.latest_batch().unwrap(), Some(batch(1)));
        assert!(store.commitments(2).unwrap().is_empty());
        assert_eq!(store.transaction(&kept.hash).unwrap(), Some(kept));

        let pending = store.get_pending_transactions(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].body, TxBody::Create2Transfer { to_state_id: None, .. }));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let (_dir, store) = temp_store();
        let a = tx(1, 0, 1);
        store.add_transaction(&a).unwrap();
        store.mark_included(&[a.hash], CommitmentId::new(1, 0)).unwrap();

        assert!(store.mark_pending(&[a.hash, [7; 32]]).is_err());
        assert!(store.get_pending_transactions(10).unwrap().is_empty());
    }

    #[test]
    fn test_accounts() {
        let (_dir, store) = temp_store();
        let pk = BlsSecretKey::from_seed(&[8; 32]).unwrap().public_key();
        store.add_account(17, &pk).unwrap();

        assert_eq!(store.public_key(17).unwrap(), Some(pk));
        assert_eq!(store.pub_key_id(&pk).unwrap(), Some(17));
        assert_eq!(store.public_key(18).unwrap(), None);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commander.redb");
        {
            let store = CommanderStore::open(&path).unwrap();
            store.put_batch(&batch(1)).unwrap();
        }
        let store = CommanderStore::open(&path).unwrap();
        assert_eq!(store.latest_batch().unwrap(), Some(batch(1)));
    }

    #[test]
    fn test_from_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("configured.redb");
        let config_path = dir.path().join("commander.toml");
        std::fs::write(
            &config_path,
            format!("[storage]\npath = {:?}\n", db_path.display().to_string()),
        )
        .unwrap();

        let store = CommanderStore::from_config_path(&config_path).unwrap();
        store.put_batch(&batch(1)).unwrap();
        assert!(db_path.exists());
    }
}
