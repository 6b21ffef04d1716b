//! Full rollup loop: ingestion, batch submission, sync and disputes.

use std::sync::atomic::Ordering;

use rtrb::Producer;
use tempfile::TempDir;

use super::test_helpers::*;
use crate::{
    commander::{Commander, RemoteBatchStatus},
    config::RollupConfig,
    state::{
        Amount,
        transaction::{Transaction, TxType},
        tree::{MemoryStateTree, StateTree},
    },
    storage::CommanderStore,
    syncer::{DisputeKind, SyncOutcome},
    traits::{BatchStorage, TxStorage},
};

type TestCommander = Commander<MemoryStateTree, CommanderStore, MockChainClient>;

const BALANCES: [Amount; 2] = [1_000, 1_000];

fn commander(config: RollupConfig, account: [u8; 20]) -> (TempDir, TestCommander, Producer<Transaction>) {
    let (dir, store) = temp_store(BALANCES.len());
    let (commander, producer) = Commander::new(
        config,
        genesis_tree(&BALANCES),
        store,
        MockChainClient::new(account, BALANCES.len()),
        create_test_logger(),
    )
    .unwrap();
    (dir, commander, producer)
}

fn submit(commander: &TestCommander, producer: &mut Producer<Transaction>, tx: Transaction) {
    commander.storage().add_transaction(&tx).unwrap();
    producer.push(tx).unwrap();
}

#[test]
fn test_rollup_iteration_submits_and_finalises() {
    let (_dir, mut commander, mut producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    submit(&commander, &mut producer, transfer(1, 2, 100, 10, 0));
    submit(&commander, &mut producer, transfer(2, 1, 50, 5, 0));

    let submitted = commander.rollup_iteration().unwrap();

    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].batch.id, 1);
    assert_eq!(submitted[0].commitments[0].txs.len(), 2);
    assert!(commander.tx_pool().mempool().is_empty());
    assert!(commander.rollup_iteration().unwrap().is_empty());

    let statuses = commander.sync_remote_batches(1).unwrap();
    assert_eq!(
        statuses,
        vec![RemoteBatchStatus::Synced(SyncOutcome::Finalised)]
    );
    assert!(commander.storage().batch(1).unwrap().unwrap().is_finalised());
    assert_eq!(commander.tree().history_len(), 0);
}

#[test]
fn test_foreign_batch_spends_pooled_nonce() {
    let (_dir, mut commander, mut producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    let stale = transfer(1, 2, 100, 10, 0);
    submit(&commander, &mut producer, stale.clone());
    submit(&commander, &mut producer, transfer(1, 2, 20, 2, 1));
    commander.cancellation_flag().store(true, Ordering::Release);
    assert!(commander.rollup_iteration().unwrap().is_empty());
    assert_eq!(commander.tx_pool().mempool().len(), 2);

    // another proposer gets a different nonce 0 of the same sender on chain first
    let mut proposer = Node::new(&BALANCES, test_config(1, 32), FOREIGN_ACCOUNT);
    let mut mempool = mempool_with(&proposer.tree, &proposer.store, &[transfer(1, 2, 50, 5, 0)]);
    proposer
        .context(TxType::Transfer)
        .create_and_submit_batch(&mut mempool)
        .unwrap();
    commander.client_mut().observe(&proposer.client.batch(1), FOREIGN_ACCOUNT);

    let statuses = commander.sync_remote_batches(1).unwrap();
    assert_eq!(statuses, vec![RemoteBatchStatus::Synced(SyncOutcome::Synced)]);
    assert_eq!(commander.tx_pool().mempool().len(), 1);
    assert_eq!(commander.tree().history_len(), 0);

    commander.cancellation_flag().store(false, Ordering::Release);
    let submitted = commander.rollup_iteration().unwrap();

    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].batch.id, 2);
    assert_eq!(submitted[0].commitments[0].txs[0].tx.nonce, 1);
    assert_eq!(commander.tree().leaf(1).unwrap().unwrap().nonce, 2);
    let stored = commander.storage().transaction(&stale.hash).unwrap().unwrap();
    assert!(stored.error_message.unwrap().contains("nonce too low"));
}

#[test]
fn test_tree_depth_must_match_config() {
    let (_dir, store) = temp_store(BALANCES.len());
    let result = Commander::new(
        test_config(1, 32),
        MemoryStateTree::new(TREE_DEPTH + 1).unwrap(),
        store,
        MockChainClient::new(OWN_ACCOUNT, BALANCES.len()),
        create_test_logger(),
    );

    let error = result.err().unwrap();
    assert!(error.to_string().contains("configuration expects"));
}

#[test]
fn test_cancelled_commander_builds_nothing() {
    let (_dir, mut commander, mut producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    submit(&commander, &mut producer, transfer(1, 2, 100, 10, 0));
    commander.cancellation_flag().store(true, Ordering::Release);

    assert!(commander.rollup_iteration().unwrap().is_empty());
    assert_eq!(commander.tx_pool().mempool().len(), 1);
    assert!(commander.client().submitted().is_empty());
}

#[test]
fn test_failed_transactions_leave_the_pool() {
    let (_dir, mut commander, mut producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    let tx = transfer(1, 2, 5_000, 10, 0);
    submit(&commander, &mut producer, tx.clone());

    assert!(commander.rollup_iteration().unwrap().is_empty());

    assert!(commander.tx_pool().mempool().is_empty());
    assert_eq!(commander.tx_pool().stats().failed, 1);
    let stored = commander.storage().transaction(&tx.hash).unwrap().unwrap();
    assert!(stored.error_message.unwrap().contains("balance too low"));
}

#[test]
fn test_create2transfer_batch_follows_transfer_batch() {
    let (_dir, mut commander, mut producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    submit(&commander, &mut producer, transfer(1, 2, 100, 10, 0));
    let new_key = secret_key(700).public_key();
    submit(&commander, &mut producer, create2transfer(2, new_key, 40, 4, 0));

    let submitted = commander.rollup_iteration().unwrap();

    let kinds: Vec<_> = submitted
        .iter()
        .map(|batch| batch.commitments[0].commitment.tx_type)
        .collect();
    assert_eq!(kinds, vec![TxType::Transfer, TxType::Create2Transfer]);
    let ids: Vec<_> = submitted.iter().map(|batch| batch.batch.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(commander.tree().leaf(3).unwrap().unwrap().balance, 40);
}

#[test]
fn test_commander_disputes_invalid_batch() {
    let mut proposer = Node::new(&BALANCES, test_config(1, 32), FOREIGN_ACCOUNT);
    let mut mempool = mempool_with(&proposer.tree, &proposer.store, &[transfer(1, 2, 100, 10, 0)]);
    proposer
        .context(TxType::Transfer)
        .create_and_submit_batch(&mut mempool)
        .unwrap();
    let honest = proposer.client.batch(1);
    let mut commitments = honest.commitments.clone();
    commitments[0].post_state_root = [9; 32];
    let forged = remote_batch(honest.id, honest.batch_type, honest.transaction_hash, commitments);

    let (_dir, mut commander, _producer) = commander(test_config(1, 32), OWN_ACCOUNT);
    let genesis_root = commander.tree().root();
    commander.client_mut().observe(&forged, FOREIGN_ACCOUNT);

    let statuses = commander.sync_remote_batches(1).unwrap();

    assert_eq!(statuses.len(), 1);
    assert!(matches!(
        statuses[0],
        RemoteBatchStatus::Disputed {
            kind: DisputeKind::Transition,
            ..
        }
    ));
    assert_eq!(commander.client().transition_disputes.len(), 1);
    assert_eq!(commander.tree().root(), genesis_root);
    assert!(commander.storage().batch(1).unwrap().is_none());
}
