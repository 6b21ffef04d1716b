//! Commitment building and batch assembly against a real store and tree.

use std::sync::{Arc, atomic::AtomicBool};

use super::test_helpers::*;
use crate::{
    builder::BuildError,
    config::RollupConfig,
    encoder::{self, CompactTx},
    executor::TxError,
    state::{
        account::UserState,
        commitment::CommitmentId,
        transaction::TxType,
        tree::StateTree,
    },
    traits::{AccountStorage, BatchStorage, TxStorage},
};

#[test]
fn test_happy_path_single_commitment() {
    let mut node = Node::new(&[1_000, 1_000, 1_000], test_config(1, 6), OWN_ACCOUNT);
    let txs = [
        transfer(1, 2, 100, 10, 0),
        transfer(2, 3, 50, 5, 0),
        transfer(3, 1, 20, 2, 0),
    ];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);
    let initial_root = node.tree.root();

    let commitments = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 1)
        .unwrap();

    assert_eq!(commitments.len(), 1);
    let built = &commitments[0];
    assert_eq!(built.commitment.id, CommitmentId::new(1, 0));
    assert_eq!(built.combined_fee, 17);
    assert_eq!(
        encoder::tx_count(TxType::Transfer, &built.commitment.serialized_txs).unwrap(),
        3
    );
    // highest fee first
    let order: Vec<_> = built.txs.iter().map(|applied| applied.tx.hash).collect();
    assert_eq!(order, vec![txs[0].hash, txs[1].hash, txs[2].hash]);

    assert_ne!(node.tree.root(), initial_root);
    assert_eq!(built.commitment.post_state_root, node.tree.root());
    assert_eq!(node.balance(FEE_RECEIVER), 17);
    assert_eq!(node.balance(1), 1_000 - 110 + 20);
    assert_eq!(node.balance(2), 1_000 + 100 - 55);
    assert_eq!(node.balance(3), 1_000 + 50 - 22);
    assert!(mempool.is_empty());

    let messages: Vec<Vec<u8>> = txs.iter().map(encoder::encode_for_signing).collect();
    let public_keys: Vec<_> = (1..=3).map(|id| secret_key(id).public_key()).collect();
    assert!(
        built
            .commitment
            .combined_signature
            .verify_aggregated(&messages, &public_keys, &domain())
            .unwrap()
    );
}

#[test]
fn test_shortfall_reverts_tree_and_mempool() {
    let mut node = Node::new(
        &[1_000, 1_000, 1_000, 5, 5, 5],
        test_config(4, 6),
        OWN_ACCOUNT,
    );
    let txs = [
        transfer(1, 2, 100, 1, 0),
        transfer(2, 3, 100, 1, 0),
        transfer(3, 1, 100, 1, 0),
        transfer(4, 1, 100, 9, 0),
        transfer(5, 1, 100, 9, 0),
        transfer(6, 1, 100, 9, 0),
    ];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);
    let initial_root = node.tree.root();

    let mut context = node.context(TxType::Transfer);
    let result = context.create_commitments(&mut mempool, 1);
    let failed = context.take_failed_txs();

    assert!(matches!(
        result,
        Err(BuildError::NotEnoughCommitments { built: 0, required: 1 })
    ));
    assert_eq!(node.tree.root(), initial_root);
    assert_eq!(mempool.len(), 6);

    let mut failed_senders: Vec<_> = failed.iter().map(|tx| tx.from_state_id).collect();
    failed_senders.sort_unstable();
    assert_eq!(failed_senders, vec![4, 5, 6]);
    for failure in &failed {
        assert!(matches!(failure.error, TxError::BalanceTooLow { balance: 5, .. }));
        let stored = node.store.transaction(&failure.tx_hash).unwrap().unwrap();
        assert!(stored.error_message.is_some());
    }

    // dropping the failures and lowering the minimum lets the valid ones through
    assert_eq!(mempool.remove_failed_txs(&failed), 3);
    node.config.min_txs_per_commitment = 3;
    let commitments = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 1)
        .unwrap();
    assert_eq!(commitments.len(), 1);
    assert_eq!(commitments[0].txs.len(), 3);
}

#[test]
fn test_commitments_respect_quota() {
    let mut node = Node::new(&[1_000; 6], test_config(1, 2), OWN_ACCOUNT);
    let txs: Vec<_> = (1..=5)
        .map(|from| transfer(from, 6, 10, 6 - from as u128, 0))
        .collect();
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);

    let commitments = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 7)
        .unwrap();

    let sizes: Vec<_> = commitments.iter().map(|built| built.txs.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    for (index, built) in commitments.iter().enumerate() {
        assert_eq!(built.commitment.id, CommitmentId::new(7, index as u8));
    }
    assert_ne!(
        commitments[0].commitment.post_state_root,
        commitments[1].commitment.post_state_root
    );
    assert_eq!(commitments[2].commitment.post_state_root, node.tree.root());
    assert_eq!(node.balance(6), 1_000 + 50);
}

#[test]
fn test_sender_chain_in_one_commitment() {
    let mut node = Node::new(&[1_000, 1_000, 1_000], test_config(1, 6), OWN_ACCOUNT);
    let txs = [
        transfer(1, 3, 10, 1, 0),
        transfer(1, 3, 10, 1, 1),
        transfer(1, 3, 10, 1, 2),
        transfer(2, 3, 10, 5, 0),
    ];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);

    let commitments = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 1)
        .unwrap();

    let nonces: Vec<_> = commitments[0]
        .txs
        .iter()
        .map(|applied| (applied.tx.from_state_id, applied.tx.nonce))
        .collect();
    assert_eq!(nonces, vec![(2, 0), (1, 0), (1, 1), (1, 2)]);
    assert_eq!(node.tree.leaf(1).unwrap().unwrap().nonce, 3);
}

#[test]
fn test_not_enough_commitments_rolls_back_built_ones() {
    let config = RollupConfig {
        min_commitments_per_batch: 2,
        ..test_config(2, 2)
    };
    let mut node = Node::new(&[1_000, 1_000, 1_000, 5], config, OWN_ACCOUNT);
    let txs = [
        transfer(1, 2, 10, 4, 0),
        transfer(2, 3, 10, 3, 0),
        transfer(3, 1, 10, 2, 0),
        transfer(4, 1, 100, 1, 0),
    ];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);
    let initial_root = node.tree.root();

    let mut context = node.context(TxType::Transfer);
    let result = context.create_commitments(&mut mempool, 1);
    assert_eq!(context.failed_txs().len(), 1);

    assert!(matches!(
        result,
        Err(BuildError::NotEnoughCommitments { built: 1, required: 2 })
    ));
    assert_eq!(node.tree.root(), initial_root);
    assert_eq!(mempool.len(), 4);
    assert_eq!(node.balance(FEE_RECEIVER), 0);
}

#[test]
fn test_cancelled_before_first_commitment() {
    let mut node = Node::new(&[1_000, 1_000], test_config(1, 6), OWN_ACCOUNT);
    let mut mempool = mempool_with(&node.tree, &node.store, &[transfer(1, 2, 10, 1, 0)]);
    let initial_root = node.tree.root();

    let result = node
        .context(TxType::Transfer)
        .with_cancellation(Arc::new(AtomicBool::new(true)))
        .create_commitments(&mut mempool, 1);

    assert!(matches!(result, Err(BuildError::Cancelled)));
    assert!(result.unwrap_err().is_recoverable());
    assert_eq!(node.tree.root(), initial_root);
    assert_eq!(mempool.len(), 1);
}

#[test]
fn test_submit_batch_persists_everything() {
    let mut node = Node::new(&[1_000, 1_000], test_config(1, 32), OWN_ACCOUNT);
    let txs = [transfer(1, 2, 100, 10, 0), transfer(2, 1, 50, 5, 0)];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);
    let initial_root = node.tree.root();

    let submitted = node
        .context(TxType::Transfer)
        .create_and_submit_batch(&mut mempool)
        .unwrap();

    assert_eq!(submitted.batch.id, 1);
    assert_eq!(submitted.batch.prev_state_root, initial_root);
    assert!(!submitted.batch.is_finalised());
    assert_eq!(node.store.batch(1).unwrap().unwrap(), submitted.batch);

    let commitments = node.store.commitments(1).unwrap();
    assert_eq!(commitments.len(), 1);
    assert_eq!(commitments[0].included_in_batch, Some(1));
    assert_eq!(commitments[0].post_state_root, node.tree.root());
    for tx in &txs {
        let stored = node.store.transaction(&tx.hash).unwrap().unwrap();
        assert_eq!(stored.commitment_id, Some(CommitmentId::new(1, 0)));
    }
    assert_eq!(node.client.submitted().len(), 1);
    assert_eq!(node.client.submitted()[0].commitments, commitments);
    assert!(mempool.is_empty());

    let again = node
        .context(TxType::Transfer)
        .create_and_submit_batch(&mut mempool);
    assert!(matches!(again, Err(BuildError::NotEnoughTxs)));
}

#[test]
fn test_failed_submission_reverts() {
    let mut node = Node::new(&[1_000, 1_000], test_config(1, 32), OWN_ACCOUNT);
    node.client.fail_submissions = true;
    let mut mempool = mempool_with(&node.tree, &node.store, &[transfer(1, 2, 100, 10, 0)]);
    let initial_root = node.tree.root();

    let result = node
        .context(TxType::Transfer)
        .create_and_submit_batch(&mut mempool);

    assert!(matches!(result, Err(BuildError::Fatal(_))));
    assert_eq!(node.tree.root(), initial_root);
    assert_eq!(mempool.len(), 1);
    assert!(node.store.batch(1).unwrap().is_none());
}

#[test]
fn test_create2transfer_registers_destination() {
    let mut node = Node::new(&[1_000, 1_000], test_config(1, 32), OWN_ACCOUNT);
    let new_key = secret_key(500).public_key();
    let txs = [create2transfer(1, new_key, 100, 10, 0)];
    let mut mempool = mempool_with(&node.tree, &node.store, &txs);

    let commitments = node
        .context(TxType::Create2Transfer)
        .create_commitments(&mut mempool, 1)
        .unwrap();

    let pub_key_id = node.store.pub_key_id(&new_key).unwrap().unwrap();
    assert_eq!(pub_key_id, 3);
    let applied = &commitments[0].txs[0];
    assert_eq!(applied.tx.to_state_id(), Some(3));
    assert_eq!(applied.to_pub_key_id, Some(pub_key_id));
    assert_eq!(
        node.tree.leaf(3).unwrap(),
        Some(UserState::new(pub_key_id, TOKEN, 100, 0))
    );

    let decoded =
        encoder::decode_txs(TxType::Create2Transfer, &commitments[0].commitment.serialized_txs)
            .unwrap();
    assert_eq!(
        decoded,
        vec![CompactTx {
            from_state_id: 1,
            to_state_id: 3,
            to_pub_key_id: Some(3),
            amount: 100,
            fee: 10,
        }]
    );
}

#[test]
fn test_max_delay_lowers_minimums() {
    let config = RollupConfig {
        min_commitments_per_batch: 2,
        ..test_config(5, 32)
    };
    let mut node = Node::new(&[1_000, 1_000], config, OWN_ACCOUNT);

    let fresh = transfer(1, 2, 10, 1, 0);
    let mut mempool = mempool_with(&node.tree, &node.store, &[fresh]);
    let result = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 1);
    assert!(matches!(result, Err(BuildError::NotEnoughTxs)));

    let mut stale = transfer(2, 1, 10, 1, 0);
    stale.receive_time = 0;
    let mut mempool = mempool_with(&node.tree, &node.store, &[stale]);
    let commitments = node
        .context(TxType::Transfer)
        .create_commitments(&mut mempool, 1)
        .unwrap();
    assert_eq!(commitments.len(), 1);
    assert_eq!(commitments[0].txs.len(), 1);
}

#[test]
fn test_wrong_token_fails_transaction() {
    let mut node = Node::new(&[1_000, 1_000], test_config(1, 32), OWN_ACCOUNT);
    node.tree
        .set_leaf(2, &UserState::new(2, TOKEN + 1, 0, 0))
        .unwrap();
    let mut mempool = mempool_with(&node.tree, &node.store, &[transfer(1, 2, 10, 1, 0)]);

    let mut context = node.context(TxType::Transfer);
    let result = context.create_commitments(&mut mempool, 1);

    assert!(matches!(result, Err(BuildError::NotEnoughCommitments { .. })));
    assert!(matches!(
        context.failed_txs()[0].error,
        TxError::InvalidTokenId { expected: TOKEN, actual: 1 }
    ));
}
