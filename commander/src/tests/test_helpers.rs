//! Shared fixtures for the scenario tests.

use std::{collections::HashMap, env, str::FromStr, sync::Arc};

use anyhow::{Result, anyhow, bail};
use crypto::{BlsPublicKey, BlsSecretKey, Domain};
use slog::{Level, Logger, o};
use tempfile::TempDir;

use crate::{
    builder::RollupContext,
    config::RollupConfig,
    disputer::{SignatureDispute, TransitionDispute},
    logging,
    mempool::Mempool,
    merkle::CommitmentTree,
    state::{
        Address, Amount, BatchId, Hash, PubKeyId, StateId, TokenId,
        account::UserState,
        batch::{BatchType, RemoteBatch},
        commitment::Commitment,
        transaction::{Transaction, TxType},
        tree::{MemoryStateTree, StateTree},
    },
    storage::CommanderStore,
    traits::{AccountStorage, ChainClient, TxStorage},
};

pub const FEE_RECEIVER: StateId = 0;
pub const TOKEN: TokenId = 0;
pub const ACCOUNT_TREE_ROOT: Hash = [7; 32];
pub const OWN_ACCOUNT: Address = [1; 20];
pub const FOREIGN_ACCOUNT: Address = [2; 20];
pub const TREE_DEPTH: u8 = 16;

/// Creates a logger for scenario tests, respecting `RUST_LOG`.
///
/// Quiet unless `RUST_LOG` asks for output:
/// RUST_LOG=debug cargo test -p commander tests:: -- --nocapture
pub fn create_test_logger() -> Logger {
    let Some(level) = env::var("RUST_LOG")
        .ok()
        .and_then(|value| Level::from_str(&value).ok())
    else {
        return Logger::root(slog::Discard, o!());
    };

    logging::create_logger(level)
}

pub fn domain() -> Domain {
    Domain([42; 32])
}

/// Key of the genesis account at `pub_key_id`; genesis accounts use their
/// state id as public key id.
pub fn secret_key(pub_key_id: PubKeyId) -> BlsSecretKey {
    let mut seed = [0xaa; 32];
    seed[..4].copy_from_slice(&pub_key_id.to_be_bytes());
    BlsSecretKey::from_seed(&seed).unwrap()
}

pub fn transfer(from: StateId, to: StateId, amount: Amount, fee: Amount, nonce: u64) -> Transaction {
    Transaction::transfer(from, to, amount, fee, nonce).sign(&secret_key(from), &domain())
}

pub fn create2transfer(
    from: StateId,
    to_public_key: BlsPublicKey,
    amount: Amount,
    fee: Amount,
    nonce: u64,
) -> Transaction {
    Transaction::create2transfer(from, to_public_key, amount, fee, nonce)
        .sign(&secret_key(from), &domain())
}

/// Fee receiver with a zero balance at state 0, then one account per
/// balance at states `1..`.
pub fn genesis_tree(balances: &[Amount]) -> MemoryStateTree {
    let mut tree = MemoryStateTree::new(TREE_DEPTH).unwrap();
    tree.set_leaf(FEE_RECEIVER, &UserState::new(0, TOKEN, 0, 0))
        .unwrap();
    for (index, balance) in balances.iter().enumerate() {
        let state_id = index as StateId + 1;
        tree.set_leaf(state_id, &UserState::new(state_id, TOKEN, *balance, 0))
            .unwrap();
    }
    tree
}

/// Store with the public keys of the fee receiver and `accounts` genesis
/// accounts registered.
pub fn temp_store(accounts: usize) -> (TempDir, CommanderStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CommanderStore::open(dir.path().join("commander.redb")).unwrap();
    for pub_key_id in 0..=accounts as PubKeyId {
        store
            .add_account(pub_key_id, &secret_key(pub_key_id).public_key())
            .unwrap();
    }
    (dir, store)
}

/// Stores the transactions and pools them against the tree's nonces.
pub fn mempool_with<T: StateTree>(
    tree: &T,
    store: &CommanderStore,
    txs: &[Transaction],
) -> Mempool {
    let mut mempool = Mempool::new();
    for tx in txs {
        store.add_transaction(tx).unwrap();
        let nonce = tree.leaf(tx.from_state_id).unwrap().unwrap().nonce;
        mempool.add_or_replace(Arc::new(tx.clone()), nonce).unwrap();
    }
    mempool
}

pub fn test_config(min_txs: usize, max_txs: usize) -> RollupConfig {
    RollupConfig {
        min_txs_per_commitment: min_txs,
        max_txs_per_commitment: max_txs,
        state_tree_depth: TREE_DEPTH,
        ..RollupConfig::default()
    }
}

/// One commander's view of the world: state, storage and chain access.
pub struct Node {
    _dir: TempDir,
    pub store: CommanderStore,
    pub tree: MemoryStateTree,
    pub client: MockChainClient,
    pub config: RollupConfig,
    pub logger: Logger,
}

impl Node {
    pub fn new(balances: &[Amount], config: RollupConfig, account: Address) -> Self {
        let (dir, store) = temp_store(balances.len());
        Self {
            _dir: dir,
            store,
            tree: genesis_tree(balances),
            client: MockChainClient::new(account, balances.len()),
            config,
            logger: create_test_logger(),
        }
    }

    pub fn context(
        &mut self,
        tx_type: TxType,
    ) -> RollupContext<'_, MemoryStateTree, CommanderStore, MockChainClient> {
        RollupContext::new(
            &self.config,
            &mut self.tree,
            &self.store,
            &mut self.client,
            tx_type,
            self.logger.clone(),
        )
    }

    pub fn balance(&self, state_id: StateId) -> Amount {
        self.tree.leaf(state_id).unwrap().unwrap().balance
    }
}

/// In-memory stand-in for the rollup contracts.
///
/// Submitted batches are kept as the chain would report them, with the
/// batch hash computed over the commitment leaves.
pub struct MockChainClient {
    account: Address,
    domain: Domain,
    batches: Vec<RemoteBatch>,
    senders: HashMap<Hash, Address>,
    accounts: Vec<(PubKeyId, BlsPublicKey)>,
    chain_txs: u64,
    pub fail_submissions: bool,
    pub transition_disputes: Vec<TransitionDispute>,
    pub signature_disputes: Vec<SignatureDispute>,
}

impl MockChainClient {
    /// Client whose account registry holds the fee receiver and `accounts`
    /// genesis keys.
    pub fn new(account: Address, accounts: usize) -> Self {
        Self {
            account,
            domain: domain(),
            batches: Vec::new(),
            senders: HashMap::new(),
            accounts: (0..=accounts as PubKeyId)
                .map(|id| (id, secret_key(id).public_key()))
                .collect(),
            chain_txs: 0,
            fail_submissions: false,
            transition_disputes: Vec::new(),
            signature_disputes: Vec::new(),
        }
    }

    fn next_chain_tx(&mut self) -> Hash {
        self.chain_txs += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.account);
        hasher.update(&self.chain_txs.to_be_bytes());
        let hash: Hash = hasher.finalize().into();
        self.senders.insert(hash, self.account);
        hash
    }

    pub fn submitted(&self) -> &[RemoteBatch] {
        &self.batches
    }

    pub fn batch(&self, id: BatchId) -> RemoteBatch {
        self.batches
            .iter()
            .find(|batch| batch.id == id)
            .cloned()
            .unwrap()
    }

    /// Makes a batch submitted through another client known to this one.
    pub fn observe(&mut self, remote: &RemoteBatch, sender: Address) {
        self.senders.insert(remote.transaction_hash, sender);
        self.batches.retain(|batch| batch.id != remote.id);
        self.batches.push(remote.clone());
        self.batches.sort_by_key(|batch| batch.id);
    }
}

/// Chain record of a batch, with its hash computed over `commitments`.
pub fn remote_batch(
    id: BatchId,
    batch_type: BatchType,
    transaction_hash: Hash,
    commitments: Vec<Commitment>,
) -> RemoteBatch {
    let hash = CommitmentTree::from_commitments(&commitments, &ACCOUNT_TREE_ROOT)
        .unwrap()
        .root();
    RemoteBatch {
        id,
        batch_type,
        transaction_hash,
        hash,
        finalisation_block: 100 + id,
        account_tree_root: ACCOUNT_TREE_ROOT,
        commitments,
    }
}

impl ChainClient for MockChainClient {
    fn domain(&self) -> Result<Domain> {
        Ok(self.domain)
    }

    fn account(&self) -> Address {
        self.account
    }

    fn submit_batch(
        &mut self,
        batch_id: BatchId,
        batch_type: BatchType,
        commitments: &[Commitment],
    ) -> Result<Hash> {
        if self.fail_submissions {
            bail!("submission rejected by mock chain");
        }
        let transaction_hash = self.next_chain_tx();
        let remote = remote_batch(batch_id, batch_type, transaction_hash, commitments.to_vec());
        self.batches.push(remote);
        Ok(transaction_hash)
    }

    fn transaction_sender(&self, tx_hash: &Hash) -> Result<Address> {
        self.senders
            .get(tx_hash)
            .copied()
            .ok_or_else(|| anyhow!("unknown chain transaction {}", hex::encode(tx_hash)))
    }

    fn register_account(&mut self, public_key: &BlsPublicKey) -> Result<PubKeyId> {
        let id = self.accounts.len() as PubKeyId;
        self.accounts.push((id, *public_key));
        Ok(id)
    }

    fn registered_accounts(&self, from: PubKeyId) -> Result<Vec<(PubKeyId, BlsPublicKey)>> {
        Ok(self
            .accounts
            .iter()
            .filter(|(id, _)| *id >= from)
            .copied()
            .collect())
    }

    fn remote_batches(&self, from: BatchId) -> Result<Vec<RemoteBatch>> {
        Ok(self
            .batches
            .iter()
            .filter(|batch| batch.id >= from)
            .cloned()
            .collect())
    }

    fn dispute_transition(&mut self, dispute: &TransitionDispute) -> Result<Hash> {
        self.transition_disputes.push(dispute.clone());
        Ok(self.next_chain_tx())
    }

    fn dispute_signature(&mut self, dispute: &SignatureDispute) -> Result<Hash> {
        self.signature_disputes.push(dispute.clone());
        Ok(self.next_chain_tx())
    }
}
