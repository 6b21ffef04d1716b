//! State Tree - the account Merkle tree collaborator
//!
//! [`StateTree`] is the interface the executor, builder and syncer drive.
//! [`MemoryStateTree`] implements it as a sparse binary Merkle tree kept
//! in memory, with a journal of leaf writes that makes `revert_to` possible.
//!
//! ## Layout
//!
//! Level 0 holds leaf hashes, level `depth` holds the root. Only nodes that
//! differ from the empty-subtree hash of their level are stored, so a
//! depth-32 tree with a handful of accounts costs a few hundred entries.
//!
//! ## Time Complexity
//!
//! | Operation             | Complexity       |
//! |-----------------------|------------------|
//! | `leaf`                | O(1)             |
//! | `set_leaf`            | O(depth)         |
//! | `witness`             | O(depth)         |
//! | `revert_to`           | O(k * depth)     |
//! | `next_vacant_subtree` | O(leaves)        |
//!
//! Where k = number of journalled writes undone.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};

use super::{
    Hash, StateId,
    account::{StateMerkleProof, UserState, Witness},
};

pub const DEFAULT_STATE_TREE_DEPTH: u8 = 32;

/// Account state tree.
///
/// Calls are synchronous and never interleave: the caller owns the tree for
/// the duration of a commitment attempt or a batch sync.
pub trait StateTree {
    /// Leaf content, `None` when the leaf is vacant.
    fn leaf(&self, state_id: StateId) -> Result<Option<UserState>>;

    /// Writes a leaf and returns its witness.
    fn set_leaf(&mut self, state_id: StateId, state: &UserState) -> Result<Witness>;

    fn root(&self) -> Hash;

    /// Restores the tree to a root it previously had. Reverting to the
    /// current root is a no-op.
    fn revert_to(&mut self, root: &Hash) -> Result<()>;

    /// First state id whose aligned subtree of `2^depth` leaves is entirely vacant.
    fn next_vacant_subtree(&self, depth: u8) -> Result<StateId>;

    fn witness(&self, state_id: StateId) -> Result<Witness>;

    /// Number of levels between the leaves and the root.
    fn depth(&self) -> u8;

    /// Forgets the history older than `root`, which must be the current root
    /// or one the tree can still revert to. Reverts cannot go past it
    /// afterwards.
    fn prune_history(&mut self, root: &Hash) -> Result<()>;

    /// Leaf content together with its witness against the current root.
    fn proof(&self, state_id: StateId) -> Result<StateMerkleProof> {
        Ok(StateMerkleProof {
            state_id,
            user_state: self.leaf(state_id)?,
            witness: self.witness(state_id)?,
        })
    }
}

pub(crate) fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn leaf_hash(state: Option<&UserState>) -> Hash {
    state.map(UserState::leaf_hash).unwrap_or([0; blake3::OUT_LEN])
}

/// Recomputes the root implied by a proof.
pub fn root_from_proof(proof: &StateMerkleProof) -> Hash {
    let mut node = leaf_hash(proof.user_state.as_ref());
    let mut index = proof.state_id as u64;
    for sibling in &proof.witness {
        node = if index & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        index >>= 1;
    }
    node
}

struct JournalEntry {
    root_before: Hash,
    state_id: StateId,
    previous: Option<UserState>,
}

pub struct MemoryStateTree {
    depth: u8,
    leaves: HashMap<StateId, UserState>,
    /// Non-empty nodes keyed by (level, index)
    nodes: HashMap<(u8, u64), Hash>,
    /// Hash of an empty subtree rooted at each level
    zero_hashes: Vec<Hash>,
    journal: Vec<JournalEntry>,
}

impl MemoryStateTree {
    pub fn new(depth: u8) -> Result<Self> {
        if depth == 0 || depth > DEFAULT_STATE_TREE_DEPTH {
            bail!("state tree depth must be within 1..=32, got {depth}");
        }
        let mut zero_hashes = Vec::with_capacity(depth as usize + 1);
        zero_hashes.push([0; blake3::OUT_LEN]);
        for level in 0..depth as usize {
            let below = zero_hashes[level];
            zero_hashes.push(hash_pair(&below, &below));
        }
        Ok(Self {
            depth,
            leaves: HashMap::new(),
            nodes: HashMap::new(),
            zero_hashes,
            journal: Vec::new(),
        })
    }

    /// Number of occupied leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of journalled leaf writes that can still be reverted.
    pub fn history_len(&self) -> usize {
        self.journal.len()
    }

    fn node(&self, level: u8, index: u64) -> Hash {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.zero_hashes[level as usize])
    }

    fn store_node(&mut self, level: u8, index: u64, hash: Hash) {
        if hash == self.zero_hashes[level as usize] {
            self.nodes.remove(&(level, index));
        } else {
            self.nodes.insert((level, index), hash);
        }
    }

    fn check_bounds(&self, state_id: StateId) -> Result<()> {
        if (state_id as u64) >> self.depth != 0 {
            bail!(
                "state id {state_id} out of range for a tree of depth {}",
                self.depth
            );
        }
        Ok(())
    }

    fn write_leaf(&mut self, state_id: StateId, state: Option<UserState>) {
        match state {
            Some(state) => self.leaves.insert(state_id, state),
            None => self.leaves.remove(&state_id),
        };

        let mut index = state_id as u64;
        let mut node = leaf_hash(state.as_ref());
        for level in 0..self.depth {
            self.store_node(level, index, node);
            let sibling = self.node(level, index ^ 1);
            node = if index & 1 == 0 {
                hash_pair(&node, &sibling)
            } else {
                hash_pair(&sibling, &node)
            };
            index >>= 1;
        }
        self.store_node(self.depth, 0, node);
    }
}

impl StateTree for MemoryStateTree {
    fn leaf(&self, state_id: StateId) -> Result<Option<UserState>> {
        self.check_bounds(state_id)?;
        Ok(self.leaves.get(&state_id).copied())
    }

    fn set_leaf(&mut self, state_id: StateId, state: &UserState) -> Result<Witness> {
        self.check_bounds(state_id)?;
        let entry = JournalEntry {
            root_before: self.root(),
            state_id,
            previous: self.leaves.get(&state_id).copied(),
        };
        self.journal.push(entry);
        self.write_leaf(state_id, Some(*state));
        self.witness(state_id)
    }

    fn root(&self) -> Hash {
        self.node(self.depth, 0)
    }

    fn revert_to(&mut self, root: &Hash) -> Result<()> {
        if self.root() == *root {
            return Ok(());
        }
        let position = self
            .journal
            .iter()
            .rposition(|entry| entry.root_before == *root)
            .ok_or_else(|| anyhow!("state root {} not found in tree history", hex::encode(root)))?;

        while self.journal.len() > position {
            if let Some(entry) = self.journal.pop() {
                self.write_leaf(entry.state_id, entry.previous);
            }
        }
        Ok(())
    }

    fn depth(&self) -> u8 {
        self.depth
    }

    fn prune_history(&mut self, root: &Hash) -> Result<()> {
        if self.root() == *root {
            self.journal.clear();
            return Ok(());
        }
        let position = self
            .journal
            .iter()
            .rposition(|entry| entry.root_before == *root)
            .ok_or_else(|| anyhow!("state root {} not found in tree history", hex::encode(root)))?;
        self.journal.drain(..position);
        Ok(())
    }

    fn next_vacant_subtree(&self, depth: u8) -> Result<StateId> {
        if depth > self.depth {
            bail!("subtree depth {depth} exceeds tree depth {}", self.depth);
        }
        let empty = self.zero_hashes[depth as usize];
        let candidates = 1u64 << (self.depth - depth);
        (0..candidates)
            .find(|&index| self.node(depth, index) == empty)
            .map(|index| (index << depth) as StateId)
            .ok_or_else(|| anyhow!("no vacant subtree of depth {depth} left"))
    }

    fn witness(&self, state_id: StateId) -> Result<Witness> {
        self.check_bounds(state_id)?;
        let index = state_id as u64;
        Ok((0..self.depth)
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect())
    }
}
