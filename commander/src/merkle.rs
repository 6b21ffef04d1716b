//! Commitment tree of a batch
//!
//! Binary blake3 tree over commitment leaves, padded with zero leaves to the
//! next power of two. The root is the batch hash; paths into it are the
//! inclusion proofs a dispute carries.

use anyhow::{Result, bail};

use crate::state::{Hash, commitment::Commitment, tree::hash_pair};

const ZERO_LEAF: Hash = [0; blake3::OUT_LEN];

#[derive(Debug, Clone)]
pub struct CommitmentTree {
    /// Level 0 holds the padded leaves, the last level holds the root
    levels: Vec<Vec<Hash>>,
    len: usize,
}

impl CommitmentTree {
    pub fn from_leaves(leaves: Vec<Hash>) -> Result<Self> {
        if leaves.is_empty() {
            bail!("commitment tree needs at least one leaf");
        }
        let len = leaves.len();
        let mut level = leaves;
        level.resize(len.next_power_of_two(), ZERO_LEAF);

        let mut levels = vec![level];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next = current
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }
        Ok(Self { levels, len })
    }

    /// Tree over a batch's commitments under the account root the batch
    /// was submitted with.
    pub fn from_commitments(commitments: &[Commitment], account_tree_root: &Hash) -> Result<Self> {
        let leaves = commitments
            .iter()
            .map(|commitment| commitment.leaf_hash(account_tree_root))
            .collect();
        Self::from_leaves(leaves)
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(ZERO_LEAF)
    }

    /// Number of leaves, padding excluded.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sibling hashes from leaf `index` up to the root.
    pub fn witness(&self, index: usize) -> Result<Vec<Hash>> {
        if index >= self.len {
            bail!("commitment {index} out of range, tree has {}", self.len);
        }
        let mut position = index;
        let witness = self.levels[..self.levels.len() - 1]
            .iter()
            .map(|level| {
                let sibling = level[position ^ 1];
                position >>= 1;
                sibling
            })
            .collect();
        Ok(witness)
    }
}

/// Whether `leaf` sits at `index` under `root`.
pub fn verify_inclusion(leaf: &Hash, index: usize, witness: &[Hash], root: &Hash) -> bool {
    let mut node = *leaf;
    let mut position = index;
    for sibling in witness {
        node = if position & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        position >>= 1;
    }
    position == 0 && node == *root
}
