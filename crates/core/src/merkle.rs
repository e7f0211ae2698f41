//! Lean incremental Merkle tree (LeanIMT).
//!
//! Depth grows with the leaf count. A node without a right sibling is carried
//! up to the next level unhashed, so a tree of one leaf has that leaf as root
//! and depth zero. Internal nodes are `poseidon2(left, right)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poseidon::poseidon2;
use crate::utils::{field_to_hex, serde_field, serde_field_vec};
use crate::Field;

/// Depth the withdrawal circuit is compiled for.
pub const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Tree has no leaves")]
    EmptyTree,

    #[error("Leaf {0} is not in the tree")]
    LeafNotFound(String),

    #[error("Tree depth {0} exceeds the supported maximum of {MAX_TREE_DEPTH}")]
    TooDeep(usize),
}

/// Inclusion proof in LeanIMT form: only existing siblings are listed, and
/// bit `i` of `index` tells whether the path node at step `i` is a right child.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "serde_field")]
    pub root: Field,
    #[serde(with = "serde_field")]
    pub leaf: Field,
    pub index: u64,
    #[serde(with = "serde_field_vec")]
    pub siblings: Vec<Field>,
}

impl MerkleProof {
    pub fn compute_root(&self) -> Field {
        self.siblings
            .iter()
            .enumerate()
            .fold(self.leaf, |node, (level, sibling)| {
                if (self.index >> level) & 1 == 1 {
                    poseidon2(*sibling, node)
                } else {
                    poseidon2(node, *sibling)
                }
            })
    }

    pub fn verify(&self) -> bool {
        self.compute_root() == self.root
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Siblings zero-padded to `len` entries, as circuits expect them.
    pub fn padded_siblings(&self, len: usize) -> Vec<Field> {
        let mut siblings = self.siblings.clone();
        siblings.resize(len.max(siblings.len()), Field::from(0u64));
        siblings
    }
}

/// Root and proof computation over a caller-held leaf list.
pub trait MerkleProofGenerator: Send + Sync {
    fn root(&self, leaves: &[Field]) -> Result<Field, MerkleError>;

    /// Proof for the first occurrence of `leaf`.
    fn generate_proof(&self, leaves: &[Field], leaf: Field) -> Result<MerkleProof, MerkleError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LeanImt;

impl MerkleProofGenerator for LeanImt {
    fn root(&self, leaves: &[Field]) -> Result<Field, MerkleError> {
        LeanImtTree::from_leaves(leaves)?.root()
    }

    fn generate_proof(&self, leaves: &[Field], leaf: Field) -> Result<MerkleProof, MerkleError> {
        LeanImtTree::from_leaves(leaves)?.proof(leaf)
    }
}

/// Fully materialized tree: `levels[0]` are the leaves, the last level is the root.
#[derive(Clone, Debug)]
pub struct LeanImtTree {
    levels: Vec<Vec<Field>>,
}

impl LeanImtTree {
    pub fn from_leaves(leaves: &[Field]) -> Result<Self, MerkleError> {
        let mut levels = vec![leaves.to_vec()];

        loop {
            let current = &levels[levels.len() - 1];
            if current.len() <= 1 {
                break;
            }
            let parents: Vec<Field> = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => poseidon2(pair[0], *right),
                    None => pair[0],
                })
                .collect();
            levels.push(parents);
        }

        let tree = Self { levels };
        if tree.depth() > MAX_TREE_DEPTH {
            return Err(MerkleError::TooDeep(tree.depth()));
        }
        Ok(tree)
    }

    pub fn size(&self) -> usize {
        self.levels[0].len()
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn root(&self) -> Result<Field, MerkleError> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .ok_or(MerkleError::EmptyTree)
    }

    pub fn index_of(&self, leaf: Field) -> Option<usize> {
        self.levels[0].iter().position(|candidate| *candidate == leaf)
    }

    pub fn proof(&self, leaf: Field) -> Result<MerkleProof, MerkleError> {
        let root = self.root()?;
        let mut position = self
            .index_of(leaf)
            .ok_or_else(|| MerkleError::LeafNotFound(field_to_hex(leaf)))?;

        let mut siblings = Vec::with_capacity(self.depth());
        let mut index = 0u64;

        for level in &self.levels[..self.depth()] {
            let is_right = position % 2 == 1;
            let sibling = if is_right {
                level.get(position - 1)
            } else {
                level.get(position + 1)
            };

            // A lone node has no sibling and contributes no path bit.
            if let Some(sibling) = sibling {
                if is_right {
                    index |= 1 << siblings.len();
                }
                siblings.push(*sibling);
            }
            position /= 2;
        }

        Ok(MerkleProof {
            root,
            leaf,
            index,
            siblings,
        })
    }
}
