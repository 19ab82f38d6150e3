// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use finality_types::{BlockNum, FinalityDigest, FinalityLeaf};

/// Append-only Merkle accumulator over finality leaves, carried from block to
/// block alongside `FinalityCore` so each block can prove inclusion of its
/// own leaf without replaying the whole chain (§4.6 `valid_t`'s
/// `validation_tree`). Mirrors the shape of a Merkle mountain range: each bit
/// set in `node_count` names one complete subtree whose root lives in
/// `active_nodes` at that position.
#[derive(Clone, Debug, Default)]
pub struct IncrementalMerkleTree {
    node_count: u64,
    active_nodes: Vec<FinalityDigest>,
}

impl IncrementalMerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Appends one leaf digest, merging completed subtrees bottom-up, and
    /// returns the new root.
    pub fn append(&mut self, leaf: FinalityDigest) -> FinalityDigest {
        let mut carry = leaf;
        let mut level = 0usize;
        let mut index = self.node_count;
        while index & 1 == 1 {
            let left = self.active_nodes[level];
            carry = FinalityDigest::of(&(left, carry));
            index >>= 1;
            level += 1;
        }
        if level < self.active_nodes.len() {
            self.active_nodes[level] = carry;
        } else {
            self.active_nodes.push(carry);
        }
        self.node_count += 1;
        self.root()
    }

    /// Combines the completed-subtree roots right-to-left into one root,
    /// matching the canonical MMR-bagging order. Empty tree digests to the
    /// default `FinalityDigest`.
    pub fn root(&self) -> FinalityDigest {
        if self.node_count == 0 {
            return FinalityDigest::default();
        }
        let mut bits: Vec<usize> = (0..self.active_nodes.len())
            .filter(|level| (self.node_count >> level) & 1 == 1)
            .collect();
        bits.sort_unstable_by(|a, b| b.cmp(a));
        let mut iter = bits.into_iter();
        let mut acc = self.active_nodes[iter.next().expect("node_count != 0 has a set bit")];
        for level in iter {
            acc = FinalityDigest::of(&(self.active_nodes[level], acc));
        }
        acc
    }
}

/// The finality-validation state carried alongside each block's `BlockState`:
/// an incremental Merkle tree of finality leaves plus a rolling window of
/// roots for the still-reversible range, so any block can hand out a
/// validation root for any not-yet-pruned ancestor (§4.6 `valid_t`).
#[derive(Clone, Debug)]
pub struct ValidTree {
    validation_tree: IncrementalMerkleTree,
    /// `validation_mroots[i]` is the tree root after appending the leaf for
    /// block `last_final_block_num + i`, oldest first.
    validation_mroots: Vec<FinalityDigest>,
    last_final_block_num: BlockNum,
}

impl ValidTree {
    pub fn new_genesis() -> Self {
        Self {
            validation_tree: IncrementalMerkleTree::new(),
            validation_mroots: Vec::new(),
            last_final_block_num: 0,
        }
    }

    /// Appends `leaf`'s digest and trims the window to the range still
    /// covered by `last_final_block_num` (§4.6 `new_valid`: entries below the
    /// new last-final block number are no longer reachable by
    /// `get_validation_mroot` and are dropped).
    pub fn extend(&self, leaf: FinalityLeaf, last_final_block_num: BlockNum) -> Self {
        let mut tree = self.validation_tree.clone();
        let root = tree.append(leaf.digest());

        let mut mroots = self.validation_mroots.clone();
        mroots.push(root);

        let drop_count = last_final_block_num.saturating_sub(self.last_final_block_num) as usize;
        let drop_count = drop_count.min(mroots.len().saturating_sub(1));
        mroots.drain(0..drop_count);

        Self {
            validation_tree: tree,
            validation_mroots: mroots,
            last_final_block_num,
        }
    }

    /// The validation root as of `target_block_num`, if it is still within
    /// the retained window `[last_final_block_num, last_final_block_num +
    /// validation_mroots.len())`.
    pub fn get_validation_mroot(&self, target_block_num: BlockNum) -> Option<FinalityDigest> {
        if target_block_num < self.last_final_block_num {
            return None;
        }
        let offset = (target_block_num - self.last_final_block_num) as usize;
        self.validation_mroots.get(offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(block_num: BlockNum) -> FinalityLeaf {
        FinalityLeaf {
            major_version: 1,
            minor_version: 0,
            block_num,
            timestamp: 1000 + block_num as u64,
            parent_timestamp: 1000 + block_num as u64 - 1,
            finality_digest: FinalityDigest::of(&block_num),
            action_mroot: FinalityDigest::default(),
        }
    }

    #[test]
    fn empty_tree_has_default_root() {
        let tree = IncrementalMerkleTree::new();
        assert_eq!(tree.root(), FinalityDigest::default());
    }

    #[test]
    fn single_append_root_is_the_leaf_itself() {
        let mut tree = IncrementalMerkleTree::new();
        let digest = FinalityDigest::of(&"leaf");
        let root = tree.append(digest);
        assert_eq!(root, digest);
    }

    #[test]
    fn root_changes_deterministically_as_leaves_are_appended() {
        let mut tree = IncrementalMerkleTree::new();
        let r1 = tree.append(FinalityDigest::of(&1u32));
        let r2 = tree.append(FinalityDigest::of(&2u32));
        let r3 = tree.append(FinalityDigest::of(&3u32));
        assert_ne!(r1, r2);
        assert_ne!(r2, r3);

        let mut replay = IncrementalMerkleTree::new();
        replay.append(FinalityDigest::of(&1u32));
        replay.append(FinalityDigest::of(&2u32));
        let replayed = replay.append(FinalityDigest::of(&3u32));
        assert_eq!(replayed, r3);
    }

    #[test]
    fn extend_accumulates_leaves_across_blocks() {
        let genesis = ValidTree::new_genesis();
        let after_10 = genesis.extend(leaf(10), 10);
        let after_11 = after_10.extend(leaf(11), 10);
        assert_eq!(after_11.get_validation_mroot(10), after_10.get_validation_mroot(10));
        assert!(after_11.get_validation_mroot(11).is_some());
        assert_ne!(
            after_11.get_validation_mroot(10),
            after_11.get_validation_mroot(11)
        );
    }

    #[test]
    fn advancing_last_final_prunes_the_window() {
        let genesis = ValidTree::new_genesis();
        let t = genesis.extend(leaf(10), 10);
        let t = t.extend(leaf(11), 10);
        let t = t.extend(leaf(12), 12);
        assert!(t.get_validation_mroot(10).is_none());
        assert!(t.get_validation_mroot(12).is_some());
    }
}
