// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use finality_types::{BlockId, BlockNum};

use crate::block_state::BlockState;

/// Outcome of adding a block to a fork database (§9 "fork database").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    /// `previous` is not known to the database.
    Failure,
    /// This block id is already present.
    Duplicate,
    /// Added without changing the current head.
    Added,
    /// Added and extended the current head.
    AppendedToHead,
    /// Added, and its chain now has a later root-to-head path than the
    /// previous head (the chain the node should now build/vote on).
    ForkSwitch,
}

/// Minimal interface a fork database must provide for finality bookkeeping
/// to operate over it: ancestry queries plus head/root tracking. The
/// production block-tree storage, pruning policy, and snapshotting are out
/// of scope (§1 Non-goals); `ArenaForkDb` below is a reference
/// implementation suitable for tests and single-process embedding.
pub trait ForkDb {
    fn head(&self) -> Option<Arc<BlockState>>;
    fn root(&self) -> Option<Arc<BlockState>>;

    /// The block on `head`'s branch with the given number, if it is on or
    /// after `root`.
    fn search_on_branch(&self, head: BlockId, block_num: BlockNum) -> Option<Arc<BlockState>>;

    /// Adds a new block. `ignore_duplicate` controls whether re-adding an
    /// already-known id is an error or a no-op.
    fn add(&mut self, bsp: Arc<BlockState>, ignore_duplicate: bool) -> AddResult;

    /// The chain of blocks from `root` (exclusive) to `head` (inclusive),
    /// oldest first.
    fn fetch_branch(&self, head: BlockId, root: BlockId) -> Option<Vec<Arc<BlockState>>>;

    fn is_descendant_of(&self, ancestor: BlockId, descendant: BlockId) -> bool;
}

/// Arena-backed fork database: every accepted block is pushed into a single
/// `Vec` and indexed by id, with parent pointers resolved by another index
/// lookup rather than an in-memory pointer graph. This trades the
/// teacher/original's shared-ownership DAG for a flat, GC-free structure
/// that is easy to reason about in a single-threaded test harness (§9).
pub struct ArenaForkDb {
    nodes: Vec<Arc<BlockState>>,
    index: HashMap<BlockId, usize>,
    children: HashMap<BlockId, Vec<BlockId>>,
    head: Option<BlockId>,
    root: Option<BlockId>,
}

impl ArenaForkDb {
    pub fn new_with_root(root: Arc<BlockState>) -> Self {
        let root_id = root.id();
        let mut db = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            children: HashMap::new(),
            head: Some(root_id),
            root: Some(root_id),
        };
        db.insert(root);
        db
    }

    fn insert(&mut self, bsp: Arc<BlockState>) {
        let id = bsp.id();
        self.index.insert(id, self.nodes.len());
        self.nodes.push(bsp);
        self.children.entry(id).or_default();
    }

    fn get(&self, id: BlockId) -> Option<&Arc<BlockState>> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// Walks from `descendant` back towards `root` via `previous()`,
    /// collecting each hop. Returns `None` if it never reaches `root`.
    fn walk_to_root(&self, descendant: BlockId, root: BlockId) -> Option<Vec<Arc<BlockState>>> {
        let mut chain = Vec::new();
        let mut current = self.get(descendant)?.clone();
        loop {
            let current_id = current.id();
            chain.push(current.clone());
            if current_id == root {
                chain.reverse();
                return Some(chain);
            }
            current = self.get(current.previous())?.clone();
        }
    }
}

impl ForkDb for ArenaForkDb {
    fn head(&self) -> Option<Arc<BlockState>> {
        self.head.and_then(|id| self.get(id)).cloned()
    }

    fn root(&self) -> Option<Arc<BlockState>> {
        self.root.and_then(|id| self.get(id)).cloned()
    }

    fn search_on_branch(&self, head: BlockId, block_num: BlockNum) -> Option<Arc<BlockState>> {
        let root = self.root?;
        let chain = self.walk_to_root(head, root)?;
        chain.into_iter().find(|bsp| bsp.block_num() == block_num)
    }

    fn add(&mut self, bsp: Arc<BlockState>, ignore_duplicate: bool) -> AddResult {
        let id = bsp.id();
        if self.index.contains_key(&id) {
            return if ignore_duplicate {
                AddResult::Duplicate
            } else {
                AddResult::Failure
            };
        }
        if !self.index.contains_key(&bsp.previous()) {
            return AddResult::Failure;
        }

        let previous = bsp.previous();
        let new_block_num = bsp.block_num();
        self.children.entry(previous).or_default().push(id);
        self.insert(bsp);

        let Some(current_head) = self.head.and_then(|h| self.get(h)) else {
            self.head = Some(id);
            return AddResult::Added;
        };

        if current_head.id() == previous {
            self.head = Some(id);
            return AddResult::AppendedToHead;
        }

        if new_block_num > current_head.block_num() {
            self.head = Some(id);
            AddResult::ForkSwitch
        } else {
            AddResult::Added
        }
    }

    fn fetch_branch(&self, head: BlockId, root: BlockId) -> Option<Vec<Arc<BlockState>>> {
        let chain = self.walk_to_root(head, root)?;
        Some(chain.into_iter().skip(1).collect())
    }

    fn is_descendant_of(&self, ancestor: BlockId, descendant: BlockId) -> bool {
        if ancestor == descendant {
            return true;
        }
        let Some(root) = self.root else { return false };
        match self.walk_to_root(descendant, root) {
            Some(chain) => chain.iter().any(|bsp| bsp.id() == ancestor),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use finality_config::local_policy_and_keys;
    use finality_types::FinalityDigest;

    use super::*;
    use crate::finality_core::FinalityCore;

    fn block_id(n: u32) -> BlockId {
        let mut bytes = [0u8; finality_config::DIGEST_LENGTH];
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&n.to_be_bytes());
        BlockId(bytes)
    }

    fn block(n: u32, parent: u32, timestamp: u64, core: FinalityCore) -> Arc<BlockState> {
        let (policy, _keys) = local_policy_and_keys(1, vec![1, 1, 1]);
        // Repeating the core's own latest claim is always a valid (if
        // uninteresting) claim, letting these tests focus on fork-db
        // mechanics rather than finality advancement.
        let qc_claim = core.latest_qc_claim();
        Arc::new(BlockState::new(
            block_id(n),
            block_id(parent),
            timestamp,
            core,
            qc_claim,
            Arc::new(policy),
            None,
            FinalityDigest::of(&n),
            None,
            FinalityDigest::default(),
            timestamp.saturating_sub(1),
        ))
    }

    #[test]
    fn add_extends_the_head_along_a_single_chain() {
        let root = block(10, 9, 1000, FinalityCore::create_for_genesis(block_id(10), 1000));
        let mut db = ArenaForkDb::new_with_root(root.clone());

        let core_after_root = root.advance_core();
        let next = block(11, 10, 1001, core_after_root);
        assert_eq!(db.add(next.clone(), false), AddResult::AppendedToHead);
        assert_eq!(db.head().unwrap().id(), next.id());
    }

    #[test]
    fn add_with_unknown_parent_fails() {
        let root = block(10, 9, 1000, FinalityCore::create_for_genesis(block_id(10), 1000));
        let mut db = ArenaForkDb::new_with_root(root);

        let orphan = block(20, 19, 2000, FinalityCore::create_for_genesis(block_id(19), 1999));
        assert_eq!(db.add(orphan, false), AddResult::Failure);
    }

    #[test]
    fn duplicate_add_is_reported() {
        let root = block(10, 9, 1000, FinalityCore::create_for_genesis(block_id(10), 1000));
        let mut db = ArenaForkDb::new_with_root(root.clone());
        assert_eq!(db.add(root, true), AddResult::Duplicate);
    }

    #[test]
    fn fetch_branch_returns_chain_excluding_root() {
        let root = block(10, 9, 1000, FinalityCore::create_for_genesis(block_id(10), 1000));
        let mut db = ArenaForkDb::new_with_root(root.clone());

        let b11 = block(11, 10, 1001, root.advance_core());
        db.add(b11.clone(), false);
        let b12 = block(12, 11, 1002, b11.advance_core());
        db.add(b12.clone(), false);

        let branch = db.fetch_branch(b12.id(), root.id()).unwrap();
        assert_eq!(branch.len(), 2);
        assert_eq!(branch[0].id(), b11.id());
        assert_eq!(branch[1].id(), b12.id());
    }

    #[test]
    fn is_descendant_of_follows_previous_pointers() {
        let root = block(10, 9, 1000, FinalityCore::create_for_genesis(block_id(10), 1000));
        let mut db = ArenaForkDb::new_with_root(root.clone());

        let b11 = block(11, 10, 1001, root.advance_core());
        db.add(b11.clone(), false);

        assert!(db.is_descendant_of(root.id(), b11.id()));
        assert!(!db.is_descendant_of(b11.id(), root.id()));
    }
}
