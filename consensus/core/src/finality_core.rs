// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use finality_types::{BlockId, BlockNum, BlockRef, BlockTimestamp, FinalityDigest, QcClaim, QcLink};
use serde::{Deserialize, Serialize};

use crate::merkle::calculate_merkle;

/// Pure value type tracking the 2-chain of QC claims that determines the
/// last final block (§3, §4.1). Never mutated in place: every accepted
/// block produces a new `FinalityCore` via `next`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalityCore {
    /// Non-empty, strictly increasing by `source_block_num`, strictly
    /// non-decreasing by `target_block_num` (invariants 1, 2, 7).
    links: Vec<QcLink>,
    /// Block references for `[last_final_block_num, current_block_num - 1]`,
    /// empty iff this core is the genesis core (invariant 3).
    refs: Vec<BlockRef>,
    genesis_timestamp: BlockTimestamp,
}

impl FinalityCore {
    /// @post returned core has `current_block_num() == block_num`
    /// @post returned core has `latest_qc_claim() == {block_num, is_strong_qc: false}`
    /// @post returned core has `last_final_block_num() == block_num`
    pub fn create_for_genesis(block_id: BlockId, timestamp: BlockTimestamp) -> Self {
        let block_num = block_id.block_num();
        Self {
            links: vec![QcLink {
                source_block_num: block_num,
                target_block_num: block_num,
                is_link_strong: false,
            }],
            refs: Vec::new(),
            genesis_timestamp: timestamp,
        }
    }

    pub fn is_genesis_core(&self) -> bool {
        self.links.len() == 1 && self.links[0].source_block_num == self.links[0].target_block_num
    }

    /// @pre `links` non-empty (invariant 1, always holds).
    pub fn current_block_num(&self) -> BlockNum {
        self.links.last().expect("links non-empty").source_block_num
    }

    pub fn last_final_block_num(&self) -> BlockNum {
        self.links.first().expect("links non-empty").target_block_num
    }

    pub fn last_final_block_timestamp(&self) -> BlockTimestamp {
        if self.is_genesis_core() {
            self.genesis_timestamp
        } else {
            self.get_block_reference(self.last_final_block_num())
                .timestamp
        }
    }

    pub fn latest_qc_claim(&self) -> QcClaim {
        let link = self.links.last().expect("links non-empty");
        QcClaim {
            block_num: link.target_block_num,
            is_strong_qc: link.is_link_strong,
        }
    }

    pub fn latest_qc_block_timestamp(&self) -> BlockTimestamp {
        if self.is_genesis_core() {
            self.genesis_timestamp
        } else {
            self.get_block_reference(self.links.last().expect("links non-empty").target_block_num)
                .timestamp
        }
    }

    /// True iff `id` is one of `refs` in `[last_final, current)`.
    pub fn extends(&self, id: BlockId) -> bool {
        let block_num = id.block_num();
        if block_num >= self.last_final_block_num() && block_num < self.current_block_num() {
            self.get_block_reference(block_num).block_id == id
        } else {
            false
        }
    }

    /// @pre `last_final_block_num() <= block_num < current_block_num()`
    pub fn get_block_reference(&self, block_num: BlockNum) -> &BlockRef {
        debug_assert!(self.last_final_block_num() <= block_num);
        debug_assert!(block_num < self.current_block_num());

        let ref_index = (block_num - self.last_final_block_num()) as usize;
        debug_assert!(ref_index < self.refs.len());
        &self.refs[ref_index]
    }

    /// @pre `links.front().source_block_num <= block_num <= current_block_num()`
    pub fn get_qc_link_from(&self, block_num: BlockNum) -> &QcLink {
        let front_source = self.links.first().expect("links non-empty").source_block_num;
        debug_assert!(front_source <= block_num);
        debug_assert!(block_num <= self.current_block_num());

        let link_index = (block_num - front_source) as usize;
        debug_assert!(link_index < self.links.len());
        &self.links[link_index]
    }

    /// The `BlockRef` for `latest_qc_claim().block_num`, synthesizing a
    /// genesis placeholder when this core has no refs yet. Lets a finalizer
    /// safely read "the block my core's QC currently points at" without
    /// special-casing genesis at every call site (§4.4 `maybe_update_fsi`).
    pub fn latest_qc_block_ref(&self) -> BlockRef {
        if self.is_genesis_core() {
            BlockRef {
                block_id: BlockId::default(),
                timestamp: self.genesis_timestamp,
                finality_digest: FinalityDigest::default(),
                active_finalizer_policy_generation: 0,
                pending_finalizer_policy_generation: None,
            }
        } else {
            *self.get_block_reference(self.latest_qc_claim().block_num)
        }
    }

    /// Merkle root over `{block_num, timestamp, finality_digest, parent_timestamp}`
    /// for `refs[1..]`; empty root if `refs.len() <= 1` (§4.1).
    pub fn get_reversible_blocks_mroot(&self) -> FinalityDigest {
        if self.refs.len() <= 1 {
            return FinalityDigest::default();
        }
        let digests: Vec<FinalityDigest> = self
            .refs
            .windows(2)
            .map(|pair| {
                let (parent, this) = (pair[0], pair[1]);
                FinalityDigest::of(&(
                    this.block_num(),
                    this.timestamp,
                    this.finality_digest,
                    parent.timestamp,
                ))
            })
            .collect();
        calculate_merkle(digests)
    }

    /// Computes `(new_last_final_block_num, new_links_front_source_block_num)`
    /// for a claim on `most_recent_ancestor_with_qc` (`get_new_block_numbers`).
    fn new_block_numbers(&self, claim: &QcClaim) -> (BlockNum, BlockNum) {
        debug_assert!(claim.block_num <= self.current_block_num());
        debug_assert!(self.latest_qc_claim().block_num <= claim.block_num);

        if !claim.is_strong_qc {
            return (
                self.last_final_block_num(),
                self.links.first().expect("links non-empty").source_block_num,
            );
        }

        let link = self.get_qc_link_from(claim.block_num);
        (link.target_block_num, link.source_block_num)
    }

    /// Advances the core by one block. `current_ref` must describe the block
    /// whose number is `current_block_num()`, and `claim` the most recent
    /// ancestor-with-QC seen by that block (§4.1 `next`).
    ///
    /// @pre `current_ref.block_num() == current_block_num()`
    /// @pre if `refs` non-empty: `current_ref` is the immediate successor of
    ///      `refs.back()` with a strictly greater timestamp
    /// @pre `latest_qc_claim() <= claim <= {current_block_num(), _}`
    pub fn next(&self, current_ref: BlockRef, claim: QcClaim) -> Self {
        debug_assert_eq!(current_ref.block_num(), self.current_block_num());
        debug_assert!(
            self.refs.is_empty()
                || (self.refs.last().unwrap().block_num() + 1 == current_ref.block_num())
        );
        debug_assert!(self.refs.is_empty() || (self.refs.last().unwrap().timestamp < current_ref.timestamp));
        debug_assert!(claim.block_num <= self.current_block_num());
        debug_assert!(self.latest_qc_claim() <= claim);

        let (new_last_final, new_links_front_source) = self.new_block_numbers(&claim);

        let links_index = (new_links_front_source
            - self.links.first().expect("links non-empty").source_block_num)
            as usize;
        let mut next_links: Vec<QcLink> = self.links[links_index..].to_vec();
        next_links.push(QcLink {
            source_block_num: self.current_block_num() + 1,
            target_block_num: claim.block_num,
            is_link_strong: claim.is_strong_qc,
        });

        let refs_index = (new_last_final - self.last_final_block_num()) as usize;
        let mut next_refs: Vec<BlockRef> = self.refs[refs_index..].to_vec();
        next_refs.push(current_ref);

        Self {
            links: next_links,
            refs: next_refs,
            genesis_timestamp: self.genesis_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_id(n: u32) -> BlockId {
        let mut bytes = [0u8; finality_config::DIGEST_LENGTH];
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&n.to_be_bytes());
        BlockId(bytes)
    }

    fn block_ref(n: u32, timestamp: u64) -> BlockRef {
        BlockRef {
            block_id: block_id(n),
            timestamp,
            finality_digest: FinalityDigest::of(&n),
            active_finalizer_policy_generation: 0,
            pending_finalizer_policy_generation: None,
        }
    }

    #[test]
    fn genesis_core_satisfies_invariants() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        assert!(core.is_genesis_core());
        assert_eq!(core.current_block_num(), 10);
        assert_eq!(core.last_final_block_num(), 10);
        assert_eq!(
            core.latest_qc_claim(),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            }
        );
    }

    #[test]
    fn weak_claim_never_advances_finality() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let next = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        assert_eq!(next.last_final_block_num(), 10);
        assert_eq!(next.current_block_num(), 11);
    }

    #[test]
    fn strong_claim_advances_finality_via_two_chain() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        // Block 11 weakly claims block 10.
        let core = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        // Block 12 strongly claims block 10 (the link from block 10 -> block 10).
        let core = core.next(
            block_ref(11, 1002),
            QcClaim {
                block_num: 10,
                is_strong_qc: true,
            },
        );
        // Last final stays at 10 because the two-chain is rooted at the genesis
        // self-link (target == source == 10).
        assert_eq!(core.last_final_block_num(), 10);
        assert_eq!(core.current_block_num(), 12);
    }

    #[test]
    fn repeated_identical_strong_claims_leave_last_final_unchanged() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let core = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: true,
            },
        );
        let before = core.last_final_block_num();
        let core = core.next(
            block_ref(11, 1002),
            QcClaim {
                block_num: 10,
                is_strong_qc: true,
            },
        );
        assert_eq!(core.last_final_block_num(), before);
    }

    #[test]
    fn reversible_blocks_mroot_is_empty_below_two_refs() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        assert_eq!(core.get_reversible_blocks_mroot(), FinalityDigest::default());
        let core = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        assert_eq!(core.get_reversible_blocks_mroot(), FinalityDigest::default());
    }

    #[test]
    fn latest_qc_block_ref_on_genesis_uses_genesis_timestamp() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        assert_eq!(core.latest_qc_block_ref().timestamp, 1000);
    }

    #[test]
    fn latest_qc_block_ref_tracks_the_claimed_block() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let core = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        let core = core.next(
            block_ref(11, 1002),
            QcClaim {
                block_num: 11,
                is_strong_qc: false,
            },
        );
        assert_eq!(core.latest_qc_block_ref().timestamp, 1002);
    }

    #[test]
    fn reversible_blocks_mroot_nonempty_with_two_or_more_refs() {
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let core = core.next(
            block_ref(10, 1001),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        let core = core.next(
            block_ref(11, 1002),
            QcClaim {
                block_num: 10,
                is_strong_qc: false,
            },
        );
        assert_ne!(core.get_reversible_blocks_mroot(), FinalityDigest::default());
    }
}
