// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, warn};

use finality_config::BlsKeyPair;
use finality_types::{weak_digest, BlockRef, FinalizerSafetyInfo, VoteMessage};

use crate::block_state::BlockState;

/// What a finalizer decided to do about one block (§3 `vote_decision`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteDecision {
    NoVote,
    StrongVote,
    WeakVote,
}

/// The three checks `decide_vote` runs, returned alongside the decision
/// mostly for tests and logging, matching the original's `vote_result`
/// (§4.4 `decide_vote`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecideVoteResult {
    pub decision: VoteDecision,
    pub monotony_check: bool,
    pub liveness_check: bool,
    pub safety_check: bool,
}

/// One locally-configured finalizer: its signing key and the safety state it
/// must never violate across restarts (§3, §4.4).
pub struct Finalizer {
    key_pair: BlsKeyPair,
    fsi: FinalizerSafetyInfo,
}

impl Finalizer {
    pub fn new(key_pair: BlsKeyPair, fsi: FinalizerSafetyInfo) -> Self {
        Self { key_pair, fsi }
    }

    pub fn fsi(&self) -> &FinalizerSafetyInfo {
        &self.fsi
    }

    #[cfg(test)]
    pub fn set_fsi(&mut self, fsi: FinalizerSafetyInfo) {
        self.fsi = fsi;
    }

    /// Decides whether to vote on `bsp`, and if so whether strong or weak,
    /// per the monotony/liveness/safety rules of §4.4 `decide_vote`. Mutates
    /// `fsi.last_vote` (and `fsi.lock`, if the vote is strong and extends the
    /// currently known QC) as a side effect of voting.
    pub fn decide_vote(&mut self, bsp: &BlockState) -> DecideVoteResult {
        let monotony_check = self.fsi.last_vote.is_empty() || bsp.timestamp() > self.fsi.last_vote.timestamp;
        if !monotony_check {
            debug!(
                block_num = bsp.block_num(),
                "monotony check failed, cannot vote"
            );
            return DecideVoteResult {
                decision: VoteDecision::NoVote,
                monotony_check,
                liveness_check: false,
                safety_check: false,
            };
        }

        let (liveness_check, safety_check) = if !self.fsi.lock.is_empty() {
            let mut liveness_check = bsp.core().latest_qc_block_timestamp() > self.fsi.lock.timestamp;
            if !liveness_check {
                liveness_check = bsp.core().last_final_block_timestamp() >= self.fsi.lock.timestamp;
            }
            let safety_check = if !liveness_check {
                let safety_check = bsp.core().extends(self.fsi.lock.block_id);
                if !safety_check {
                    warn!(
                        block_num = bsp.block_num(),
                        "safety check failed, block did not extend fsi.lock"
                    );
                }
                safety_check
            } else {
                false
            };
            (liveness_check, safety_check)
        } else {
            warn!(
                block_num = bsp.block_num(),
                "liveness check & safety check failed, fsi.lock is empty"
            );
            (false, false)
        };

        let can_vote = liveness_check || safety_check;
        let mut decision = VoteDecision::NoVote;

        if can_vote {
            let p_start = bsp.core().latest_qc_block_timestamp();
            let p_end = bsp.timestamp();

            let time_range_disjoint =
                self.fsi.last_vote_range_start >= p_end || self.fsi.last_vote.timestamp <= p_start;
            let mut voting_strong = time_range_disjoint;
            if !voting_strong && !self.fsi.last_vote.is_empty() {
                voting_strong = bsp.core().extends(self.fsi.last_vote.block_id);
            }

            self.fsi.last_vote = BlockRef {
                block_id: bsp.id(),
                timestamp: bsp.timestamp(),
                finality_digest: *bsp.strong_digest(),
                active_finalizer_policy_generation: bsp.active_finalizer_policy().generation(),
                pending_finalizer_policy_generation: bsp.pending_finalizer_policy().map(|p| p.generation()),
            };
            self.fsi.last_vote_range_start = p_start;

            let latest_qc_block_ref = bsp.core().latest_qc_block_ref();
            if voting_strong && latest_qc_block_ref.timestamp > self.fsi.lock.timestamp {
                self.fsi.lock = latest_qc_block_ref;
            }

            decision = if voting_strong {
                VoteDecision::StrongVote
            } else {
                VoteDecision::WeakVote
            };
        }

        debug!(
            block_num = bsp.block_num(),
            liveness_check,
            safety_check,
            monotony_check,
            can_vote,
            ?decision,
            "decided vote"
        );

        DecideVoteResult {
            decision,
            monotony_check,
            liveness_check,
            safety_check,
        }
    }

    /// Runs `decide_vote` and, if it decided to vote, signs the appropriate
    /// digest and returns the vote to broadcast (§4.4 `maybe_vote`).
    pub fn maybe_vote(&mut self, bsp: &BlockState) -> Option<VoteMessage> {
        let result = self.decide_vote(bsp);
        match result.decision {
            VoteDecision::NoVote => None,
            VoteDecision::StrongVote => {
                let signature = self.key_pair.sign(bsp.strong_digest().as_bytes());
                Some(VoteMessage {
                    block_id: bsp.id(),
                    strong: true,
                    public_key: self.key_pair.public(),
                    signature,
                })
            }
            VoteDecision::WeakVote => {
                let weak = weak_digest(bsp.strong_digest());
                let signature = self.key_pair.sign(weak.as_bytes());
                Some(VoteMessage {
                    block_id: bsp.id(),
                    strong: false,
                    public_key: self.key_pair.public(),
                    signature,
                })
            }
        }
    }

    /// Updates `fsi.lock`/`fsi.last_vote` from a QC this finalizer did not
    /// itself vote for, if it shows a more recent lock than what this
    /// finalizer already holds (§4.4 `finalizer::maybe_update_fsi`). Used to
    /// restore liveness for a finalizer that missed votes, without it ever
    /// having to actually cast one.
    pub fn maybe_update_fsi(&mut self, bsp: &BlockState) -> bool {
        let latest_qc_block_ref = bsp.core().latest_qc_block_ref();
        if latest_qc_block_ref.timestamp > self.fsi.lock.timestamp && bsp.timestamp() > self.fsi.last_vote.timestamp {
            self.fsi.lock = latest_qc_block_ref;
            self.fsi.last_vote = BlockRef {
                block_id: bsp.id(),
                timestamp: bsp.timestamp(),
                finality_digest: *bsp.strong_digest(),
                active_finalizer_policy_generation: bsp.active_finalizer_policy().generation(),
                pending_finalizer_policy_generation: bsp.pending_finalizer_policy().map(|p| p.generation()),
            };
            self.fsi.last_vote_range_start = bsp.core().latest_qc_block_timestamp();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use finality_config::local_policy_and_keys;
    use finality_types::{BlockId, FinalityDigest};

    use super::*;
    use crate::finality_core::FinalityCore;

    fn block_id(n: u32) -> BlockId {
        let mut bytes = [0u8; finality_config::DIGEST_LENGTH];
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&n.to_be_bytes());
        BlockId(bytes)
    }

    /// `core` must be the genesis-or-earlier core for `parent` (i.e.
    /// `core.current_block_num() == parent`); this builds `parent`'s own
    /// `BlockState` first and advances its core, since `BlockState::new`
    /// requires its `core` argument to already have `current_block_num() ==
    /// n` (matches `scenarios.rs`'s `genesis_state`/`child_state` pair).
    fn state_at(n: u32, parent: u32, timestamp: u64, core: FinalityCore) -> BlockState {
        let (policy, _keys) = local_policy_and_keys(1, vec![1, 1, 1, 1]);
        let policy = Arc::new(policy);

        let parent_timestamp = core.latest_qc_block_timestamp();
        let parent_claim = core.latest_qc_claim();
        let parent_state = BlockState::new(
            block_id(parent),
            block_id(parent.wrapping_sub(1)),
            parent_timestamp,
            core,
            parent_claim,
            policy.clone(),
            None,
            FinalityDigest::of(&parent),
            None,
            FinalityDigest::default(),
            parent_timestamp.saturating_sub(1),
        );

        let advanced_core = parent_state.advance_core();
        let qc_claim = advanced_core.latest_qc_claim();
        BlockState::new(
            block_id(n),
            block_id(parent),
            timestamp,
            advanced_core,
            qc_claim,
            policy,
            None,
            FinalityDigest::of(&n),
            parent_state.valid_for_child(),
            FinalityDigest::default(),
            parent_state.timestamp(),
        )
    }

    /// A finalizer's `fsi.lock` is seeded to the last-irreversible block when
    /// it first activates (the original never leaves it empty in practice;
    /// see `maybe_update_fsi`/`set_default_safety_information`), so tests
    /// build a starting `fsi` the same way rather than using `unset()`.
    fn seeded_fsi(core: &FinalityCore) -> FinalizerSafetyInfo {
        FinalizerSafetyInfo {
            last_vote: BlockRef::default(),
            last_vote_range_start: 0,
            lock: core.latest_qc_block_ref(),
            other_branch_latest_time: 0,
        }
    }

    #[test]
    fn first_vote_with_seeded_lock_is_strong() {
        let (_policy, keys) = local_policy_and_keys(1, vec![1]);
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let mut finalizer = Finalizer::new(keys[0].clone(), seeded_fsi(&core));

        let bsp = state_at(11, 10, 1001, core);

        let result = finalizer.decide_vote(&bsp);
        assert!(result.monotony_check);
        assert_eq!(result.decision, VoteDecision::StrongVote);
        assert!(!finalizer.fsi().last_vote.is_empty());
    }

    #[test]
    fn vote_decision_with_unset_fsi_never_votes() {
        let (_policy, keys) = local_policy_and_keys(1, vec![1]);
        let mut finalizer = Finalizer::new(keys[0].clone(), FinalizerSafetyInfo::unset());

        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let bsp = state_at(11, 10, 1001, core);

        let result = finalizer.decide_vote(&bsp);
        assert!(result.monotony_check);
        assert!(!result.liveness_check);
        assert!(!result.safety_check);
        assert_eq!(result.decision, VoteDecision::NoVote);
    }

    #[test]
    fn repeated_timestamp_fails_monotony_check() {
        let (_policy, keys) = local_policy_and_keys(1, vec![1]);
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let mut finalizer = Finalizer::new(keys[0].clone(), seeded_fsi(&core));

        let bsp = state_at(11, 10, 1001, core.clone());
        finalizer.decide_vote(&bsp);

        let bsp_again = state_at(11, 10, 1001, core);
        let result = finalizer.decide_vote(&bsp_again);
        assert!(!result.monotony_check);
        assert_eq!(result.decision, VoteDecision::NoVote);
    }

    #[test]
    fn maybe_vote_produces_a_signed_message_matching_the_decision() {
        let (_policy, keys) = local_policy_and_keys(1, vec![1]);
        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let mut finalizer = Finalizer::new(keys[0].clone(), seeded_fsi(&core));

        let bsp = state_at(11, 10, 1001, core);

        let vote = finalizer.maybe_vote(&bsp).expect("should vote");
        assert!(vote.strong);
        assert_eq!(vote.block_id, block_id(11));
    }
}
