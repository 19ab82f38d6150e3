// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use finality_config::BlsSignature;
use finality_types::{BlockNum, FinalityError, QcSig, VoteResult};

use crate::stake_aggregator::VoteTracker;

/// Five-state progression of one finalizer policy's open QC, guarded by a
/// mutex (§3, §4.2, `aggregating_qc_sig_t::state_t`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingState {
    /// No quorum reached yet, still possible to achieve any state.
    Unrestricted,
    /// Enough weak votes received to know the strong state is unreachable.
    Restricted,
    /// Enough weak+strong votes for a valid weak QC; strong still reachable.
    WeakAchieved,
    /// Enough weak+strong votes for a valid weak QC; strong no longer reachable.
    WeakFinal,
    /// Enough strong votes for a valid strong QC.
    Strong,
}

impl PendingState {
    pub fn is_quorum_met(self) -> bool {
        matches!(self, Self::Strong | Self::WeakAchieved | Self::WeakFinal)
    }
}

struct Inner {
    strong_votes: VoteTracker,
    weak_votes: VoteTracker,
    strong_sum: u64,
    weak_sum: u64,
    state: PendingState,
    received_qc_sig: Option<QcSig>,
}

/// Per-policy, per-block vote aggregator. All public methods are
/// thread-safe (§3 `aggregating_qc_sig state`).
pub struct AggregatingQcSig {
    quorum: u64,
    max_weak_sum_before_weak_final: u64,
    inner: Mutex<Inner>,
    /// Per-finalizer "already voted" flags, read and written with relaxed
    /// ordering outside `inner`'s lock so a duplicate vote never has to take
    /// the mutex at all (§4.2 step 1).
    strong_processed: Vec<AtomicBool>,
    weak_processed: Vec<AtomicBool>,
}

impl AggregatingQcSig {
    pub fn new(num_finalizers: usize, quorum: u64, max_weak_sum_before_weak_final: u64) -> Self {
        Self {
            quorum,
            max_weak_sum_before_weak_final,
            inner: Mutex::new(Inner {
                strong_votes: VoteTracker::new(num_finalizers),
                weak_votes: VoteTracker::new(num_finalizers),
                strong_sum: 0,
                weak_sum: 0,
                state: PendingState::Unrestricted,
                received_qc_sig: None,
            }),
            strong_processed: (0..num_finalizers).map(|_| AtomicBool::new(false)).collect(),
            weak_processed: (0..num_finalizers).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn is_quorum_met(&self) -> bool {
        self.inner.lock().state.is_quorum_met()
    }

    pub fn state(&self) -> PendingState {
        self.inner.lock().state
    }

    pub fn has_voted(&self, index: usize) -> bool {
        self.strong_processed[index].load(Ordering::Relaxed)
            || self.weak_processed[index].load(Ordering::Relaxed)
    }

    /// Routes one vote into the strong or weak bitset, advances the state
    /// machine, and returns the outcome (§4.2 `add_vote`). The fast-path
    /// duplicate check reads the relevant atomic flag before the mutex is
    /// even taken; the mutex is only acquired once the vote is known to be
    /// new, and the authoritative bitmap is still re-checked once inside it.
    pub fn add_vote(
        &self,
        connection_id: u32,
        block_num: BlockNum,
        strong: bool,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteResult {
        let processed = if strong { &self.strong_processed } else { &self.weak_processed };
        if processed[index].load(Ordering::Relaxed) {
            return VoteResult::Duplicate;
        }

        let mut inner = self.inner.lock();
        let pre_state = inner.state;
        let result = if strong {
            self.add_strong_vote(&mut inner, index, signature, weight)
        } else {
            self.add_weak_vote(&mut inner, index, signature, weight)
        };
        let post_state = inner.state;
        drop(inner);

        if result == VoteResult::Success {
            processed[index].store(true, Ordering::Relaxed);
        }

        debug!(
            target: "vote",
            connection_id,
            block_num,
            strong,
            ?pre_state,
            ?post_state,
            "processed vote"
        );
        result
    }

    fn add_strong_vote(
        &self,
        inner: &mut Inner,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteResult {
        if let Err(FinalityError::Duplicate { .. }) = inner.strong_votes.add_vote(index, signature)
        {
            return VoteResult::Duplicate;
        }
        inner.strong_sum += weight;

        inner.state = match inner.state {
            PendingState::Unrestricted | PendingState::Restricted => {
                if inner.strong_sum >= self.quorum {
                    debug_assert_ne!(inner.state, PendingState::Restricted);
                    PendingState::Strong
                } else if inner.weak_sum + inner.strong_sum >= self.quorum {
                    if inner.state == PendingState::Restricted {
                        PendingState::WeakFinal
                    } else {
                        PendingState::WeakAchieved
                    }
                } else {
                    inner.state
                }
            }
            PendingState::WeakAchieved => {
                if inner.strong_sum >= self.quorum {
                    PendingState::Strong
                } else {
                    inner.state
                }
            }
            PendingState::WeakFinal | PendingState::Strong => inner.state,
        };
        VoteResult::Success
    }

    fn add_weak_vote(
        &self,
        inner: &mut Inner,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteResult {
        if let Err(FinalityError::Duplicate { .. }) = inner.weak_votes.add_vote(index, signature) {
            return VoteResult::Duplicate;
        }
        inner.weak_sum += weight;

        inner.state = match inner.state {
            PendingState::Unrestricted | PendingState::Restricted => {
                let mut state = inner.state;
                if inner.weak_sum + inner.strong_sum >= self.quorum {
                    state = PendingState::WeakAchieved;
                }
                if inner.weak_sum > self.max_weak_sum_before_weak_final {
                    state = if state == PendingState::WeakAchieved {
                        PendingState::WeakFinal
                    } else if state == PendingState::Unrestricted {
                        PendingState::Restricted
                    } else {
                        state
                    };
                }
                state
            }
            PendingState::WeakAchieved => {
                if inner.weak_sum >= self.max_weak_sum_before_weak_final {
                    PendingState::WeakFinal
                } else {
                    inner.state
                }
            }
            PendingState::WeakFinal | PendingState::Strong => inner.state,
        };
        VoteResult::Success
    }

    /// Called only when the open aggregator has reached quorum (precondition
    /// checked by callers, §4.2 "Extraction precondition").
    fn extract_qc_sig_from_open(&self, inner: &Inner) -> QcSig {
        debug_assert!(inner.state.is_quorum_met());
        if inner.state == PendingState::Strong {
            QcSig {
                strong_votes: inner.strong_votes.bitmap().clone(),
                weak_votes: None,
            }
        } else {
            let mut sig = inner.strong_votes.bitmap().signature.clone();
            sig.combine(&inner.weak_votes.bitmap().signature)
                .expect("combining strong and weak aggregates cannot fail");
            let mut strong_votes = inner.strong_votes.bitmap().clone();
            strong_votes.signature = sig;
            QcSig {
                strong_votes,
                weak_votes: Some(inner.weak_votes.bitmap().clone()),
            }
        }
    }

    /// Best QC currently known for this policy: prefers a received QC over
    /// one derived from locally aggregated votes when the received one is
    /// strong, or both are weak (§4.2 `get_best_qc`).
    pub fn get_best_qc(&self) -> Option<QcSig> {
        let inner = self.inner.lock();
        if !inner.state.is_quorum_met() {
            return inner.received_qc_sig.clone();
        }

        let from_open = self.extract_qc_sig_from_open(&inner);
        match &inner.received_qc_sig {
            None => Some(from_open),
            Some(received) => {
                let use_received = received.is_strong() || (received.is_weak() && from_open.is_weak());
                Some(if use_received {
                    received.clone()
                } else {
                    from_open
                })
            }
        }
    }

    pub fn set_received_qc_sig(&self, qc: QcSig) {
        self.inner.lock().received_qc_sig = Some(qc);
    }

    pub fn received_qc_sig_is_strong(&self) -> bool {
        self.inner
            .lock()
            .received_qc_sig
            .as_ref()
            .map(|q| q.is_strong())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finality_config::BlsKeyPair;
    use rand::{rngs::StdRng, SeedableRng as _};

    fn signer(seed: u8) -> BlsSignature {
        let mut rng = StdRng::from_seed([seed; 32]);
        BlsKeyPair::generate(&mut rng).sign(b"digest")
    }

    #[test]
    fn strong_votes_reach_strong_state_at_quorum() {
        let agg = AggregatingQcSig::new(4, 3, 10);
        for i in 0..3 {
            let r = agg.add_vote(0, 1, true, i, &signer(i as u8), 1);
            assert_eq!(r, VoteResult::Success);
        }
        assert_eq!(agg.state(), PendingState::Strong);
        assert!(agg.is_quorum_met());
    }

    #[test]
    fn weak_votes_past_threshold_become_restricted_then_weak_final() {
        let agg = AggregatingQcSig::new(4, 3, 1);
        agg.add_vote(0, 1, false, 0, &signer(0), 1);
        assert_eq!(agg.state(), PendingState::Unrestricted);
        agg.add_vote(0, 1, false, 1, &signer(1), 1);
        // weak_sum = 2 > max_weak_sum_before_weak_final(1), and 2 < quorum(3): restricted.
        assert_eq!(agg.state(), PendingState::Restricted);
        agg.add_vote(0, 1, false, 2, &signer(2), 1);
        // weak_sum = 3 >= quorum: weak_final (restricted -> weak_final on reaching quorum).
        assert_eq!(agg.state(), PendingState::WeakFinal);
    }

    #[test]
    fn duplicate_vote_short_circuits() {
        let agg = AggregatingQcSig::new(4, 3, 10);
        assert_eq!(agg.add_vote(0, 1, true, 0, &signer(0), 1), VoteResult::Success);
        assert_eq!(agg.add_vote(0, 1, true, 0, &signer(0), 1), VoteResult::Duplicate);
    }

    #[test]
    fn get_best_qc_prefers_received_when_strong() {
        let agg = AggregatingQcSig::new(4, 3, 10);
        for i in 0..3 {
            agg.add_vote(0, 1, true, i, &signer(i as u8), 1);
        }
        let from_open = agg.get_best_qc().unwrap();
        assert!(from_open.is_strong());

        agg.set_received_qc_sig(from_open.clone());
        assert!(agg.received_qc_sig_is_strong());
        let best = agg.get_best_qc().unwrap();
        assert!(best.is_strong());
    }
}
