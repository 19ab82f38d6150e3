// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::warn;

use finality_config::FinalizerPolicy;
use finality_types::{
    BlockNum, FinalityDigest, FinalityError, FinalityResult, Qc, QcSig, VoteMessage, VoteResult,
    VoteStatus,
};

use crate::aggregating_qc_sig::AggregatingQcSig;

/// Per-finalizer vote tallies for a verified QC, split by which side of the
/// QC each finalizer's vote landed on (`qc_vote_metrics_t`).
#[derive(Clone, Debug, Default)]
pub struct QcVoteMetrics {
    pub strong_voters: Vec<usize>,
    pub weak_voters: Vec<usize>,
    pub missing_voters: Vec<usize>,
}

/// Checks that `sig` carries enough weight to be a valid QC under `policy`,
/// without touching signatures. Cheap enough to run on every block
/// (`open_qc_t`'s part of `qc_sig_t::verify` before the BLS check).
fn check_qc_sig_quorum(sig: &QcSig, policy: &FinalizerPolicy) -> FinalityResult<()> {
    let weights: Vec<u64> = policy.finalizers().iter().map(|f| f.weight).collect();
    let strong_weight = sig.strong_votes.weight(&weights);
    let weak_weight = sig.weak_votes.as_ref().map(|v| v.weight(&weights)).unwrap_or(0);

    if sig.is_strong() {
        if strong_weight < policy.threshold() {
            return Err(FinalityError::InvalidQcClaim {
                reason: format!(
                    "strong quorum not met: {strong_weight} < {}",
                    policy.threshold()
                ),
            });
        }
    } else if strong_weight + weak_weight < policy.threshold() {
        return Err(FinalityError::InvalidQcClaim {
            reason: format!(
                "weak quorum not met: {strong_weight} + {weak_weight} < {}",
                policy.threshold()
            ),
        });
    }
    Ok(())
}

/// Verifies the BLS aggregate signature of one side (strong or weak) of a QC
/// against the digest its signers signed over (`qc_sig_t::verify`, signature
/// half).
fn verify_qc_sig_signature(
    sig: &QcSig,
    policy: &FinalizerPolicy,
    strong_digest: &FinalityDigest,
    weak_digest: &FinalityDigest,
) -> FinalityResult<()> {
    let strong_keys: Vec<_> = sig
        .strong_votes
        .voters()
        .filter_map(|i| policy.finalizer_key(i))
        .collect();

    match &sig.weak_votes {
        None => sig
            .strong_votes
            .signature
            .verify(&strong_keys, strong_digest.as_bytes())
            .map_err(|_| FinalityError::InvalidSignature { block_num: 0 }),
        Some(weak_votes) => {
            let weak_keys: Vec<_> = weak_votes.voters().filter_map(|i| policy.finalizer_key(i)).collect();
            sig.strong_votes
                .signature
                .verify_distinct(&strong_keys, strong_digest.as_bytes(), &weak_keys, weak_digest.as_bytes())
                .map_err(|_| FinalityError::InvalidSignature { block_num: 0 })
        }
    }
}


/// Open vote aggregation for one block across its active and (if present)
/// pending finalizer policies (`open_qc_t`). Pairs an `AggregatingQcSig`
/// per policy so that a block spanning a policy transition collects votes
/// under both policies simultaneously (§4.3).
pub struct AggregatingQc {
    active_policy: Arc<FinalizerPolicy>,
    pending_policy: Option<Arc<FinalizerPolicy>>,
    active_policy_sig: AggregatingQcSig,
    pending_policy_sig: Option<AggregatingQcSig>,
}

impl AggregatingQc {
    pub fn new(active_policy: Arc<FinalizerPolicy>, pending_policy: Option<Arc<FinalizerPolicy>>) -> Self {
        let active_policy_sig = AggregatingQcSig::new(
            active_policy.size(),
            active_policy.threshold(),
            active_policy.max_weak_sum_before_weak_final(),
        );
        let pending_policy_sig = pending_policy.as_ref().map(|p| {
            AggregatingQcSig::new(p.size(), p.threshold(), p.max_weak_sum_before_weak_final())
        });
        Self {
            active_policy,
            pending_policy,
            active_policy_sig,
            pending_policy_sig,
        }
    }

    pub fn is_quorum_met(&self) -> bool {
        self.active_policy_sig.is_quorum_met()
            && self
                .pending_policy_sig
                .as_ref()
                .map(|s| s.is_quorum_met())
                .unwrap_or(true)
    }

    /// Routes one inbound vote to the active and, if present, pending
    /// policy's aggregator. The caller supplies `verified` so the signature
    /// is checked at most once even when the vote applies to both policies
    /// (`open_qc_t::aggregate_vote`).
    pub fn aggregate_vote(
        &self,
        connection_id: u32,
        vote: &VoteMessage,
        block_num: BlockNum,
        mut verify_sig: impl FnMut() -> bool,
    ) -> VoteResult {
        let mut verified = false;
        let mut add_vote = |policy: &FinalizerPolicy, sig: &AggregatingQcSig| -> VoteResult {
            let Some(index) = policy.index_of(&vote.public_key) else {
                return VoteResult::UnknownPublicKey;
            };
            if sig.has_voted(index) {
                return VoteResult::Duplicate;
            }
            if !verified {
                if !verify_sig() {
                    warn!(connection_id, "signature from finalizer cannot be verified");
                    return VoteResult::InvalidSignature;
                }
                verified = true;
            }
            let weight = policy.finalizers()[index].weight;
            match sig.add_vote(connection_id, block_num, vote.strong, index, &vote.signature, weight) {
                VoteResult::Success => VoteResult::Success,
                other => other,
            }
        };

        let mut result = add_vote(&self.active_policy, &self.active_policy_sig);
        if !matches!(result, VoteResult::Success | VoteResult::UnknownPublicKey) {
            return result;
        }

        if let (Some(policy), Some(sig)) = (&self.pending_policy, &self.pending_policy_sig) {
            let pending_result = add_vote(policy, sig);
            if !matches!(pending_result, VoteResult::UnknownPublicKey) {
                result = pending_result;
            }
        }

        if matches!(result, VoteResult::UnknownPublicKey) {
            warn!(connection_id, "finalizer key in vote is not in finalizer policies");
        }
        result
    }

    pub fn has_voted(&self, key: &finality_config::BlsPublicKey) -> VoteStatus {
        let active_status = match self.active_policy.index_of(key) {
            Some(index) => {
                if self.active_policy_sig.has_voted(index) {
                    VoteStatus::Voted
                } else {
                    VoteStatus::NotVoted
                }
            }
            None => VoteStatus::IrrelevantFinalizer,
        };

        let (Some(policy), Some(sig)) = (&self.pending_policy, &self.pending_policy_sig) else {
            return active_status;
        };
        if active_status == VoteStatus::NotVoted {
            return active_status;
        }

        let pending_status = match policy.index_of(key) {
            Some(index) if sig.has_voted(index) => VoteStatus::Voted,
            Some(_) => VoteStatus::NotVoted,
            None => VoteStatus::IrrelevantFinalizer,
        };
        if pending_status == VoteStatus::IrrelevantFinalizer {
            active_status
        } else {
            pending_status
        }
    }

    pub fn get_best_qc(&self, block_num: BlockNum) -> Option<Qc> {
        let active_policy_sig = self.active_policy_sig.get_best_qc()?;

        let pending_policy_sig = match &self.pending_policy_sig {
            None => None,
            Some(sig) => Some(sig.get_best_qc()?),
        };

        Some(Qc {
            block_num,
            active_policy_sig,
            pending_policy_sig,
        })
    }

    /// Checks the presence-of-pending-signature invariant and quorum weights,
    /// without touching BLS signatures (`block_state::verify_qc_basic`).
    pub fn verify_qc_basic(&self, qc: &Qc) -> FinalityResult<()> {
        match (&qc.pending_policy_sig, &self.pending_policy) {
            (Some(_), None) => {
                return Err(FinalityError::InvalidQcClaim {
                    reason: "qc contains pending policy signature for nonexistent pending policy".into(),
                })
            }
            (None, Some(_)) => {
                return Err(FinalityError::InvalidQcClaim {
                    reason: "qc does not contain pending policy signature for pending policy".into(),
                })
            }
            _ => {}
        }

        check_qc_sig_quorum(&qc.active_policy_sig, &self.active_policy)?;
        if let (Some(pending_sig), Some(pending_policy)) = (&qc.pending_policy_sig, &self.pending_policy) {
            check_qc_sig_quorum(pending_sig, pending_policy)?;
        }
        Ok(())
    }

    /// Full verification: `verify_qc_basic` plus the (slow) BLS signature
    /// checks (`block_state::verify_qc`).
    pub fn verify_qc(
        &self,
        qc: &Qc,
        strong_digest: &FinalityDigest,
        weak_digest: &FinalityDigest,
    ) -> FinalityResult<()> {
        self.verify_qc_basic(qc)?;
        verify_qc_sig_signature(&qc.active_policy_sig, &self.active_policy, strong_digest, weak_digest)?;
        if let (Some(pending_sig), Some(pending_policy)) = (&qc.pending_policy_sig, &self.pending_policy) {
            verify_qc_sig_signature(pending_sig, pending_policy, strong_digest, weak_digest)?;
        }
        Ok(())
    }

    pub fn set_received_qc(&self, qc: &Qc) {
        self.active_policy_sig.set_received_qc_sig(qc.active_policy_sig.clone());
        if let (Some(sig), Some(pending)) = (&self.pending_policy_sig, &qc.pending_policy_sig) {
            sig.set_received_qc_sig(pending.clone());
        }
    }

    pub fn received_qc_is_strong(&self) -> bool {
        let active = self.active_policy_sig.received_qc_sig_is_strong();
        match &self.pending_policy_sig {
            None => active,
            Some(sig) => active && sig.received_qc_sig_is_strong(),
        }
    }

    pub fn vote_metrics(&self, qc: &Qc) -> QcVoteMetrics {
        let mut metrics = QcVoteMetrics::default();
        collect_policy_votes(&qc.active_policy_sig, self.active_policy.size(), &mut metrics);
        if let Some(pending_sig) = &qc.pending_policy_sig {
            let size = self.pending_policy.as_ref().map(|p| p.size()).unwrap_or(0);
            collect_policy_votes(pending_sig, size, &mut metrics);
        }
        metrics
    }

    pub fn missing_votes(&self, qc: &Qc) -> Vec<usize> {
        let mut missing = Vec::new();
        collect_missing(&qc.active_policy_sig, self.active_policy.size(), &mut missing);
        if let Some(pending_sig) = &qc.pending_policy_sig {
            let size = self.pending_policy.as_ref().map(|p| p.size()).unwrap_or(0);
            collect_missing(pending_sig, size, &mut missing);
        }
        missing
    }
}

fn collect_policy_votes(sig: &QcSig, num_finalizers: usize, metrics: &mut QcVoteMetrics) {
    let mut voted = vec![false; num_finalizers];
    for i in sig.strong_votes.voters() {
        metrics.strong_voters.push(i);
        voted[i] = true;
    }
    if let Some(weak_votes) = &sig.weak_votes {
        for i in weak_votes.voters() {
            metrics.weak_voters.push(i);
            voted[i] = true;
        }
    }
    for (i, v) in voted.into_iter().enumerate() {
        if !v {
            metrics.missing_voters.push(i);
        }
    }
}

fn collect_missing(sig: &QcSig, num_finalizers: usize, missing: &mut Vec<usize>) {
    let mut voted = vec![false; num_finalizers];
    for i in sig.strong_votes.voters() {
        voted[i] = true;
    }
    if let Some(weak_votes) = &sig.weak_votes {
        for i in weak_votes.voters() {
            voted[i] = true;
        }
    }
    for (i, v) in voted.into_iter().enumerate() {
        if !v {
            missing.push(i);
        }
    }
}
