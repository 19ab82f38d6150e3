// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use bit_vec::BitVec;
use finality_config::{BlsAggregateSignature, BlsPublicKey, BlsSignature};
use serde::{Deserialize, Serialize};

use crate::{BlockId, BlockNum};

/// `{block_num, is_strong_qc}`, totally ordered lexicographically: a claim
/// `a` extends `b` iff `a >= b` (§3 `qc_claim`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct QcClaim {
    pub block_num: BlockNum,
    pub is_strong_qc: bool,
}

impl QcClaim {
    pub fn extends(&self, other: &QcClaim) -> bool {
        self >= other
    }
}

/// "Block `source` carries a QC claim on block `target`, strong or weak."
/// Invariant: `target_block_num <= source_block_num` (§3 `qc_link`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QcLink {
    pub source_block_num: BlockNum,
    pub target_block_num: BlockNum,
    pub is_link_strong: bool,
}

impl QcLink {
    pub fn to_claim(&self) -> QcClaim {
        QcClaim {
            block_num: self.target_block_num,
            is_strong_qc: self.is_link_strong,
        }
    }
}

/// A single finalizer's vote, signed over either the strong or the weak
/// digest of the named block (§4.4 step 7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteMessage {
    pub block_id: BlockId,
    pub strong: bool,
    pub public_key: BlsPublicKey,
    pub signature: BlsSignature,
}

/// Outcome of routing one inbound vote through `aggregating_qc`/`my_finalizers`
/// (§3, §4.2, `vote_result_t`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteResult {
    Success,
    /// Duplicate vote; expected as votes arrive on multiple connections.
    Duplicate,
    /// Public key is invalid for the block's active/pending policy.
    UnknownPublicKey,
    /// Signature failed aggregate-verification.
    InvalidSignature,
    /// Block not available locally (possibly less than LIB, or too far in the future).
    UnknownBlock,
}

/// Whether a locally configured finalizer has voted on a given block, used
/// by `my_finalizers_t`/`aggregating_qc::has_voted` (§4.3, `vote_status_t`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteStatus {
    Voted,
    NotVoted,
    IrrelevantFinalizer,
}

/// Per-policy aggregate for one side (strong or weak) of a QC: which
/// finalizers voted, and their combined signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteBitmap {
    pub bits: BitVec,
    pub signature: BlsAggregateSignature,
}

impl VoteBitmap {
    pub fn new(num_finalizers: usize) -> Self {
        Self {
            bits: BitVec::from_elem(num_finalizers, false),
            signature: BlsAggregateSignature::new(),
        }
    }

    pub fn has_voted(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    pub fn set_voted(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn weight(&self, weights: &[u64]) -> u64 {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, voted)| *voted)
            .map(|(i, _)| weights.get(i).copied().unwrap_or(0))
            .sum()
    }

    pub fn voters(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, voted)| voted.then_some(i))
    }
}

/// The signature half of a QC for one finalizer policy: either a strong-only
/// bitmap, or a strong+weak pair (§3 `qc_sig_t`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QcSig {
    pub strong_votes: VoteBitmap,
    pub weak_votes: Option<VoteBitmap>,
}

impl QcSig {
    pub fn is_weak(&self) -> bool {
        self.weak_votes.is_some()
    }

    pub fn is_strong(&self) -> bool {
        self.weak_votes.is_none()
    }
}

/// A complete quorum certificate for a block: the active policy's signature,
/// plus the pending policy's signature if the block has a pending policy
/// (§3, §4.3, `qc_t`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Qc {
    pub block_num: BlockNum,
    pub active_policy_sig: QcSig,
    pub pending_policy_sig: Option<QcSig>,
}

impl Qc {
    pub fn is_strong(&self) -> bool {
        self.active_policy_sig.is_strong()
            && self
                .pending_policy_sig
                .as_ref()
                .map(|s| s.is_strong())
                .unwrap_or(true)
    }

    pub fn is_weak(&self) -> bool {
        !self.is_strong()
    }

    pub fn to_qc_claim(&self) -> QcClaim {
        QcClaim {
            block_num: self.block_num,
            is_strong_qc: self.is_strong(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qc_claim_ordering_is_lexicographic() {
        let weak_10 = QcClaim {
            block_num: 10,
            is_strong_qc: false,
        };
        let strong_10 = QcClaim {
            block_num: 10,
            is_strong_qc: true,
        };
        let weak_11 = QcClaim {
            block_num: 11,
            is_strong_qc: false,
        };
        assert!(weak_10 < strong_10);
        assert!(strong_10 < weak_11);
        assert!(strong_10.extends(&weak_10));
        assert!(!weak_10.extends(&strong_10));
    }

    #[test]
    fn vote_bitmap_tracks_voters_and_weight() {
        let mut bm = VoteBitmap::new(4);
        bm.set_voted(1);
        bm.set_voted(3);
        assert!(bm.has_voted(1));
        assert!(!bm.has_voted(0));
        assert_eq!(bm.weight(&[1, 2, 3, 4]), 6);
        assert_eq!(bm.voters().collect::<Vec<_>>(), vec![1, 3]);
    }
}
