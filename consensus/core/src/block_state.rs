// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use finality_config::BlsPublicKey;
use finality_types::{
    weak_digest, BlockId, BlockNum, BlockRef, BlockTimestamp, FinalityDigest, FinalityLeaf,
    FinalityResult, Qc, QcClaim, VoteMessage, VoteResult, VoteStatus,
};

use crate::aggregating_qc::AggregatingQc;
use crate::finality_core::FinalityCore;
use crate::valid_tree::ValidTree;

/// The finality-relevant state carried by one block: its place in the
/// 2-chain, the policies that govern it, and the votes collected for its QC
/// (`block_state`, trimmed to the finality-only fields - transaction
/// execution, action receipts, and signee validation are out of scope, §1).
pub struct BlockState {
    block_id: BlockId,
    previous: BlockId,
    timestamp: BlockTimestamp,
    /// The 2-chain state as of the block *before* this one; `core.next` is
    /// applied lazily by `advance` once this block's own claim is known.
    core: FinalityCore,
    /// The claim this block's header carries on its most recent ancestor
    /// with a QC (`extract_qc_claim`).
    qc_claim: QcClaim,
    active_finalizer_policy: Arc<finality_config::FinalizerPolicy>,
    pending_finalizer_policy: Option<Arc<finality_config::FinalizerPolicy>>,
    strong_digest: FinalityDigest,
    weak_digest: FinalityDigest,
    aggregating_qc: AggregatingQc,
    validated: AtomicBool,
    /// Finality-validation accumulator, absent only for the genesis block's
    /// parent-less state (§4.6 `valid_t`).
    valid: Option<ValidTree>,
}

impl BlockState {
    /// Builds the state for a new block on top of `parent`'s core. The
    /// caller supplies the already-computed `strong_digest` since it is
    /// derived from block content this crate does not parse (§1 Non-goals).
    /// `parent_valid`/`action_mroot`/`parent_timestamp` feed the
    /// finality-validation tree this block extends from its parent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_id: BlockId,
        previous: BlockId,
        timestamp: BlockTimestamp,
        core: FinalityCore,
        qc_claim: QcClaim,
        active_finalizer_policy: Arc<finality_config::FinalizerPolicy>,
        pending_finalizer_policy: Option<Arc<finality_config::FinalizerPolicy>>,
        strong_digest: FinalityDigest,
        parent_valid: Option<ValidTree>,
        action_mroot: FinalityDigest,
        parent_timestamp: BlockTimestamp,
    ) -> Self {
        let weak_digest = weak_digest(&strong_digest);
        let aggregating_qc = AggregatingQc::new(active_finalizer_policy.clone(), pending_finalizer_policy.clone());

        let new_core = core.next(
            BlockRef {
                block_id,
                timestamp,
                finality_digest: strong_digest,
                active_finalizer_policy_generation: active_finalizer_policy.generation(),
                pending_finalizer_policy_generation: pending_finalizer_policy.as_ref().map(|p| p.generation()),
            },
            qc_claim,
        );
        let leaf = FinalityLeaf {
            major_version: 1,
            minor_version: 0,
            block_num: block_id.block_num(),
            timestamp,
            parent_timestamp,
            finality_digest: strong_digest,
            action_mroot,
        };
        let valid = Some(
            parent_valid
                .unwrap_or_else(ValidTree::new_genesis)
                .extend(leaf, new_core.last_final_block_num()),
        );

        Self {
            block_id,
            previous,
            timestamp,
            core,
            qc_claim,
            active_finalizer_policy,
            pending_finalizer_policy,
            strong_digest,
            weak_digest,
            aggregating_qc,
            validated: AtomicBool::new(false),
            valid,
        }
    }

    pub fn id(&self) -> BlockId {
        self.block_id
    }

    pub fn previous(&self) -> BlockId {
        self.previous
    }

    pub fn block_num(&self) -> BlockNum {
        self.block_id.block_num()
    }

    pub fn timestamp(&self) -> BlockTimestamp {
        self.timestamp
    }

    pub fn strong_digest(&self) -> &FinalityDigest {
        &self.strong_digest
    }

    pub fn weak_digest(&self) -> &FinalityDigest {
        &self.weak_digest
    }

    pub fn core(&self) -> &FinalityCore {
        &self.core
    }

    pub fn active_finalizer_policy(&self) -> &Arc<finality_config::FinalizerPolicy> {
        &self.active_finalizer_policy
    }

    pub fn pending_finalizer_policy(&self) -> Option<&Arc<finality_config::FinalizerPolicy>> {
        self.pending_finalizer_policy.as_ref()
    }

    pub fn irreversible_block_num(&self) -> BlockNum {
        self.core.last_final_block_num()
    }

    pub fn last_final_block_num(&self) -> BlockNum {
        self.core.last_final_block_num()
    }

    pub fn last_final_block_timestamp(&self) -> BlockTimestamp {
        self.core.last_final_block_timestamp()
    }

    pub fn latest_qc_block_num(&self) -> BlockNum {
        self.core.latest_qc_claim().block_num
    }

    pub fn latest_qc_block_timestamp(&self) -> BlockTimestamp {
        self.core.latest_qc_block_timestamp()
    }

    pub fn extract_qc_claim(&self) -> QcClaim {
        self.qc_claim
    }

    pub fn set_valid(&self, valid: bool) {
        self.validated.store(valid, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    /// The `block_ref` this block contributes to its successors' `core.refs`
    /// (`block_state::make_block_ref`).
    pub fn make_block_ref(&self) -> BlockRef {
        BlockRef {
            block_id: self.block_id,
            timestamp: self.timestamp,
            finality_digest: self.strong_digest,
            active_finalizer_policy_generation: self.active_finalizer_policy.generation(),
            pending_finalizer_policy_generation: self.pending_finalizer_policy.as_ref().map(|p| p.generation()),
        }
    }

    /// Advances this block's core by itself, producing the core that the
    /// successor block is built on (`finality_core::next`, applied once this
    /// block's own claim on its parent chain is known).
    pub fn advance_core(&self) -> FinalityCore {
        self.core.next(self.make_block_ref(), self.qc_claim)
    }

    pub fn get_best_qc(&self) -> Option<Qc> {
        self.aggregating_qc.get_best_qc(self.block_num())
    }

    pub fn received_qc_is_strong(&self) -> bool {
        self.aggregating_qc.received_qc_is_strong()
    }

    pub fn set_received_qc(&self, qc: &Qc) {
        self.aggregating_qc.set_received_qc(qc)
    }

    pub fn has_voted(&self, key: &BlsPublicKey) -> VoteStatus {
        self.aggregating_qc.has_voted(key)
    }

    /// Aggregates one inbound vote, verifying its signature against the
    /// strong or weak digest as appropriate (`block_state::aggregate_vote`).
    pub fn aggregate_vote(&self, connection_id: u32, vote: &VoteMessage) -> VoteResult {
        let digest = if vote.strong { &self.strong_digest } else { &self.weak_digest };
        let message = digest.as_bytes();
        self.aggregating_qc.aggregate_vote(connection_id, vote, self.block_num(), || {
            vote.public_key.verify(message, &vote.signature).is_ok()
        })
    }

    pub fn verify_qc_basic(&self, qc: &Qc) -> FinalityResult<()> {
        self.aggregating_qc.verify_qc_basic(qc)
    }

    pub fn verify_qc_signatures(&self, qc: &Qc) -> FinalityResult<()> {
        self.aggregating_qc.verify_qc(qc, &self.strong_digest, &self.weak_digest)
    }

    pub fn verify_qc(&self, qc: &Qc) -> FinalityResult<()> {
        self.verify_qc_basic(qc)?;
        self.verify_qc_signatures(qc)
    }

    pub fn valid(&self) -> Option<&ValidTree> {
        self.valid.as_ref()
    }

    /// Clones this block's validation tree so it can seed a child's
    /// `parent_valid` argument to `BlockState::new`.
    pub fn valid_for_child(&self) -> Option<ValidTree> {
        self.valid.clone()
    }

    pub fn get_validation_mroot(&self, target_block_num: BlockNum) -> Option<FinalityDigest> {
        self.valid.as_ref()?.get_validation_mroot(target_block_num)
    }
}
