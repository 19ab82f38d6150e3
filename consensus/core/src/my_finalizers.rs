// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use finality_config::{BlsKeyPair, BlsPublicKey, FinalizerPolicy};
use finality_types::{FinalityError, FinalityResult, FinalizerSafetyInfo, Qc, QcSig, VoteMessage};

use crate::block_state::BlockState;
use crate::finalizer::Finalizer;
use crate::safety_file::SafetyFile;

/// True iff `key`'s finalizer voted strong in `qc_sig` under `policy`
/// (§4.4 `has_voted_strong`). A key absent from the policy never voted.
fn has_voted_strong(policy: &FinalizerPolicy, qc_sig: &QcSig, key: &BlsPublicKey) -> bool {
    debug_assert!(qc_sig.is_strong() || qc_sig.is_weak());
    policy
        .index_of(key)
        .map(|index| qc_sig.strong_votes.has_voted(index))
        .unwrap_or(false)
}

struct Inner {
    finalizers: HashMap<BlsPublicKey, Finalizer>,
    /// `fsi` for finalizers previously present in the safety file but not in
    /// this node's current keys, preserved so they are never lost if the
    /// node is reconfigured back to running them (§4.5 `inactive_safety_info`).
    inactive_safety_info: HashMap<BlsPublicKey, FinalizerSafetyInfo>,
    inactive_safety_info_written: bool,
    default_fsi: FinalizerSafetyInfo,
    file: SafetyFile,
}

/// The finalizers configured to run on this node, plus their crash-safe
/// voting state. One instance serves every locally-configured finalizer
/// key, since almost all of the work (loading, saving, policy lookups) is
/// shared across them (§4.5 `my_finalizers_t`).
pub struct MyFinalizers {
    inner: Mutex<Inner>,
    /// Sticky flag set after this node's first strong vote; once set,
    /// `maybe_update_fsi` stops re-evaluating incoming QCs (§4.4).
    has_voted: AtomicBool,
}

impl MyFinalizers {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(Inner {
                finalizers: HashMap::new(),
                inactive_safety_info: HashMap::new(),
                inactive_safety_info_written: false,
                default_fsi: FinalizerSafetyInfo::unset(),
                file: SafetyFile::new(path),
            }),
            has_voted: AtomicBool::new(false),
        }
    }

    /// Loads the safety file and assigns its entries to the supplied keys,
    /// falling back to `default_fsi` for keys with no saved state. Must be
    /// called exactly once, at startup (§4.5 `set_keys`).
    pub fn set_keys(&self, key_pairs: Vec<BlsKeyPair>) -> FinalityResult<()> {
        if key_pairs.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        debug_assert!(inner.finalizers.is_empty(), "set_keys must be called only once");

        let mut safety_info = inner.file.load()?;
        for key_pair in key_pairs {
            let public_key = key_pair.public();
            let fsi = safety_info.remove(&public_key).unwrap_or(inner.default_fsi);
            inner.finalizers.insert(public_key, Finalizer::new(key_pair, fsi));
        }
        // Whatever is left in `safety_info` belongs to finalizers not
        // currently configured; keep it around so a future reconfiguration
        // back to them does not lose their safety state.
        inner.inactive_safety_info = safety_info;
        Ok(())
    }

    /// Seeds a default `fsi` for finalizers that have never voted or locked
    /// (e.g. on first activation of this subsystem). Never overwrites an
    /// already-initialized finalizer (§4.5 `set_default_safety_information`).
    pub fn set_default_safety_information(&self, fsi: FinalizerSafetyInfo) {
        let mut inner = self.inner.lock();
        for finalizer in inner.finalizers.values_mut() {
            if !finalizer.fsi().last_vote.is_empty() || !finalizer.fsi().lock.is_empty() {
                continue;
            }
            finalizer.set_fsi(fsi);
        }
        inner.default_fsi = fsi;
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().finalizers.is_empty()
    }

    pub fn contains(&self, key: &BlsPublicKey) -> bool {
        self.inner.lock().finalizers.contains_key(key)
    }

    /// Runs `maybe_vote` for every locally configured finalizer relevant to
    /// `bsp`'s active or pending policy, persists the resulting safety state
    /// before handing any vote back to the caller, and returns how many
    /// finalizers voted (§4.4 `maybe_vote`, crash-safety ordering preserved:
    /// never release a vote the safety file does not yet durably reflect).
    pub fn maybe_vote(
        &self,
        bsp: &BlockState,
        mut emit: impl FnMut(VoteMessage),
    ) -> FinalityResult<usize> {
        let mut inner = self.inner.lock();
        if inner.finalizers.is_empty() {
            return Ok(0);
        }

        let mut votes = Vec::new();
        for (key, finalizer) in inner.finalizers.iter_mut() {
            let relevant = bsp.active_finalizer_policy().index_of(key).is_some()
                || bsp
                    .pending_finalizer_policy()
                    .map(|p| p.index_of(key).is_some())
                    .unwrap_or(false);
            if !relevant {
                continue;
            }
            if let Some(vote) = finalizer.maybe_vote(bsp) {
                votes.push(vote);
            }
        }

        if votes.is_empty() {
            return Ok(0);
        }

        self.has_voted.store(true, Ordering::Relaxed);
        save_locked(&mut inner)?;
        drop(inner);

        let count = votes.len();
        for vote in votes {
            emit(vote);
        }
        Ok(count)
    }

    /// Lets finalizers that did not themselves vote on `received_qc` adopt
    /// its lock, restoring their liveness after a period of inactivity
    /// (§4.4 `my_finalizers_t::maybe_update_fsi`).
    pub fn maybe_update_fsi(&self, bsp: &BlockState, received_qc: &Qc) -> FinalityResult<()> {
        let mut inner = self.inner.lock();
        if inner.finalizers.is_empty() {
            return Ok(());
        }
        if self.has_voted.load(Ordering::Relaxed) {
            return Ok(());
        }

        if bsp.pending_finalizer_policy().is_some() && received_qc.pending_policy_sig.is_none() {
            return Err(FinalityError::InvalidQcClaim {
                reason: format!(
                    "qc {} expected to have a pending policy signature",
                    received_qc.block_num
                ),
            });
        }

        let mut updated = false;
        for (key, finalizer) in inner.finalizers.iter_mut() {
            let voted_strong_active = has_voted_strong(bsp.active_finalizer_policy(), &received_qc.active_policy_sig, key);
            let voted_strong_pending = match (bsp.pending_finalizer_policy(), &received_qc.pending_policy_sig) {
                (Some(policy), Some(sig)) => has_voted_strong(policy, sig, key),
                _ => false,
            };
            if voted_strong_active || voted_strong_pending {
                updated |= finalizer.maybe_update_fsi(bsp);
            }
        }

        if updated {
            save_locked(&mut inner)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn get_fsi(&self, key: &BlsPublicKey) -> Option<FinalizerSafetyInfo> {
        self.inner.lock().finalizers.get(key).map(|f| *f.fsi())
    }
}

/// Rewrites the safety file with every active finalizer's current `fsi`,
/// plus (on the first save only) whatever inactive-finalizer state was
/// loaded at startup (§4.5 `save_finalizer_safety_info`).
fn save_locked(inner: &mut Inner) -> FinalityResult<()> {
    let mut entries: Vec<(BlsPublicKey, FinalizerSafetyInfo)> = inner
        .finalizers
        .iter()
        .map(|(key, finalizer)| (key.clone(), *finalizer.fsi()))
        .collect();

    if !inner.inactive_safety_info_written {
        for (key, fsi) in &inner.inactive_safety_info {
            entries.push((key.clone(), *fsi));
        }
        inner.inactive_safety_info_written = true;
    }

    inner.file.save(&entries)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use finality_config::local_policy_and_keys;
    use finality_types::{BlockId, FinalityDigest};
    use rand::{rngs::StdRng, SeedableRng as _};

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
    fn state_at(n: u32, parent: u32, timestamp: u64, core: FinalityCore, policy: Arc<FinalizerPolicy>) -> BlockState {
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

    #[test]
    fn set_keys_seeds_default_fsi_on_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let my_finalizers = MyFinalizers::new(dir.path().join("safety.dat"));
        let mut rng = StdRng::from_seed([1; 32]);
        let key_pair = BlsKeyPair::generate(&mut rng);
        let public_key = key_pair.public();

        my_finalizers.set_keys(vec![key_pair]).unwrap();
        assert!(my_finalizers.contains(&public_key));
        assert_eq!(my_finalizers.get_fsi(&public_key), Some(FinalizerSafetyInfo::unset()));
    }

    #[test]
    fn maybe_vote_persists_before_emitting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety.dat");
        let my_finalizers = MyFinalizers::new(path.clone());

        let mut rng = StdRng::from_seed([2; 32]);
        let key_pair = BlsKeyPair::generate(&mut rng);
        let public_key = key_pair.public();

        let (_, mut other_keys) = local_policy_and_keys(1, vec![1]);
        // Build a policy that includes our own key alongside another finalizer.
        let mut builder = finality_config::FinalizerPolicyBuilder::new(1);
        builder.add_finalizer("self", 1, public_key.clone());
        builder.add_finalizer("other", 1, other_keys.remove(0).public());
        let policy = Arc::new(builder.build());

        my_finalizers.set_keys(vec![key_pair]).unwrap();

        let core = FinalityCore::create_for_genesis(block_id(10), 1000);
        let bsp = state_at(11, 10, 1001, core, policy);

        let mut emitted = Vec::new();
        let count = my_finalizers.maybe_vote(&bsp, |vote| emitted.push(vote)).unwrap();
        assert_eq!(count, 1);
        assert_eq!(emitted.len(), 1);

        let loaded = SafetyFile::new(path).load().unwrap();
        assert!(loaded.contains_key(&public_key));
    }
}
