// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::BlsPublicKey;

/// Generation number of a finalizer policy. Bumped whenever the set of
/// finalizers or their weights changes (§3 `finalizer_policy`).
pub type Generation = u32;

/// Voting weight of a finalizer within a policy.
pub type Weight = u64;

/// One finalizer's entry within a `FinalizerPolicy`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizerAuthority {
    /// Human-readable label, for metrics and logging only.
    pub description: String,
    /// Voting weight. Not required to be uniform across finalizers.
    pub weight: Weight,
    /// The finalizer's BLS public key.
    pub public_key: BlsPublicKey,
}

/// A finalizer policy: the set of finalizers authorized to vote, their
/// weights, and the quorum threshold over those weights (§3).
///
/// Unlike the teacher's `Committee`, this carries no network addresses:
/// a finalizer policy is pure voting-rights bookkeeping, not a peer list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizerPolicy {
    generation: Generation,
    threshold: Weight,
    finalizers: Vec<FinalizerAuthority>,
    total_weight: Weight,
}

impl FinalizerPolicy {
    /// FinalizerPolicy should be created via the builder - this is
    /// intentionally marked as a private method.
    fn new(generation: Generation, threshold: Weight, finalizers: Vec<FinalizerAuthority>) -> Self {
        let total_weight = finalizers.iter().map(|f| f.weight).sum();
        assert_ne!(total_weight, 0, "Total finalizer weight cannot be zero!");
        assert!(
            threshold <= total_weight,
            "Quorum threshold cannot exceed total weight"
        );
        Self {
            generation,
            threshold,
            finalizers,
            total_weight,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn threshold(&self) -> Weight {
        self.threshold
    }

    pub fn finalizers(&self) -> &[FinalizerAuthority] {
        &self.finalizers
    }

    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Number of finalizers in the policy.
    pub fn size(&self) -> usize {
        self.finalizers.len()
    }

    pub fn finalizer_key(&self, index: usize) -> Option<&BlsPublicKey> {
        self.finalizers.get(index).map(|f| &f.public_key)
    }

    pub fn index_of(&self, key: &BlsPublicKey) -> Option<usize> {
        self.finalizers.iter().position(|f| &f.public_key == key)
    }

    /// Largest total weak-vote weight that can still be seen and correctly
    /// treated as *not yet* `weak_final`, i.e. `total_weight - threshold`.
    /// Used by `aggregating_qc_sig` to decide the `weak_achieved` →
    /// `weak_final` transition (§4.2).
    pub fn max_weak_sum_before_weak_final(&self) -> Weight {
        self.total_weight - self.threshold
    }
}

/// Use builder to construct a FinalizerPolicy.
pub struct FinalizerPolicyBuilder {
    generation: Generation,
    finalizers: Vec<FinalizerAuthority>,
}

impl FinalizerPolicyBuilder {
    /// Generation is constant and cannot be updated later.
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            finalizers: Vec::new(),
        }
    }

    pub fn add_finalizer(
        &mut self,
        description: impl Into<String>,
        weight: Weight,
        public_key: BlsPublicKey,
    ) -> &mut Self {
        self.finalizers.push(FinalizerAuthority {
            description: description.into(),
            weight,
            public_key,
        });
        self
    }

    /// Consumes self and creates a FinalizerPolicy with a quorum threshold of
    /// `2f+1` over the accumulated total weight, matching the Savanna
    /// strong-QC threshold (§3/§4.3).
    pub fn build(self) -> FinalizerPolicy {
        let total_weight: Weight = self.finalizers.iter().map(|f| f.weight).sum();
        let threshold = 2 * total_weight / 3 + 1;
        FinalizerPolicy::new(self.generation, threshold, self.finalizers)
    }

    /// Consumes self and creates a FinalizerPolicy with an explicit quorum
    /// threshold, for tests that need to exercise non-default thresholds.
    pub fn build_with_threshold(self, threshold: Weight) -> FinalizerPolicy {
        FinalizerPolicy::new(self.generation, threshold, self.finalizers)
    }
}

/// Generates a finalizer policy and the matching BLS key pairs, for local
/// tests that need a fully-formed policy without standing up any network
/// addresses (trimmed down from the teacher's `local_committee_and_keys`,
/// which also allocated TCP ports for each authority).
#[cfg(any(test, feature = "test-utils"))]
pub fn local_policy_and_keys(
    generation: Generation,
    finalizer_weights: Vec<Weight>,
) -> (FinalizerPolicy, Vec<crate::BlsKeyPair>) {
    use rand::{rngs::StdRng, SeedableRng as _};

    let mut rng = StdRng::from_seed([0; 32]);
    let mut builder = FinalizerPolicyBuilder::new(generation);
    let mut key_pairs = Vec::new();

    for (i, weight) in finalizer_weights.into_iter().enumerate() {
        let key_pair = crate::BlsKeyPair::generate(&mut rng);
        builder.add_finalizer(format!("test_finalizer_{i}"), weight, key_pair.public());
        key_pairs.push(key_pair);
    }

    (builder.build(), key_pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;

    #[test]
    fn policy_builder_computes_thresholds() {
        let num_of_finalizers = 9;
        let weights: Vec<Weight> = (1..=num_of_finalizers as Weight).collect();
        let (policy, keys) = local_policy_and_keys(100, weights);

        assert_eq!(policy.size(), num_of_finalizers);
        assert_eq!(keys.len(), num_of_finalizers);
        assert_eq!(policy.total_weight(), 45);
        assert_eq!(policy.threshold(), 31);
        assert_eq!(policy.max_weak_sum_before_weak_final(), 14);

        for (i, finalizer) in policy.finalizers().iter().enumerate() {
            assert_eq!((i + 1) as Weight, finalizer.weight);
        }
    }

    #[test]
    fn index_of_finds_known_key_and_rejects_unknown() {
        let (policy, keys) = local_policy_and_keys(1, vec![1, 1, 1]);
        assert_eq!(policy.index_of(&keys[1].public()), Some(1));

        let outsider = crate::BlsKeyPair::generate(&mut rand::rngs::StdRng::from_seed([1; 32]));
        assert_eq!(policy.index_of(&outsider.public()), None);
    }
}
