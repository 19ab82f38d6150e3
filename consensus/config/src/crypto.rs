// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic type aliases used throughout the finality core.
//!
//! Finalizers sign with BLS12-381 (min-sig variant) because votes must be
//! aggregatable into a single quorum-certificate signature (§4.2/§4.3 of
//! SPEC_FULL.md). The whole codebase should only refer to the wrappers
//! below, never to `fastcrypto::bls12381` directly, so that the scheme can
//! be swapped in one place if it ever needs to be.

use fastcrypto::{
    bls12381::min_sig::{
        BLS12381AggregateSignature, BLS12381KeyPair, BLS12381PrivateKey, BLS12381PublicKey,
        BLS12381Signature,
    },
    error::FastCryptoError,
    hash::{Blake2b256, HashFunction},
    traits::{
        AggregateAuthenticator, KeyPair as _, Signer as _, ToFromBytes as _, VerifyingKey as _,
    },
};
use serde::{Deserialize, Serialize};

/// Public key identifying a finalizer. Finalizer policy entries are keyed by
/// this type (§3 `finalizer_policy`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlsPublicKey(BLS12381PublicKey);

/// Private key held by a locally configured finalizer (§4.5 `my_finalizers_t`).
pub struct BlsPrivateKey(BLS12381PrivateKey);

pub struct BlsKeyPair(BLS12381KeyPair);

/// A single finalizer's signature over a strong or weak digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlsSignature(BLS12381Signature);

/// An accumulator of finalizer signatures. Supports incremental aggregation
/// so that `aggregating_qc_sig` can fold in one vote at a time (§4.2).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlsAggregateSignature(BLS12381AggregateSignature);

impl BlsPublicKey {
    pub fn new(key: BLS12381PublicKey) -> Self {
        Self(key)
    }

    pub fn inner(&self) -> &BLS12381PublicKey {
        &self.0
    }

    pub fn to_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(BLS12381PublicKey::from_bytes(bytes)?))
    }

    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> Result<(), FastCryptoError> {
        self.0.verify(message, &signature.0)
    }
}

impl BlsPrivateKey {
    pub fn new(key: BLS12381PrivateKey) -> Self {
        Self(key)
    }
}

impl BlsKeyPair {
    pub fn new(keypair: BLS12381KeyPair) -> Self {
        Self(keypair)
    }

    pub fn generate<R: rand::Rng + fastcrypto::traits::AllowedRng>(rng: &mut R) -> Self {
        Self(BLS12381KeyPair::generate(rng))
    }

    pub fn public(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.public().clone())
    }

    pub fn private(self) -> BlsPrivateKey {
        BlsPrivateKey(self.0.copy().private())
    }

    /// Signs a raw digest. Unlike the teacher's network/protocol keys, the
    /// finalizer signs digests directly with no intent-message wrapping: the
    /// original C++ signs `strong_digest`/`weak_digest` bytes verbatim, and
    /// this port preserves that wire contract (see SPEC_FULL.md §3, §6).
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(message))
    }
}

impl Clone for BlsKeyPair {
    fn clone(&self) -> Self {
        Self(self.0.copy())
    }
}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(BLS12381Signature::from_bytes(bytes)?))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl BlsAggregateSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one more signature into the accumulator. Works even when called
    /// on a freshly-default-initialized aggregate, matching the original's
    /// `sig.aggregate(signature)` (`qc.cpp::votes_t::add_vote`).
    pub fn aggregate(&mut self, signature: &BlsSignature) -> Result<(), FastCryptoError> {
        self.0.add_signature(signature.0.clone())
    }

    /// Combines two independently-accumulated aggregates, used to produce a
    /// weak QC's signature as `strong_agg ⊕ weak_agg` (§4.2 `get_best_qc`).
    pub fn combine(&mut self, other: &BlsAggregateSignature) -> Result<(), FastCryptoError> {
        self.0.add_aggregate(other.0.clone())
    }

    /// Verifies against a single digest shared by every signer (strong QCs,
    /// or a weak QC's weak-only side).
    pub fn verify(&self, public_keys: &[&BlsPublicKey], message: &[u8]) -> Result<(), FastCryptoError> {
        let keys: Vec<BLS12381PublicKey> = public_keys.iter().map(|k| k.0.clone()).collect();
        self.0.verify(&keys, message)
    }

    /// Verifies a combined strong+weak aggregate where each side was signed
    /// over a distinct digest (§4.3 `verify_signatures`).
    pub fn verify_distinct(
        &self,
        strong_keys: &[&BlsPublicKey],
        strong_digest: &[u8],
        weak_keys: &[&BlsPublicKey],
        weak_digest: &[u8],
    ) -> Result<(), FastCryptoError> {
        let strong: Vec<BLS12381PublicKey> = strong_keys.iter().map(|k| k.0.clone()).collect();
        let weak: Vec<BLS12381PublicKey> = weak_keys.iter().map(|k| k.0.clone()).collect();
        let mut pks = strong;
        pks.extend(weak);
        let messages = [strong_digest, weak_digest];
        self.0.verify_different_msg(&pks, &messages)
    }
}

/// Defines the algorithm and format of block and finality digests.
pub type DefaultHashFunction = Blake2b256;
pub const DIGEST_LENGTH: usize = DefaultHashFunction::OUTPUT_SIZE;
