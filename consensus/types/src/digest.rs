// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::{BlockNum, BlockTimestamp, FinalityDigest};

/// Suffix appended to a strong digest before hashing to produce the digest a
/// finalizer signs for a weak vote, so that a strong signature can never be
/// replayed as a weak one or vice versa (§4.1, §4.4).
const WEAK_DIGEST_SUFFIX: &[u8] = b"WEAK";

/// Derives the digest a weak vote is signed over from the block's strong
/// (finality) digest: `sha256(strong_digest || "WEAK")` in the original;
/// this port keeps the same "append a fixed suffix, re-hash" construction
/// but reuses the crate's own hash function for consistency.
pub fn weak_digest(strong_digest: &FinalityDigest) -> FinalityDigest {
    let mut buf = Vec::with_capacity(strong_digest.as_bytes().len() + WEAK_DIGEST_SUFFIX.len());
    buf.extend_from_slice(strong_digest.as_bytes());
    buf.extend_from_slice(WEAK_DIGEST_SUFFIX);
    FinalityDigest::of(&buf)
}

/// One leaf of the reversible-blocks Merkle tree (§4.1 `get_reversible_blocks_mroot`,
/// §4.6 `valid_t`). Action Merkle roots are out of scope (§1): `action_mroot`
/// is an opaque digest supplied by the caller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalityLeaf {
    pub major_version: u32,
    pub minor_version: u32,
    pub block_num: BlockNum,
    pub timestamp: BlockTimestamp,
    pub parent_timestamp: BlockTimestamp,
    pub finality_digest: FinalityDigest,
    pub action_mroot: FinalityDigest,
}

impl FinalityLeaf {
    pub fn digest(&self) -> FinalityDigest {
        FinalityDigest::of(self)
    }
}
