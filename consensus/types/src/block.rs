// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use fastcrypto::hash::{HashFunction, Digest};
use finality_config::{DefaultHashFunction, DIGEST_LENGTH};
use serde::{Deserialize, Serialize};

/// Block number. `BlockId` derives this from its low 32 bits, matching the
/// original's "block number embedded in the block id" convention (§3
/// `block_ref`).
pub type BlockNum = u32;

/// Finalizer policy generation carried by a block.
pub type PolicyGeneration = u32;

/// Milliseconds since epoch.
pub type BlockTimestamp = u64;

/// Opaque content hash of a block, computed by the caller (block production
/// and validation are out of scope, §1).
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(pub [u8; DIGEST_LENGTH]);

impl BlockId {
    /// The low 32 bits of the id are the block number (§3).
    pub fn block_num(&self) -> BlockNum {
        let tail = &self.0[self.0.len() - 4..];
        u32::from_be_bytes(tail.try_into().expect("4-byte slice"))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", hex_prefix(&self.0))
    }
}

impl From<BlockId> for Digest<{ DIGEST_LENGTH }> {
    fn from(id: BlockId) -> Self {
        Digest::new(id.0)
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Opaque digest of a block's finality-relevant content (the `finality_digest`
/// embedded in each block's finality extension, §3). Distinct from `BlockId`
/// since a block's identity and the thing finalizers sign need not coincide.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FinalityDigest([u8; DIGEST_LENGTH]);

impl FinalityDigest {
    pub fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Hashes an arbitrary BCS-serializable value into a `FinalityDigest`,
    /// the canonical digesting idiom this crate uses throughout (mirrors the
    /// teacher's `BlockV1::digest` body).
    pub fn of<T: Serialize>(value: &T) -> Self {
        let mut hasher = DefaultHashFunction::new();
        hasher.update(bcs::to_bytes(value).expect("BCS serialization should not fail"));
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for FinalityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FinalityDigest({})", hex_prefix(&self.0))
    }
}

/// Immutable pair-plus identifying one block for the purposes of the 2-chain
/// (§3 `block_ref`).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRef {
    pub block_id: BlockId,
    pub timestamp: BlockTimestamp,
    pub finality_digest: FinalityDigest,
    pub active_finalizer_policy_generation: PolicyGeneration,
    pub pending_finalizer_policy_generation: Option<PolicyGeneration>,
}

impl BlockRef {
    pub fn block_num(&self) -> BlockNum {
        self.block_id.block_num()
    }

    /// A default-constructed `BlockRef` stands in for "no block" (e.g. a
    /// freshly seeded `fsi` with no prior vote or lock, §3 `fsi`).
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_num_reads_low_32_bits() {
        let mut bytes = [0u8; DIGEST_LENGTH];
        let n: u32 = 0x0000_1234;
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&n.to_be_bytes());
        let id = BlockId(bytes);
        assert_eq!(id.block_num(), 0x1234);
    }

    #[test]
    fn finality_digest_of_is_deterministic() {
        let a = FinalityDigest::of(&("x", 1u32));
        let b = FinalityDigest::of(&("x", 1u32));
        let c = FinalityDigest::of(&("x", 2u32));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
