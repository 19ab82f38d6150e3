// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::block::{BlockRef, BlockTimestamp};

/// The persistent safety state one finalizer keeps across restarts: the last
/// block it voted on, the range of blocks covered by that vote, the block its
/// lock is held on, and a watermark for the other branch at the time of the
/// last lock change (§3 `fsi`).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizerSafetyInfo {
    pub last_vote: BlockRef,
    pub last_vote_range_start: BlockTimestamp,
    pub lock: BlockRef,
    pub other_branch_latest_time: BlockTimestamp,
}

impl FinalizerSafetyInfo {
    /// A finalizer with no prior vote or lock: always free to vote strong.
    pub fn unset() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_has_empty_last_vote_and_lock() {
        let fsi = FinalizerSafetyInfo::unset();
        assert!(fsi.last_vote.is_empty());
        assert!(fsi.lock.is_empty());
        assert_eq!(fsi.last_vote_range_start, 0);
    }
}
