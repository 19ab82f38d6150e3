// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use finality_config::BlsSignature;
use finality_types::{FinalityError, VoteBitmap};

/// Bitmap + aggregate signature for one side (strong or weak) of a vote
/// aggregation (`open_qc_sig_t::votes_t`). This bitmap is mutex-guarded by
/// its owning `AggregatingQcSig` and is the authoritative record of who
/// voted; the lock-free fast-path "already processed" flags live directly
/// on `AggregatingQcSig`; instead, outside any mutex, so a duplicate vote
/// never needs to take the lock at all (§3, §5).
pub struct VoteTracker {
    bitmap: VoteBitmap,
}

impl VoteTracker {
    pub fn new(num_finalizers: usize) -> Self {
        Self {
            bitmap: VoteBitmap::new(num_finalizers),
        }
    }

    pub fn has_voted(&self, index: usize) -> bool {
        self.bitmap.has_voted(index)
    }

    /// Adds one vote. Returns an error if this finalizer already voted on
    /// this side. Works even on a freshly-constructed tracker, matching the
    /// original's "works even if sig is default initialized" comment.
    pub fn add_vote(
        &mut self,
        index: usize,
        signature: &BlsSignature,
    ) -> Result<(), FinalityError> {
        if self.bitmap.has_voted(index) {
            return Err(FinalityError::Duplicate {
                block_num: 0,
                finalizer_index: index,
            });
        }
        self.bitmap.set_voted(index);
        self.bitmap
            .signature
            .aggregate(signature)
            .map_err(|_| FinalityError::InvalidSignature { block_num: 0 })?;
        Ok(())
    }

    pub fn bitmap(&self) -> &VoteBitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> VoteBitmap {
        self.bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finality_config::BlsKeyPair;
    use rand::{rngs::StdRng, SeedableRng as _};

    #[test]
    fn duplicate_vote_is_rejected_without_mutating_state() {
        let mut rng = StdRng::from_seed([3; 32]);
        let kp = BlsKeyPair::generate(&mut rng);
        let sig = kp.sign(b"digest");

        let mut tracker = VoteTracker::new(4);
        assert!(!tracker.has_voted(2));
        tracker.add_vote(2, &sig).unwrap();
        assert!(tracker.has_voted(2));

        let err = tracker.add_vote(2, &sig).unwrap_err();
        assert!(matches!(err, FinalityError::Duplicate { .. }));
    }
}
