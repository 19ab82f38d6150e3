// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use crate::BlockNum;

/// Failure kinds a caller of the finality core must recover from (§7).
///
/// Precondition violations (out-of-range `get_block_reference`, a
/// regressing `next` claim) are programming errors and are raised as
/// `debug_assert!`s at the call site instead of living in this enum -
/// they are not meant to be caught and handled.
#[derive(Debug, thiserror::Error)]
pub enum FinalityError {
    #[error("qc claim invalid: {reason}")]
    InvalidQcClaim { reason: String },

    #[error("signature verification failed for block {block_num}")]
    InvalidSignature { block_num: BlockNum },

    #[error("duplicate vote for block {block_num} from finalizer index {finalizer_index}")]
    Duplicate {
        block_num: BlockNum,
        finalizer_index: usize,
    },

    #[error("public key is not part of the active or pending finalizer policy")]
    UnknownPublicKey,

    #[error("block {0} is not known to the fork database")]
    UnknownBlock(BlockNum),

    #[error("safety file I/O error: {0}")]
    SafetyFileIo(#[from] std::io::Error),

    #[error("safety file is corrupt: {0}")]
    SafetyFileCorrupt(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
}

pub type FinalityResult<T> = Result<T, FinalityError>;
