// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

mod aggregating_qc;
mod aggregating_qc_sig;
mod block_state;
mod context;
mod finality_core;
mod finalizer;
mod fork_db;
mod merkle;
mod metrics;
mod my_finalizers;
mod safety_file;
mod stake_aggregator;
mod valid_tree;

pub use aggregating_qc::{AggregatingQc, QcVoteMetrics};
pub use aggregating_qc_sig::{AggregatingQcSig, PendingState};
pub use block_state::BlockState;
pub use context::Context;
pub use finality_core::FinalityCore;
pub use finalizer::{DecideVoteResult, Finalizer, VoteDecision};
pub use fork_db::{AddResult, ArenaForkDb, ForkDb};
pub use merkle::calculate_merkle;
pub use metrics::Metrics;
pub use my_finalizers::MyFinalizers;
pub use safety_file::SafetyFile;
pub use valid_tree::{IncrementalMerkleTree, ValidTree};
